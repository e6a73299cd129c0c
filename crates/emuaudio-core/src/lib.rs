//! # emuaudio-core
//!
//! Core types, configuration, and error handling shared by the emuaudio
//! playback pipeline.

pub mod config;
pub mod error;
pub mod format;

pub use config::{AudioConfig, BufferConfig, DiscardPolicy, MAX_LATENCY_MS};
pub use error::{Error, Result};
pub use format::StreamFormat;

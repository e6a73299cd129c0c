//! # emuaudio
//!
//! Audio transport between an emulator core and the sound card.
//!
//! Features:
//! - Lock-free SPSC ring buffer with discard policies and underflow anticipation
//! - Non-owning read accessor for real-time render callbacks
//! - Low-latency cpal output with sample-rate conversion
//! - Device-driven playback clock for pacing emulation

pub mod buffer;
pub mod clock;
pub mod engine;
pub mod output;
pub mod resample;
pub mod sink;

pub use buffer::{shared_ring_buffer, AudioRingBuffer, ReadBlock, SharedAudioRingBuffer};
pub use clock::AudioClock;
pub use emuaudio_core::{AudioConfig, BufferConfig, DiscardPolicy, Error, Result, StreamFormat};
pub use engine::{AudioEngine, EngineEvent, PlaybackState};
pub use resample::Resampler;
pub use sink::{AudioFrame, FrameSink};

//! Lock-free buffer implementations for real-time audio.

pub mod reader;
pub mod ring;

pub use reader::ReadBlock;
pub use ring::{shared_ring_buffer, AudioRingBuffer, SharedAudioRingBuffer};

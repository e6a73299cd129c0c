//! PCM stream format and frame arithmetic.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Interleaved PCM stream layout.
///
/// A frame is one sample for every channel; byte counts handed to the ring
/// buffer are expected to be whole frames.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StreamFormat {
    pub sample_rate: u32,
    pub channels: u16,
    pub bytes_per_sample: u16,
}

impl StreamFormat {
    /// Native output of the emulated console: 41.667kHz stereo `i16`.
    pub const VIRTUAL_BOY: Self = Self::new(41_667, 2, 2);

    pub const fn new(sample_rate: u32, channels: u16, bytes_per_sample: u16) -> Self {
        Self {
            sample_rate,
            channels,
            bytes_per_sample,
        }
    }

    /// Bytes in one interleaved frame (channels × sample width).
    pub const fn bytes_per_frame(&self) -> usize {
        self.channels as usize * self.bytes_per_sample as usize
    }

    pub const fn frames_to_bytes(&self, frames: usize) -> usize {
        frames * self.bytes_per_frame()
    }

    /// Whole frames contained in `bytes`. A trailing partial frame is ignored.
    pub const fn bytes_to_frames(&self, bytes: usize) -> usize {
        match self.bytes_per_frame() {
            0 => 0,
            per_frame => bytes / per_frame,
        }
    }

    /// Round `bytes` down to a frame boundary.
    pub const fn align_to_frame(&self, bytes: usize) -> usize {
        self.frames_to_bytes(self.bytes_to_frames(bytes))
    }

    /// Byte length of a buffer holding `duration` of audio.
    ///
    /// The frame count is rounded to the nearest frame, so the result is
    /// always frame-aligned.
    pub fn buffer_length(&self, duration: Duration) -> usize {
        let frames = (f64::from(self.sample_rate) * duration.as_secs_f64()).round() as usize;
        self.frames_to_bytes(frames)
    }

    /// Playback time represented by `bytes` of audio.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        let frames = self.bytes_to_frames(bytes) as f64;
        Duration::from_secs_f64(frames / f64::from(self.sample_rate))
    }

    /// Check that the format describes a playable stream.
    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(Error::InvalidArgument("sample rate must be non-zero".into()));
        }
        if self.channels == 0 {
            return Err(Error::InvalidArgument("channel count must be non-zero".into()));
        }
        if self.bytes_per_sample != 2 {
            return Err(Error::UnsupportedFormat(format!(
                "{}-byte samples (only 16-bit PCM is supported)",
                self.bytes_per_sample
            )));
        }
        Ok(())
    }
}

impl Default for StreamFormat {
    fn default() -> Self {
        Self::VIRTUAL_BOY
    }
}

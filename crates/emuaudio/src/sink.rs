//! Producer-side adapter from emulator frames to ring buffer bytes.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use crate::buffer::SharedAudioRingBuffer;
use emuaudio_core::DiscardPolicy;
use tracing::trace;

/// One stereo sample pair as produced by the sound unit: `(left, right)`.
pub type AudioFrame = (i16, i16);

/// Interleaved little-endian `i16` stereo.
const BYTES_PER_FRAME: usize = 4;

/// Writes stereo frames into a ring buffer as interleaved PCM bytes.
///
/// Only whole frames are ever queued, so the consumer never sees left and
/// right swap after a truncated write. Under [`DiscardPolicy::Oldest`] this
/// holds as long as the ring buffer length is a multiple of four bytes, which
/// [`AudioEngine::set_buffer_length`](crate::AudioEngine::set_buffer_length)
/// enforces.
pub struct FrameSink {
    ring_buffer: SharedAudioRingBuffer,
    /// Reused encoding buffer.
    scratch: Vec<u8>,
    frames_dropped: u64,
}

impl FrameSink {
    pub const fn new(ring_buffer: SharedAudioRingBuffer) -> Self {
        Self {
            ring_buffer,
            scratch: Vec::new(),
            frames_dropped: 0,
        }
    }

    /// Queue frames. Returns how many were accepted.
    pub fn push_frames(&mut self, frames: &[AudioFrame]) -> usize {
        self.scratch.clear();
        self.scratch.reserve(frames.len() * BYTES_PER_FRAME);
        for &(left, right) in frames {
            self.scratch.extend_from_slice(&left.to_le_bytes());
            self.scratch.extend_from_slice(&right.to_le_bytes());
        }
        self.commit(frames.len())
    }

    /// Queue separate channel slices, pairing them up to the shorter one.
    pub fn push_channels(&mut self, left: &[i16], right: &[i16]) -> usize {
        let frames = left.len().min(right.len());
        self.scratch.clear();
        self.scratch.reserve(frames * BYTES_PER_FRAME);
        for (l, r) in left.iter().zip(right) {
            self.scratch.extend_from_slice(&l.to_le_bytes());
            self.scratch.extend_from_slice(&r.to_le_bytes());
        }
        self.commit(frames)
    }

    fn commit(&mut self, frames: usize) -> usize {
        let mut bytes = self.scratch.as_slice();

        if self.ring_buffer.discard_policy() == DiscardPolicy::Newest {
            // Free space only grows while we hold the producer side.
            let fits = self.ring_buffer.free_bytes() / BYTES_PER_FRAME * BYTES_PER_FRAME;
            bytes = &bytes[..bytes.len().min(fits)];
        }

        let accepted = self.ring_buffer.write(bytes) / BYTES_PER_FRAME;
        let dropped = frames - accepted;
        if dropped > 0 {
            self.frames_dropped += dropped as u64;
            trace!(dropped, accepted, "ring buffer full, dropped audio frames");
        }

        accepted
    }

    /// Frames that did not make it into the buffer since creation.
    pub const fn frames_dropped(&self) -> u64 {
        self.frames_dropped
    }

    pub const fn ring_buffer(&self) -> &SharedAudioRingBuffer {
        &self.ring_buffer
    }
}

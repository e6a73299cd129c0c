//! Callback-style read accessor for a ring buffer.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use super::AudioRingBuffer;
use std::fmt;
use std::sync::Weak;

/// Reads from an [`AudioRingBuffer`] without keeping it alive.
///
/// Meant to be moved into a platform render callback. Once the buffer is
/// dropped every read returns 0, so a callback that outlives its buffer
/// plays silence instead of extending the buffer's lifetime.
///
/// Not `Clone`: each accessor is one consumer.
pub struct ReadBlock {
    buffer: Weak<AudioRingBuffer>,
}

impl ReadBlock {
    pub(crate) const fn new(buffer: Weak<AudioRingBuffer>) -> Self {
        Self { buffer }
    }

    /// Same semantics as [`AudioRingBuffer::read`].
    pub fn read(&self, output: &mut [u8]) -> usize {
        self.buffer
            .upgrade()
            .map_or(0, |buffer| buffer.read(output))
    }

    /// Read at most `bytes_requested` bytes into `output`.
    pub fn read_requested(&self, output: &mut [u8], bytes_requested: usize) -> usize {
        let len = bytes_requested.min(output.len());
        self.read(&mut output[..len])
    }

    /// Capacity of the buffer, or 0 once it is gone.
    pub fn buffer_length(&self) -> usize {
        self.buffer.upgrade().map_or(0, |buffer| buffer.length())
    }

    /// Whether the buffer is still alive.
    pub fn is_attached(&self) -> bool {
        self.buffer.strong_count() > 0
    }

    /// Turn the accessor into a plain `(buffer, bytes_requested)` closure.
    pub fn into_fn(self) -> impl FnMut(&mut [u8], usize) -> usize + Send + 'static {
        move |output: &mut [u8], bytes_requested: usize| {
            self.read_requested(output, bytes_requested)
        }
    }
}

impl fmt::Debug for ReadBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReadBlock")
            .field("attached", &self.is_attached())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::shared_ring_buffer;
    use std::sync::Arc;

    #[test]
    fn test_forwards_to_buffer() {
        let buffer = shared_ring_buffer(8);
        let reader = buffer.read_block();

        buffer.write(&[1, 2, 3, 4, 5]);

        let mut output = [0u8; 3];
        assert_eq!(reader.read(&mut output), 3);
        assert_eq!(output, [1, 2, 3]);
        assert_eq!(buffer.available_bytes(), 2);
    }

    #[test]
    fn test_read_requested_caps_length() {
        let buffer = shared_ring_buffer(8);
        let reader = buffer.read_block();
        buffer.write(&[1, 2, 3, 4]);

        let mut output = [0u8; 4];
        assert_eq!(reader.read_requested(&mut output, 2), 2);
        assert_eq!(output, [1, 2, 0, 0]);

        // Requests beyond the destination are clamped to it.
        assert_eq!(reader.read_requested(&mut output[..1], 10), 1);
        assert_eq!(output[0], 3);
    }

    #[test]
    fn test_honours_underflow_anticipation() {
        let buffer = shared_ring_buffer(8);
        buffer.set_anticipates_underflow(true);
        let reader = buffer.read_block();
        buffer.write(&[1, 2, 3]);

        assert_eq!(reader.read(&mut [0u8; 2]), 0);
        assert_eq!(buffer.available_bytes(), 3);
    }

    #[test]
    fn test_does_not_keep_buffer_alive() {
        let buffer = shared_ring_buffer(8);
        let reader = buffer.read_block();
        assert_eq!(Arc::strong_count(&buffer), 1);
        assert!(reader.is_attached());
        assert_eq!(reader.buffer_length(), 8);

        buffer.write(&[1, 2]);
        drop(buffer);

        assert!(!reader.is_attached());
        assert_eq!(reader.buffer_length(), 0);
        assert_eq!(reader.read(&mut [0u8; 2]), 0);
    }

    #[test]
    fn test_into_fn() {
        let buffer = shared_ring_buffer(8);
        let mut read = buffer.read_block().into_fn();
        buffer.write(&[7, 8, 9]);

        let mut output = [0u8; 8];
        assert_eq!(read(&mut output, 3), 3);
        assert_eq!(&output[..3], &[7, 8, 9]);
        assert_eq!(read(&mut output, 3), 0);
    }

    #[test]
    fn test_reader_on_consumer_thread() {
        let buffer = shared_ring_buffer(64);
        let reader = buffer.read_block();
        buffer.write(&[5; 32]);

        let handle = std::thread::spawn(move || {
            let mut output = [0u8; 32];
            reader.read(&mut output)
        });

        assert_eq!(handle.join().unwrap(), 32);
        assert!(buffer.is_empty());
    }
}

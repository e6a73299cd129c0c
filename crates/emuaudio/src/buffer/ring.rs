//! Lock-free ring buffer for emulator audio.
//!
//! This buffer is designed for single-producer, single-consumer scenarios
//! where the emulation thread writes interleaved PCM bytes and an audio
//! callback reads them. Overflow is resolved by a [`DiscardPolicy`], and
//! reads can be held back until enough audio is queued.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use super::ReadBlock;
use emuaudio_core::DiscardPolicy;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Lock-free single-producer, single-consumer byte queue.
///
/// Designed for real-time audio: no operation blocks, allocates or fails.
/// Every call is clamped and reports the number of bytes it actually moved,
/// so callers detect partial service by comparing counts.
///
/// Cursors are 64-bit totals that only grow; the storage index is the cursor
/// modulo the capacity, so any capacity works.
pub struct AudioRingBuffer {
    /// Byte storage. Atomic bytes let the producer overwrite evicted data
    /// while the consumer may still be copying it.
    storage: Box<[AtomicU8]>,
    /// Total bytes consumed or evicted.
    read_pos: AtomicU64,
    /// Total bytes committed by the producer.
    write_pos: AtomicU64,
    discard_oldest: AtomicBool,
    anticipates_underflow: AtomicBool,
}

fn allocate(length: usize) -> Box<[AtomicU8]> {
    (0..length).map(|_| AtomicU8::new(0)).collect()
}

impl AudioRingBuffer {
    /// Create an empty buffer of `length` bytes.
    ///
    /// Starts with [`DiscardPolicy::Newest`] and underflow anticipation off.
    pub fn new(length: usize) -> Self {
        Self {
            storage: allocate(length),
            read_pos: AtomicU64::new(0),
            write_pos: AtomicU64::new(0),
            discard_oldest: AtomicBool::new(false),
            anticipates_underflow: AtomicBool::new(false),
        }
    }

    /// Create an empty buffer with the given policies.
    pub fn with_policy(
        length: usize,
        discard_policy: DiscardPolicy,
        anticipates_underflow: bool,
    ) -> Self {
        let buffer = Self::new(length);
        buffer.set_discard_policy(discard_policy);
        buffer.set_anticipates_underflow(anticipates_underflow);
        buffer
    }

    /// Buffer capacity in bytes.
    pub fn length(&self) -> usize {
        self.storage.len()
    }

    /// Change the capacity. Queued bytes and the write total are dropped.
    ///
    /// Takes `&mut self`: resizing cannot overlap a read or a write.
    pub fn set_length(&mut self, length: usize) {
        self.storage = allocate(length);
        *self.read_pos.get_mut() = 0;
        *self.write_pos.get_mut() = 0;
        debug!(length, "ring buffer resized");
    }

    /// Bytes written but not yet read.
    pub fn available_bytes(&self) -> usize {
        let read = self.read_pos.load(Ordering::Acquire);
        let write = self.write_pos.load(Ordering::Acquire);
        // An eviction between the two loads can make the raw difference
        // overshoot; the buffer is full in that case.
        write.wrapping_sub(read).min(self.length() as u64) as usize
    }

    /// Bytes that can be written without discarding anything.
    pub fn free_bytes(&self) -> usize {
        self.length() - self.available_bytes()
    }

    /// Total bytes accepted since construction or the last resize.
    pub fn bytes_written(&self) -> u64 {
        self.write_pos.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.available_bytes() == 0
    }

    pub fn is_full(&self) -> bool {
        self.free_bytes() == 0
    }

    pub fn discard_policy(&self) -> DiscardPolicy {
        if self.discard_oldest.load(Ordering::Relaxed) {
            DiscardPolicy::Oldest
        } else {
            DiscardPolicy::Newest
        }
    }

    pub fn set_discard_policy(&self, policy: DiscardPolicy) {
        self.discard_oldest
            .store(policy == DiscardPolicy::Oldest, Ordering::Relaxed);
    }

    /// Whether reads are refused until twice the requested amount is queued.
    pub fn anticipates_underflow(&self) -> bool {
        self.anticipates_underflow.load(Ordering::Relaxed)
    }

    pub fn set_anticipates_underflow(&self, anticipates: bool) {
        self.anticipates_underflow
            .store(anticipates, Ordering::Relaxed);
    }

    /// Write bytes to the buffer.
    ///
    /// When `bytes` does not fit, [`DiscardPolicy::Newest`] writes only what
    /// fits, while [`DiscardPolicy::Oldest`] evicts queued bytes and keeps the
    /// last `min(len, capacity)` bytes of the input.
    ///
    /// Returns the number of bytes actually written.
    /// This method is designed to be called from the producer thread.
    pub fn write(&self, bytes: &[u8]) -> usize {
        let capacity = self.length();
        if capacity == 0 || bytes.is_empty() {
            return 0;
        }

        // Only the producer moves the write cursor.
        let write_pos = self.write_pos.load(Ordering::Relaxed);

        let bytes = if self.discard_oldest.load(Ordering::Relaxed) {
            let bytes = &bytes[bytes.len().saturating_sub(capacity)..];
            self.evict_for(write_pos, bytes.len());
            bytes
        } else {
            let read_pos = self.read_pos.load(Ordering::Acquire);
            let free = capacity - write_pos.wrapping_sub(read_pos) as usize;
            &bytes[..bytes.len().min(free)]
        };

        if bytes.is_empty() {
            return 0;
        }

        self.copy_in(write_pos, bytes);
        self.write_pos
            .store(write_pos + bytes.len() as u64, Ordering::Release);

        bytes.len()
    }

    /// Advance the read cursor until `incoming` bytes fit.
    ///
    /// Must happen before the overwrite so a consumer copying the evicted
    /// region fails its cursor exchange.
    fn evict_for(&self, write_pos: u64, incoming: usize) {
        let capacity = self.length() as u64;
        let mut read_pos = self.read_pos.load(Ordering::Acquire);

        loop {
            let free = capacity - write_pos.wrapping_sub(read_pos);
            let needed = (incoming as u64).saturating_sub(free);
            if needed == 0 {
                return;
            }

            match self.read_pos.compare_exchange_weak(
                read_pos,
                read_pos + needed,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(current) => read_pos = current,
            }
        }
    }

    /// Read bytes from the buffer into `output`.
    ///
    /// With underflow anticipation on, the read is refused (returns 0, buffer
    /// untouched) unless at least `2 * output.len()` bytes are queued.
    ///
    /// Returns the number of bytes actually read.
    /// This method is designed to be called from the consumer thread.
    pub fn read(&self, output: &mut [u8]) -> usize {
        let capacity = self.length() as u64;
        if capacity == 0 || output.is_empty() {
            return 0;
        }

        let mut read_pos = self.read_pos.load(Ordering::Acquire);

        loop {
            let write_pos = self.write_pos.load(Ordering::Acquire);
            let available = write_pos.wrapping_sub(read_pos);

            if available > capacity {
                // The producer evicted between our loads. Having seen its
                // write cursor, the reload observes the eviction.
                read_pos = self.read_pos.load(Ordering::Acquire);
                continue;
            }

            if self.anticipates_underflow.load(Ordering::Relaxed)
                && available < (output.len() as u64).saturating_mul(2)
            {
                return 0;
            }

            let to_read = output.len().min(available as usize);
            if to_read == 0 {
                return 0;
            }

            self.copy_out(read_pos, &mut output[..to_read]);

            // Publishing fails only if the producer evicted what we copied.
            match self.read_pos.compare_exchange(
                read_pos,
                read_pos + to_read as u64,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return to_read,
                Err(current) => read_pos = current,
            }
        }
    }

    /// Discard everything queued. Consumer side.
    pub fn clear(&self) {
        let write_pos = self.write_pos.load(Ordering::Acquire);
        let mut read_pos = self.read_pos.load(Ordering::Acquire);

        while read_pos < write_pos {
            match self.read_pos.compare_exchange_weak(
                read_pos,
                write_pos,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return,
                Err(current) => read_pos = current,
            }
        }
    }

    /// Create an accessor that reads from this buffer without owning it.
    pub fn read_block(self: &Arc<Self>) -> ReadBlock {
        ReadBlock::new(Arc::downgrade(self))
    }

    fn index(&self, position: u64) -> usize {
        (position % self.length() as u64) as usize
    }

    fn copy_in(&self, position: u64, bytes: &[u8]) {
        let start = self.index(position);
        let (head, tail) = bytes.split_at(bytes.len().min(self.length() - start));

        for (slot, &byte) in self.storage[start..].iter().zip(head) {
            slot.store(byte, Ordering::Relaxed);
        }
        // Wrap-around
        for (slot, &byte) in self.storage.iter().zip(tail) {
            slot.store(byte, Ordering::Relaxed);
        }
    }

    fn copy_out(&self, position: u64, output: &mut [u8]) {
        let start = self.index(position);
        let first_chunk = output.len().min(self.length() - start);
        let (head, tail) = output.split_at_mut(first_chunk);

        for (byte, slot) in head.iter_mut().zip(&self.storage[start..]) {
            *byte = slot.load(Ordering::Relaxed);
        }
        for (byte, slot) in tail.iter_mut().zip(self.storage.iter()) {
            *byte = slot.load(Ordering::Relaxed);
        }
    }
}

impl fmt::Debug for AudioRingBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AudioRingBuffer")
            .field("length", &self.length())
            .field("available_bytes", &self.available_bytes())
            .field("bytes_written", &self.bytes_written())
            .field("discard_policy", &self.discard_policy())
            .field("anticipates_underflow", &self.anticipates_underflow())
            .finish()
    }
}

/// Thread-safe reference to a ring buffer.
pub type SharedAudioRingBuffer = Arc<AudioRingBuffer>;

/// Create a new shared ring buffer.
pub fn shared_ring_buffer(length: usize) -> SharedAudioRingBuffer {
    Arc::new(AudioRingBuffer::new(length))
}

//! Playback clock driven by the output device.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Time as measured by the sound card.
///
/// The output callback advances it by every source frame it consumes,
/// silence included, so it runs at the device's real rate and stands still
/// while playback is stopped. An emulator paced by this clock never drifts
/// away from the audio it produces.
#[derive(Debug, Clone)]
pub struct AudioClock {
    frames: Arc<AtomicU64>,
    sample_rate: u32,
}

impl AudioClock {
    /// A clock at zero counting frames of `sample_rate`.
    pub fn new(sample_rate: u32) -> Self {
        Self {
            frames: Arc::new(AtomicU64::new(0)),
            sample_rate,
        }
    }

    pub(crate) fn advance(&self, frames: u64) {
        self.frames.fetch_add(frames, Ordering::Relaxed);
    }

    /// Source frames handed to the device so far.
    pub fn frames_played(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Audio time elapsed, in nanoseconds.
    #[allow(clippy::cast_possible_truncation)]
    pub fn time_ns(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (u128::from(self.frames_played()) * 1_000_000_000 / u128::from(self.sample_rate)) as u64
    }

    /// Audio time elapsed.
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.time_ns())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_zero() {
        let clock = AudioClock::new(41_667);
        assert_eq!(clock.frames_played(), 0);
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_advances_at_sample_rate() {
        let clock = AudioClock::new(41_667);
        clock.advance(41_667);
        assert_eq!(clock.elapsed(), Duration::from_secs(1));

        clock.advance(41_667 / 2);
        assert_eq!(clock.frames_played(), 62_500);
        assert_eq!(clock.time_ns(), 1_499_988_000);
    }

    #[test]
    fn test_clones_share_time() {
        let clock = AudioClock::new(48_000);
        let observer = clock.clone();
        clock.advance(480);
        assert_eq!(observer.elapsed(), Duration::from_millis(10));
    }

    #[test]
    fn test_zero_rate_reads_zero() {
        let clock = AudioClock::new(0);
        clock.advance(100);
        assert_eq!(clock.time_ns(), 0);
    }
}

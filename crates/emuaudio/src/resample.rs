//! Sample-rate conversion for the output callback.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use emuaudio_core::{Error, Result};
use tracing::debug;

/// Streaming linear-interpolation resampler for interleaved `i16` PCM.
///
/// The rate ratio is reduced to lowest terms, so the playhead is an exact
/// fraction and never drifts against the source clock. Nothing allocates
/// after construction, which keeps it usable inside a render callback.
pub struct Resampler {
    input_rate: u32,
    output_rate: u32,
    channels: usize,
    /// Playhead advance per output frame, in units of `1 / denominator`.
    step: u64,
    /// Playhead units per input frame.
    denominator: u64,
    /// Playhead between `current` and `next`.
    position: u64,
    current: Vec<i16>,
    next: Vec<i16>,
}

impl Resampler {
    /// Create a resampler from `input_rate` to `output_rate`.
    pub fn new(input_rate: u32, output_rate: u32, channels: usize) -> Result<Self> {
        if input_rate == 0 || output_rate == 0 || channels == 0 {
            return Err(Error::InvalidArgument(format!(
                "Cannot resample {input_rate}Hz -> {output_rate}Hz with {channels} channel(s)"
            )));
        }

        let divisor = gcd(input_rate, output_rate);
        let denominator = u64::from(output_rate / divisor);

        debug!(
            "Resampler created: {}Hz -> {}Hz, {} channels",
            input_rate, output_rate, channels
        );

        Ok(Self {
            input_rate,
            output_rate,
            channels,
            step: u64::from(input_rate / divisor),
            denominator,
            position: 2 * denominator,
            current: vec![0; channels],
            next: vec![0; channels],
        })
    }

    /// Check if resampling is needed.
    pub const fn needs_resampling(&self) -> bool {
        self.input_rate != self.output_rate
    }

    pub const fn input_rate(&self) -> u32 {
        self.input_rate
    }

    pub const fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub const fn channels(&self) -> usize {
        self.channels
    }

    /// Input frames the next `output_frames` frames of output will consume.
    #[allow(clippy::cast_possible_truncation)]
    pub const fn input_frames_for(&self, output_frames: usize) -> usize {
        if !self.needs_resampling() || output_frames == 0 {
            return output_frames;
        }
        ((self.position + (output_frames as u64 - 1) * self.step) / self.denominator) as usize
    }

    /// Upper bound of [`input_frames_for`] over every playhead position.
    ///
    /// [`input_frames_for`]: Self::input_frames_for
    #[allow(clippy::cast_possible_truncation)]
    pub const fn max_input_frames_for(&self, output_frames: usize) -> usize {
        if !self.needs_resampling() {
            return output_frames;
        }
        2 + (output_frames as u64 * self.step).div_ceil(self.denominator) as usize
    }

    /// Resample interleaved `input` into interleaved `output`.
    ///
    /// `input` should hold [`input_frames_for`] frames of `output`; frames
    /// past its end are read as silence. Returns the input frames consumed,
    /// silence included.
    ///
    /// [`input_frames_for`]: Self::input_frames_for
    pub fn process(&mut self, input: &[i16], output: &mut [i16]) -> usize {
        if !self.needs_resampling() {
            let copied = input.len().min(output.len());
            output[..copied].copy_from_slice(&input[..copied]);
            output[copied..].fill(0);
            return output.len() / self.channels;
        }

        let mut frames = input.chunks_exact(self.channels);
        let mut consumed = 0;

        for out_frame in output.chunks_exact_mut(self.channels) {
            while self.position >= self.denominator {
                self.position -= self.denominator;
                std::mem::swap(&mut self.current, &mut self.next);
                match frames.next() {
                    Some(frame) => self.next.copy_from_slice(frame),
                    None => self.next.fill(0),
                }
                consumed += 1;
            }

            for ((slot, &from), &to) in out_frame.iter_mut().zip(&self.current).zip(&self.next) {
                *slot = interpolate(from, to, self.position, self.denominator);
            }
            self.position += self.step;
        }

        consumed
    }
}

/// `from + (to - from) * num / denom`, with `num < denom`.
#[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
fn interpolate(from: i16, to: i16, num: u64, denom: u64) -> i16 {
    let num = num as i64;
    let denom = denom as i64;
    ((i64::from(from) * (denom - num) + i64::from(to) * num) / denom) as i16
}

const fn gcd(mut a: u32, mut b: u32) -> u32 {
    while b != 0 {
        let r = a % b;
        a = b;
        b = r;
    }
    a
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_rate_passes_through() {
        let mut resampler = Resampler::new(48_000, 48_000, 2).unwrap();
        assert!(!resampler.needs_resampling());
        assert_eq!(resampler.input_frames_for(3), 3);

        let mut output = [0i16; 6];
        let consumed = resampler.process(&[1, -1, 2, -2, 3, -3], &mut output);
        assert_eq!(consumed, 3);
        assert_eq!(output, [1, -1, 2, -2, 3, -3]);
    }

    #[test]
    fn test_upsampling_interpolates() {
        let mut resampler = Resampler::new(24_000, 48_000, 1).unwrap();
        assert_eq!(resampler.input_frames_for(6), 4);

        let mut output = [0i16; 6];
        let consumed = resampler.process(&[100, 200, 300, 400], &mut output);
        assert_eq!(consumed, 4);
        assert_eq!(output, [100, 150, 200, 250, 300, 350]);
    }

    #[test]
    fn test_downsampling_skips_frames() {
        let mut resampler = Resampler::new(48_000, 24_000, 1).unwrap();
        assert_eq!(resampler.input_frames_for(2), 4);

        let mut output = [0i16; 2];
        assert_eq!(resampler.process(&[10, 20, 30, 40], &mut output), 4);
        assert_eq!(output, [10, 30]);
    }

    #[test]
    fn test_channels_stay_separate() {
        let mut resampler = Resampler::new(24_000, 48_000, 2).unwrap();

        // Only two of the three frames needed; the last reads as silence.
        let mut output = [0i16; 6];
        let consumed = resampler.process(&[100, -100, 200, -200], &mut output);
        assert_eq!(consumed, 3);
        assert_eq!(output, [100, -100, 150, -150, 200, -200]);
    }

    #[test]
    fn test_consumes_source_rate_over_one_second() {
        let mut resampler = Resampler::new(41_667, 48_000, 2).unwrap();
        let mut output = vec![0i16; 480 * 2];
        let mut total = 0;

        for _ in 0..100 {
            let needed = resampler.input_frames_for(480);
            assert!(needed <= resampler.max_input_frames_for(480));
            let input = vec![0i16; needed * 2];
            assert_eq!(resampler.process(&input, &mut output), needed);
            total += needed;
        }

        // One second of output at 48kHz, plus the interpolation lookahead.
        assert_eq!(total, 41_667 + 1);
        assert_eq!(resampler.input_frames_for(16_000), 13_889);
    }

    #[test]
    fn test_rejects_zero_rate() {
        assert!(Resampler::new(0, 48_000, 2).is_err());
        assert!(Resampler::new(41_667, 48_000, 0).is_err());
    }

    #[test]
    fn test_interpolate_extremes() {
        assert_eq!(interpolate(i16::MIN, i16::MAX, 0, 4), i16::MIN);
        assert_eq!(interpolate(i16::MAX, i16::MAX, 3, 4), i16::MAX);
        assert_eq!(interpolate(-100, 100, 1, 2), 0);
    }
}

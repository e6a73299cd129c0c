//! # emuaudio-demo
//!
//! Feeds a square tone through the ring buffer at the pace an emulator
//! would, one video frame of audio at a time, staying a fixed distance
//! ahead of the sound card's clock.
//!
//! Usage: `emuaudio-demo [config.json] [seconds]`

use anyhow::{bail, Context, Result};
use emuaudio::output::{default_device_name, list_output_devices};
use emuaudio::{AudioConfig, AudioEngine, AudioFrame, EngineEvent};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Video refresh of the emulated console.
const FRAMES_PER_SECOND: u32 = 50;

const TONE_HZ: f64 = 440.0;
const TONE_AMPLITUDE: i16 = 4_000;
const DEFAULT_SECONDS: u64 = 5;

/// How long to wait for the sound card when ahead of it.
const CLOCK_POLL: Duration = Duration::from_millis(2);

/// Give up when the audio clock stops moving for this long.
const CLOCK_STALL_TIMEOUT: Duration = Duration::from_secs(2);

/// Band-unlimited square wave, good enough to hear the pipeline work.
struct SquareWave {
    phase: f64,
    step: f64,
}

impl SquareWave {
    fn new(frequency: f64, sample_rate: u32) -> Self {
        Self {
            phase: 0.0,
            step: frequency / f64::from(sample_rate),
        }
    }

    fn fill(&mut self, frames: &mut Vec<AudioFrame>, count: usize) {
        frames.clear();
        for _ in 0..count {
            let value = if self.phase < 0.5 {
                TONE_AMPLITUDE
            } else {
                -TONE_AMPLITUDE
            };
            frames.push((value, value));
            self.phase = (self.phase + self.step).fract();
        }
    }
}

fn parse_args() -> Result<(AudioConfig, u64)> {
    let mut config = AudioConfig::default();
    let mut seconds = DEFAULT_SECONDS;

    for arg in std::env::args().skip(1) {
        if let Ok(value) = arg.parse::<u64>() {
            seconds = value;
        } else {
            config = AudioConfig::load(&arg).with_context(|| format!("loading {arg}"))?;
        }
    }

    Ok((config, seconds))
}

fn handle_event(event: EngineEvent) -> Result<()> {
    match event {
        EngineEvent::Error(message) => bail!("audio output failed: {message}"),
        EngineEvent::Underrun { total } => warn!(total, "underrun"),
        EngineEvent::StateChanged(state) => info!(?state, "playback state changed"),
    }
    Ok(())
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "emuaudio=debug,emuaudio_demo=info".into()),
        )
        .init();

    info!("Starting emuaudio-demo v{}", env!("CARGO_PKG_VERSION"));

    let (config, seconds) = parse_args()?;
    debug!(?config, seconds, "Configuration loaded");

    match default_device_name() {
        Some(name) => info!(device = %name, "Default output device"),
        None => warn!("No default output device"),
    }
    if let Ok(devices) = list_output_devices() {
        debug!(?devices, "Output devices");
    }

    let engine = AudioEngine::new(config)?;
    let mut sink = engine.sink()?;
    let clock = engine.clock();
    engine.start()?;

    let sample_rate = config.format.sample_rate;
    let mut tone = SquareWave::new(TONE_HZ, sample_rate);
    let mut frames = Vec::new();

    // Keep about half the ring buffer queued ahead of the device.
    let lead = config.format.bytes_to_frames(config.buffer_length()) as u64 / 2;
    let total_video_frames = seconds * u64::from(FRAMES_PER_SECOND);
    let mut video_frame = 0u64;
    let mut samples_sent = 0u64;

    let mut last_played = clock.frames_played();
    let mut last_progress = Instant::now();

    while video_frame < total_video_frames {
        let played = clock.frames_played();
        if played != last_played {
            last_played = played;
            last_progress = Instant::now();
        }

        if samples_sent >= played + lead {
            // Ahead of the sound card: wait for it
            if let Some(event) = engine.recv_event_timeout(CLOCK_POLL) {
                handle_event(event)?;
            }
            if last_progress.elapsed() > CLOCK_STALL_TIMEOUT {
                bail!("audio clock stalled at {:?}", clock.elapsed());
            }
            continue;
        }

        video_frame += 1;

        // Carry the fractional remainder so the long-run rate is exact.
        let due = video_frame * u64::from(sample_rate) / u64::from(FRAMES_PER_SECOND);
        let count = usize::try_from(due - samples_sent)?;
        samples_sent = due;

        tone.fill(&mut frames, count);
        sink.push_frames(&frames);

        while let Some(event) = engine.try_recv_event() {
            handle_event(event)?;
        }

        if video_frame % u64::from(FRAMES_PER_SECOND) == 0 {
            let written =
                engine.ring_buffer().bytes_written() / config.format.bytes_per_frame() as u64;
            info!(
                fill = %format!("{:.0}%", engine.buffer_fill() * 100.0),
                dropped = sink.frames_dropped(),
                clock = ?clock.elapsed(),
                lead = written.saturating_sub(clock.frames_played()),
                "second {}",
                video_frame / u64::from(FRAMES_PER_SECOND)
            );
        }
    }

    engine.stop()?;
    info!("Done");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_square_wave_alternates() {
        // Four samples per period: two high, two low.
        let mut tone = SquareWave::new(1.0, 4);
        let mut frames = Vec::new();
        tone.fill(&mut frames, 8);

        let left: Vec<i16> = frames.iter().map(|&(l, _)| l).collect();
        let high = TONE_AMPLITUDE;
        let low = -TONE_AMPLITUDE;
        assert_eq!(left, vec![high, high, low, low, high, high, low, low]);
    }
}

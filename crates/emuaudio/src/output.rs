//! Audio output using cpal.
//!
//! The device callback drains the ring buffer through a [`ReadBlock`],
//! converts the stream to the device rate and pads any shortfall with
//! silence.

use crate::buffer::ReadBlock;
use crate::clock::AudioClock;
use crate::resample::Resampler;
use cpal::{
    traits::{DeviceTrait, HostTrait, StreamTrait},
    BufferSize, Device, FromSample, SampleFormat, SampleRate, SizedSample, Stream,
    StreamConfig, SupportedBufferSize, SupportedStreamConfig, SupportedStreamConfigRange,
};
use emuaudio_core::{Error, Result, StreamFormat};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// PCM in the ring buffer is little-endian `i16`.
const SAMPLE_BYTES: usize = 2;

/// Callback period requested from the device.
const PREFERRED_CALLBACK_DURATION: Duration = Duration::from_millis(5);

/// Render chunk used when the device does not report its buffer sizes.
const FALLBACK_CALLBACK_FRAMES: usize = 1024;

/// Configuration of an opened output stream.
#[derive(Debug, Clone, Copy)]
pub struct OutputConfig {
    pub sample_rate: u32,
    pub channels: u16,
    pub sample_format: SampleFormat,
    /// Fixed callback size, when the device accepted one.
    pub callback_frames: Option<u32>,
}

/// Audio output stream wrapper.
pub struct AudioOutput {
    _stream: Stream,
    config: OutputConfig,
    device_name: String,
    underruns: Arc<AtomicU64>,
}

impl AudioOutput {
    /// Open the default output device and start draining `reader`.
    ///
    /// `clock` advances by every source frame the device consumes.
    pub fn new(reader: ReadBlock, format: StreamFormat, clock: AudioClock) -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::AudioOutput("No output device found".to_string()))?;

        Self::with_device(device, reader, format, clock)
    }

    /// Open a specific device and start draining `reader`.
    #[allow(clippy::needless_pass_by_value)] // Device is typically moved
    pub fn with_device(
        device: Device,
        reader: ReadBlock,
        format: StreamFormat,
        clock: AudioClock,
    ) -> Result<Self> {
        format.validate()?;

        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Using audio output device: {device_name}");

        let supported = select_config(&device, format)?;
        let sample_format = supported.sample_format();
        let callback_frames = callback_frames(supported.buffer_size(), supported.sample_rate().0);
        let mut config: StreamConfig = supported.into();
        config.buffer_size = callback_frames.map_or(BufferSize::Default, BufferSize::Fixed);

        let resampler = Resampler::new(
            format.sample_rate,
            config.sample_rate.0,
            usize::from(config.channels),
        )?;
        if resampler.needs_resampling() {
            info!(
                from = resampler.input_rate(),
                to = resampler.output_rate(),
                "Resampling to the device rate"
            );
        }

        let render_frames = callback_frames.map_or(FALLBACK_CALLBACK_FRAMES, |f| f as usize);
        let callback_bytes = format.frames_to_bytes(resampler.max_input_frames_for(render_frames));
        let ring_length = reader.buffer_length();
        if !has_read_headroom(callback_bytes, ring_length) {
            warn!(
                callback_bytes,
                ring_length,
                "Ring buffer holds less than two callbacks, anticipated reads will starve"
            );
        }

        let output_config = OutputConfig {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
            sample_format,
            callback_frames,
        };

        debug!("Output config: {:?}", output_config);

        let underruns = Arc::new(AtomicU64::new(0));
        let renderer = Renderer::new(
            reader,
            resampler,
            render_frames,
            Arc::clone(&underruns),
            clock,
        );

        let stream = match sample_format {
            SampleFormat::F32 => Self::build_stream::<f32>(&device, &config, renderer)?,
            SampleFormat::I16 => Self::build_stream::<i16>(&device, &config, renderer)?,
            SampleFormat::U16 => Self::build_stream::<u16>(&device, &config, renderer)?,
            _ => {
                return Err(Error::UnsupportedFormat(format!(
                    "Unsupported sample format: {sample_format:?}"
                )));
            }
        };

        stream
            .play()
            .map_err(|e| Error::AudioOutput(format!("Failed to start stream: {e}")))?;

        Ok(Self {
            _stream: stream,
            config: output_config,
            device_name,
            underruns,
        })
    }

    fn build_stream<T: SizedSample + FromSample<i16>>(
        device: &Device,
        config: &StreamConfig,
        mut renderer: Renderer,
    ) -> Result<Stream> {
        let err_fn = |err| {
            error!("Audio stream error: {err}");
        };

        let chunk_samples = renderer.chunk_samples();

        let stream = device
            .build_output_stream(
                config,
                move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                    // Hosts may ignore the fixed size; never grow buffers here.
                    for chunk in data.chunks_mut(chunk_samples) {
                        renderer.render(chunk);
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| Error::AudioOutput(format!("Failed to build stream: {e}")))?;

        Ok(stream)
    }

    /// Get the output configuration.
    pub const fn config(&self) -> &OutputConfig {
        &self.config
    }

    /// Get the device name.
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub const fn sample_rate(&self) -> u32 {
        self.config.sample_rate
    }

    pub const fn channels(&self) -> u16 {
        self.config.channels
    }

    /// Callbacks that could not be filled completely.
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }
}

/// Callback-side state: pulls source audio and renders device samples.
///
/// Every buffer is sized at construction for `chunk_frames` of output.
struct Renderer {
    reader: ReadBlock,
    resampler: Resampler,
    channels: usize,
    chunk_frames: usize,
    bytes: Vec<u8>,
    input: Vec<i16>,
    output: Vec<i16>,
    underruns: Arc<AtomicU64>,
    clock: AudioClock,
}

impl Renderer {
    fn new(
        reader: ReadBlock,
        resampler: Resampler,
        chunk_frames: usize,
        underruns: Arc<AtomicU64>,
        clock: AudioClock,
    ) -> Self {
        let channels = resampler.channels();
        let chunk_frames = chunk_frames.max(1);
        let input_samples = resampler.max_input_frames_for(chunk_frames) * channels;

        Self {
            reader,
            resampler,
            channels,
            chunk_frames,
            bytes: vec![0; input_samples * SAMPLE_BYTES],
            input: vec![0; input_samples],
            output: vec![0; chunk_frames * channels],
            underruns,
            clock,
        }
    }

    const fn chunk_samples(&self) -> usize {
        self.chunk_frames * self.channels
    }

    /// Fill `data`, at most [`chunk_samples`] long.
    ///
    /// [`chunk_samples`]: Self::chunk_samples
    fn render<T: SizedSample + FromSample<i16>>(&mut self, data: &mut [T]) {
        let frames = data.len() / self.channels;
        let needed = self.resampler.input_frames_for(frames);
        let samples = needed * self.channels;
        let requested = samples * SAMPLE_BYTES;

        let read = self.reader.read(&mut self.bytes[..requested]);

        // Short read: the rest plays as silence
        self.bytes[read..requested].fill(0);

        for (sample, bytes) in self.input[..samples]
            .iter_mut()
            .zip(self.bytes[..requested].chunks_exact(SAMPLE_BYTES))
        {
            *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
        }

        let output = &mut self.output[..data.len()];
        let consumed = self.resampler.process(&self.input[..samples], output);

        for (slot, &sample) in data.iter_mut().zip(output.iter()) {
            *slot = T::from_sample(sample);
        }

        self.clock.advance(consumed as u64);
        if read < requested {
            self.underruns.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Callback size closest to [`PREFERRED_CALLBACK_DURATION`] that the device
/// supports, or `None` when it does not say.
#[allow(clippy::cast_possible_truncation)]
fn callback_frames(buffer_size: &SupportedBufferSize, sample_rate: u32) -> Option<u32> {
    let preferred = (u128::from(sample_rate) * PREFERRED_CALLBACK_DURATION.as_micros()
        / 1_000_000) as u32;

    match *buffer_size {
        SupportedBufferSize::Range { min, max } => Some(preferred.max(min).min(max)),
        SupportedBufferSize::Unknown => None,
    }
}

/// Whether a ring of `ring_length` bytes can satisfy an anticipated read of
/// `callback_bytes`.
const fn has_read_headroom(callback_bytes: usize, ring_length: usize) -> bool {
    callback_bytes.saturating_mul(2) <= ring_length
}

/// Pick the device configuration closest to `format`.
///
/// The channel count must match exactly. Among those, a range containing the
/// stream rate wins; otherwise the range with the nearest edge is used.
fn select_config(device: &Device, format: StreamFormat) -> Result<SupportedStreamConfig> {
    let ranges: Vec<SupportedStreamConfigRange> = device
        .supported_output_configs()
        .map_err(|e| Error::AudioOutput(format!("Failed to query output configs: {e}")))?
        .filter(|range| range.channels() == format.channels)
        .filter(|range| {
            matches!(
                range.sample_format(),
                SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16
            )
        })
        .collect();

    let best = ranges
        .into_iter()
        .min_by_key(|range| {
            rate_distance(
                range.min_sample_rate().0,
                range.max_sample_rate().0,
                format.sample_rate,
            )
        })
        .ok_or_else(|| {
            Error::UnsupportedFormat(format!(
                "No {}-channel output configuration",
                format.channels
            ))
        })?;

    let rate = nearest_rate(
        best.min_sample_rate().0,
        best.max_sample_rate().0,
        format.sample_rate,
    );
    Ok(best.with_sample_rate(SampleRate(rate)))
}

/// Closest rate to `wanted` within `[min, max]`.
const fn nearest_rate(min: u32, max: u32, wanted: u32) -> u32 {
    if wanted < min {
        min
    } else if wanted > max {
        max
    } else {
        wanted
    }
}

fn rate_distance(min: u32, max: u32, wanted: u32) -> u32 {
    nearest_rate(min, max, wanted).abs_diff(wanted)
}

/// List available output devices.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();

    let devices: Vec<String> = host
        .output_devices()
        .map_err(|e| Error::AudioOutput(format!("Failed to list devices: {e}")))?
        .filter_map(|d| d.name().ok())
        .collect();

    Ok(devices)
}

/// Get the default output device name.
pub fn default_device_name() -> Option<String> {
    let host = cpal::default_host();
    host.default_output_device().and_then(|d| d.name().ok())
}

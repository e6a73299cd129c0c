//! Audio engine coordinating the ring buffer and the output stream.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use crate::buffer::{AudioRingBuffer, ReadBlock, SharedAudioRingBuffer};
use crate::clock::AudioClock;
use crate::output::AudioOutput;
use crate::sink::FrameSink;
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use emuaudio_core::{AudioConfig, DiscardPolicy, Error, Result, StreamFormat, MAX_LATENCY_MS};
use parking_lot::RwLock;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often the worker wakes to report underruns.
const WORKER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// How long `stop` waits for the worker to release the output.
const STOP_ACK_TIMEOUT: Duration = Duration::from_secs(1);

/// Playback state of the audio engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
}

/// Events emitted by the audio engine.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    /// Playback state changed.
    StateChanged(PlaybackState),
    /// The output callback ran short of audio. `total` counts every
    /// short callback since the output was opened.
    Underrun { total: u64 },
    /// Error occurred.
    Error(String),
}

/// Commands sent to the worker thread.
enum EngineCommand {
    /// Open the output and drain the given reader.
    Start(ReadBlock),
    /// Close the output, then acknowledge.
    Stop(Sender<()>),
    Shutdown,
}

/// Owns the ring buffer and a worker thread holding the output stream.
///
/// `cpal::Stream` is not `Send`, so the stream lives on the worker and is
/// driven by commands. The producer side is handed out as [`FrameSink`]s.
pub struct AudioEngine {
    config: AudioConfig,
    state: Arc<RwLock<PlaybackState>>,
    ring_buffer: SharedAudioRingBuffer,
    clock: AudioClock,
    command_tx: Sender<EngineCommand>,
    event_rx: Receiver<EngineEvent>,
    worker: Option<JoinHandle<()>>,
}

impl AudioEngine {
    /// Create an engine. The output device is not opened until [`start`].
    ///
    /// [`start`]: Self::start
    pub fn new(config: AudioConfig) -> Result<Self> {
        config.validate()?;

        let ring_buffer = Arc::new(AudioRingBuffer::with_policy(
            config.buffer_length(),
            config.buffer.discard_policy,
            config.buffer.anticipates_underflow,
        ));

        let (command_tx, command_rx) = unbounded();
        let (event_tx, event_rx) = unbounded();
        let state = Arc::new(RwLock::new(PlaybackState::Stopped));
        let clock = AudioClock::new(config.format.sample_rate);

        // The worker holds a `!Send` cpal stream, so it is built on the
        // output thread itself.
        let worker_state = Arc::clone(&state);
        let worker_format = config.format;
        let worker_clock = clock.clone();

        let handle = std::thread::Builder::new()
            .name("audio-output".to_string())
            .spawn(move || {
                let worker = EngineWorker {
                    command_rx,
                    event_tx,
                    state: worker_state,
                    format: worker_format,
                    clock: worker_clock,
                    output: None,
                    reported_underruns: 0,
                };
                worker.run();
            })
            .map_err(|e| Error::AudioOutput(format!("Failed to spawn output thread: {e}")))?;

        info!(
            length = ring_buffer.length(),
            policy = ?config.buffer.discard_policy,
            anticipates_underflow = config.buffer.anticipates_underflow,
            "Audio engine created"
        );

        Ok(Self {
            config,
            state,
            ring_buffer,
            clock,
            command_tx,
            event_rx,
            worker: Some(handle),
        })
    }

    pub const fn config(&self) -> &AudioConfig {
        &self.config
    }

    pub const fn format(&self) -> StreamFormat {
        self.config.format
    }

    /// Get the current playback state.
    pub fn state(&self) -> PlaybackState {
        *self.state.read()
    }

    pub const fn ring_buffer(&self) -> &SharedAudioRingBuffer {
        &self.ring_buffer
    }

    /// Playback time as counted by the output device.
    ///
    /// Pace emulation by this clock to stay locked to the sound card.
    pub fn clock(&self) -> AudioClock {
        self.clock.clone()
    }

    /// Get the ring buffer fill level (0.0 to 1.0).
    #[allow(clippy::cast_precision_loss)]
    pub fn buffer_fill(&self) -> f32 {
        let length = self.ring_buffer.length();
        if length == 0 {
            return 0.0;
        }
        self.ring_buffer.available_bytes() as f32 / length as f32
    }

    /// Create a producer for stereo frames.
    ///
    /// Drop every sink before calling [`set_buffer_length`].
    ///
    /// [`set_buffer_length`]: Self::set_buffer_length
    pub fn sink(&self) -> Result<FrameSink> {
        if self.config.format.channels != 2 {
            return Err(Error::UnsupportedFormat(format!(
                "Frame sink needs stereo, stream has {} channel(s)",
                self.config.format.channels
            )));
        }
        Ok(FrameSink::new(Arc::clone(&self.ring_buffer)))
    }

    pub fn set_discard_policy(&mut self, policy: DiscardPolicy) {
        self.ring_buffer.set_discard_policy(policy);
        self.config.buffer.discard_policy = policy;
    }

    pub fn set_anticipates_underflow(&mut self, anticipates: bool) {
        self.ring_buffer.set_anticipates_underflow(anticipates);
        self.config.buffer.anticipates_underflow = anticipates;
    }

    /// Resize the ring buffer, dropping its contents.
    ///
    /// Only allowed while stopped and with no sink or reader outstanding.
    /// `length` must be a non-zero whole number of frames.
    pub fn set_buffer_length(&mut self, length: usize) -> Result<()> {
        let format = self.config.format;
        if length == 0 || format.align_to_frame(length) != length {
            return Err(Error::InvalidArgument(format!(
                "Buffer length {length} is not a non-zero multiple of the {}-byte frame",
                format.bytes_per_frame()
            )));
        }

        if self.state() == PlaybackState::Playing {
            return Err(Error::InvalidState(
                "Cannot resize the ring buffer while playing".into(),
            ));
        }

        let handles =
            Arc::strong_count(&self.ring_buffer) + Arc::weak_count(&self.ring_buffer) - 1;
        let ring_buffer =
            Arc::get_mut(&mut self.ring_buffer).ok_or(Error::BufferInUse { handles })?;

        ring_buffer.set_length(length);
        info!(length, "Ring buffer resized");
        Ok(())
    }

    /// Resize the ring buffer to hold `latency` of audio.
    pub fn set_latency(&mut self, latency: Duration) -> Result<()> {
        let latency_ms = u32::try_from(latency.as_millis())
            .ok()
            .filter(|&ms| ms <= MAX_LATENCY_MS)
            .ok_or_else(|| Error::InvalidArgument(format!("Latency too large: {latency:?}")))?;
        self.set_buffer_length(self.config.format.buffer_length(latency))?;
        self.config.buffer.latency_ms = latency_ms;
        Ok(())
    }

    /// Open the output device and start playback.
    ///
    /// Failures to open the device arrive as [`EngineEvent::Error`].
    pub fn start(&self) -> Result<()> {
        self.send_command(EngineCommand::Start(self.ring_buffer.read_block()))
    }

    /// Stop playback and close the output device.
    ///
    /// Returns once the worker has released the stream.
    pub fn stop(&self) -> Result<()> {
        let (ack_tx, ack_rx) = bounded(1);
        self.send_command(EngineCommand::Stop(ack_tx))?;
        ack_rx
            .recv_timeout(STOP_ACK_TIMEOUT)
            .map_err(|e| Error::Internal(format!("Output thread did not stop: {e}")))
    }

    /// Discard queued audio, e.g. after a savestate load.
    pub fn flush(&self) {
        self.ring_buffer.clear();
    }

    fn send_command(&self, command: EngineCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .map_err(|_| Error::AudioOutput("Output thread has exited".to_string()))
    }

    /// Try to receive an event without blocking.
    pub fn try_recv_event(&self) -> Option<EngineEvent> {
        self.event_rx.try_recv().ok()
    }

    /// Receive an event, waiting at most `timeout`.
    pub fn recv_event_timeout(&self, timeout: Duration) -> Option<EngineEvent> {
        self.event_rx.recv_timeout(timeout).ok()
    }

    /// Shut the worker down and wait for it.
    pub fn shutdown(&mut self) {
        let _ = self.command_tx.send(EngineCommand::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("Audio output thread panicked");
            }
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Internal worker that owns the output stream.
struct EngineWorker {
    command_rx: Receiver<EngineCommand>,
    event_tx: Sender<EngineEvent>,
    state: Arc<RwLock<PlaybackState>>,
    format: StreamFormat,
    clock: AudioClock,
    output: Option<AudioOutput>,
    /// Underrun total already reported for the current output.
    reported_underruns: u64,
}

impl EngineWorker {
    fn run(mut self) {
        debug!("Audio output worker started");

        loop {
            match self.command_rx.recv_timeout(WORKER_POLL_INTERVAL) {
                Ok(EngineCommand::Shutdown) => break,
                Ok(command) => self.handle_command(command),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    debug!("Command channel closed, shutting down");
                    break;
                }
            }

            self.report_underruns();
        }

        self.output = None;
        self.set_state(PlaybackState::Stopped);
        info!("Audio output worker stopped");
    }

    fn handle_command(&mut self, command: EngineCommand) {
        match command {
            EngineCommand::Start(reader) => {
                if self.output.is_some() {
                    debug!("Start ignored, already playing");
                    return;
                }

                match AudioOutput::new(reader, self.format, self.clock.clone()) {
                    Ok(output) => {
                        info!(
                            "Audio output started: {} Hz, {} channels, device: {}",
                            output.sample_rate(),
                            output.channels(),
                            output.device_name()
                        );
                        self.output = Some(output);
                        self.reported_underruns = 0;
                        self.set_state(PlaybackState::Playing);
                    }
                    Err(e) => {
                        error!("Failed to start audio output: {e}");
                        let _ = self.event_tx.send(EngineEvent::Error(e.to_string()));
                    }
                }
            }
            EngineCommand::Stop(ack) => {
                // Dropping the stream releases its reader.
                if self.output.take().is_some() {
                    info!("Audio output stopped");
                }
                self.set_state(PlaybackState::Stopped);
                let _ = ack.send(());
            }
            EngineCommand::Shutdown => {}
        }
    }

    fn report_underruns(&mut self) {
        let Some(output) = &self.output else {
            return;
        };

        let total = output.underruns();
        if total > self.reported_underruns {
            warn!(
                new = total - self.reported_underruns,
                total, "Audio output underrun"
            );
            self.reported_underruns = total;
            let _ = self.event_tx.send(EngineEvent::Underrun { total });
        }
    }

    fn set_state(&self, new_state: PlaybackState) {
        let changed = {
            let mut state = self.state.write();
            let changed = *state != new_state;
            *state = new_state;
            changed
        };
        if changed {
            let _ = self.event_tx.send(EngineEvent::StateChanged(new_state));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emuaudio_core::BufferConfig;

    #[test]
    fn test_new_applies_config() {
        let engine = AudioEngine::new(AudioConfig::default()).unwrap();

        let ring = engine.ring_buffer();
        assert_eq!(ring.length(), 16_668);
        assert_eq!(ring.discard_policy(), DiscardPolicy::Oldest);
        assert!(ring.anticipates_underflow());
        assert_eq!(engine.state(), PlaybackState::Stopped);
        assert!(engine.buffer_fill().abs() < f32::EPSILON);

        let clock = engine.clock();
        assert_eq!(clock.sample_rate(), 41_667);
        assert_eq!(clock.frames_played(), 0);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = AudioConfig {
            buffer: BufferConfig {
                latency_ms: 0,
                ..BufferConfig::default()
            },
            ..AudioConfig::default()
        };
        assert!(AudioEngine::new(config).is_err());
    }

    #[test]
    fn test_sink_feeds_ring_buffer() {
        let engine = AudioEngine::new(AudioConfig::default()).unwrap();
        let mut sink = engine.sink().unwrap();

        let frames = vec![(100i16, -100i16); 4167];
        assert_eq!(sink.push_frames(&frames), 4167);
        assert!((engine.buffer_fill() - 1.0).abs() < f32::EPSILON);

        engine.flush();
        assert!(engine.ring_buffer().is_empty());
    }

    #[test]
    fn test_sink_requires_stereo() {
        let config = AudioConfig {
            format: StreamFormat::new(41_667, 1, 2),
            ..AudioConfig::default()
        };
        let engine = AudioEngine::new(config).unwrap();
        assert!(matches!(engine.sink(), Err(Error::UnsupportedFormat(_))));
    }

    #[test]
    fn test_resize_requires_exclusive_buffer() {
        let mut engine = AudioEngine::new(AudioConfig::default()).unwrap();
        let sink = engine.sink().unwrap();

        let err = engine.set_buffer_length(4000).unwrap_err();
        assert!(matches!(err, Error::BufferInUse { handles: 1 }));

        drop(sink);
        engine.set_buffer_length(4000).unwrap();
        assert_eq!(engine.ring_buffer().length(), 4000);
        // Policies survive the resize.
        assert_eq!(engine.ring_buffer().discard_policy(), DiscardPolicy::Oldest);
    }

    #[test]
    fn test_resize_rejects_partial_frames() {
        let mut engine = AudioEngine::new(AudioConfig::default()).unwrap();

        for length in [0, 10, 4001] {
            let err = engine.set_buffer_length(length).unwrap_err();
            assert!(matches!(err, Error::InvalidArgument(_)), "{length}");
        }
        assert_eq!(engine.ring_buffer().length(), 16_668);

        // A whole-frame resize keeps left and right in place under eviction.
        engine.set_buffer_length(8).unwrap();
        let mut sink = engine.sink().unwrap();
        assert_eq!(sink.push_frames(&[(1, -1), (2, -2), (3, -3)]), 2);

        let mut bytes = [0u8; 8];
        assert_eq!(engine.ring_buffer().read(&mut bytes), 0);
        engine.ring_buffer().set_anticipates_underflow(false);
        assert_eq!(engine.ring_buffer().read(&mut bytes), 8);
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![2, -2, 3, -3]);
    }

    #[test]
    fn test_set_latency() {
        let mut engine = AudioEngine::new(AudioConfig::default()).unwrap();
        engine.set_latency(Duration::from_millis(50)).unwrap();

        assert_eq!(engine.config().buffer.latency_ms, 50);
        assert_eq!(engine.ring_buffer().length(), 2083 * 4);

        let err = engine.set_latency(Duration::from_secs(3600)).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
        assert_eq!(engine.config().buffer.latency_ms, 50);
    }

    #[test]
    fn test_policy_setters() {
        let mut engine = AudioEngine::new(AudioConfig::default()).unwrap();
        engine.set_discard_policy(DiscardPolicy::Newest);
        engine.set_anticipates_underflow(false);

        assert_eq!(engine.ring_buffer().discard_policy(), DiscardPolicy::Newest);
        assert!(!engine.ring_buffer().anticipates_underflow());
        assert_eq!(engine.config().buffer.discard_policy, DiscardPolicy::Newest);
    }

    #[test]
    fn test_stop_when_stopped_is_acknowledged() {
        let engine = AudioEngine::new(AudioConfig::default()).unwrap();
        engine.stop().unwrap();
        assert_eq!(engine.state(), PlaybackState::Stopped);
        // Already stopped, so no state change event.
        assert!(engine.try_recv_event().is_none());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut engine = AudioEngine::new(AudioConfig::default()).unwrap();
        engine.shutdown();
        engine.shutdown();
        assert!(engine.stop().is_err());
    }
}

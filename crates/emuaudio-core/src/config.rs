//! Playback configuration.

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use crate::{Error, Result, StreamFormat};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Upper bound on buffered audio. Larger buffers are useless for playback and
/// risk an allocation failure.
pub const MAX_LATENCY_MS: u32 = 5_000;

/// What a ring buffer does when a write does not fit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiscardPolicy {
    /// Truncate the incoming write, keeping what is already queued.
    #[default]
    Newest,
    /// Evict the oldest queued bytes to make room for the incoming write.
    Oldest,
}

/// Ring buffer sizing and policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BufferConfig {
    /// Audio held by the buffer, in milliseconds.
    pub latency_ms: u32,
    pub discard_policy: DiscardPolicy,
    /// Refuse reads until twice the requested amount is queued.
    pub anticipates_underflow: bool,
}

impl Default for BufferConfig {
    /// Emulator playback: 100ms, newest audio wins, wait for headroom.
    fn default() -> Self {
        Self {
            latency_ms: 100,
            discard_policy: DiscardPolicy::Oldest,
            anticipates_underflow: true,
        }
    }
}

impl BufferConfig {
    pub const fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms as u64)
    }
}

/// Complete configuration for an audio engine.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AudioConfig {
    pub format: StreamFormat,
    pub buffer: BufferConfig,
}

impl AudioConfig {
    /// Parse a configuration from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<()> {
        self.format.validate()?;
        if self.buffer.latency_ms == 0 {
            return Err(Error::Config("buffer latency must be non-zero".into()));
        }
        if self.buffer.latency_ms > MAX_LATENCY_MS {
            return Err(Error::Config(format!(
                "buffer latency {}ms exceeds the {MAX_LATENCY_MS}ms maximum",
                self.buffer.latency_ms
            )));
        }
        if self.buffer_length() == 0 {
            return Err(Error::Config(format!(
                "{}ms holds no whole frame at {}Hz",
                self.buffer.latency_ms, self.format.sample_rate
            )));
        }
        Ok(())
    }

    /// Ring buffer capacity in bytes, frame-aligned.
    pub fn buffer_length(&self) -> usize {
        self.format.buffer_length(self.buffer.latency())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AudioConfig::default();
        assert_eq!(config.format, StreamFormat::VIRTUAL_BOY);
        assert_eq!(config.buffer.discard_policy, DiscardPolicy::Oldest);
        assert!(config.buffer.anticipates_underflow);
        assert_eq!(config.buffer_length(), 16_668);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_discard_policy_default_is_newest() {
        assert_eq!(DiscardPolicy::default(), DiscardPolicy::Newest);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = AudioConfig::from_json_str(
            r#"{ "buffer": { "latency_ms": 50, "discard_policy": "newest" } }"#,
        )
        .unwrap();

        assert_eq!(config.format, StreamFormat::VIRTUAL_BOY);
        assert_eq!(config.buffer.latency_ms, 50);
        assert_eq!(config.buffer.discard_policy, DiscardPolicy::Newest);
        assert!(config.buffer.anticipates_underflow);
    }

    #[test]
    fn test_rejects_zero_latency() {
        let err = AudioConfig::from_json_str(r#"{ "buffer": { "latency_ms": 0 } }"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_rejects_excessive_latency() {
        let err = AudioConfig::from_json_str(r#"{ "buffer": { "latency_ms": 4000000000 } }"#)
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let at_limit = format!(r#"{{ "buffer": {{ "latency_ms": {MAX_LATENCY_MS} }} }}"#);
        let config = AudioConfig::from_json_str(&at_limit).unwrap();
        assert_eq!(config.buffer_length(), 208_335 * 4);
    }

    #[test]
    fn test_rejects_unknown_policy() {
        let err =
            AudioConfig::from_json_str(r#"{ "buffer": { "discard_policy": "middle" } }"#)
                .unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let err = AudioConfig::load("/nonexistent/emuaudio.json").unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_serialize_policy_snake_case() {
        let json = serde_json::to_string(&DiscardPolicy::Oldest).unwrap();
        assert_eq!(json, "\"oldest\"");
    }
}

//! Error types for emuaudio.
//!
//! The ring buffer itself never fails; these errors cover the surfaces
//! around it (device setup, configuration, engine lifecycle).

#![allow(clippy::unwrap_used)] // Tests use unwrap for brevity

use thiserror::Error;

/// Result type alias using emuaudio's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for emuaudio.
#[derive(Error, Debug)]
pub enum Error {
    // Device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    #[error("Unsupported audio format: {0}")]
    UnsupportedFormat(String),

    // Configuration errors
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Lifecycle errors
    #[error("Invalid engine state: {0}")]
    InvalidState(String),

    #[error("Ring buffer is still referenced by {handles} other handle(s)")]
    BufferInUse { handles: usize },

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns true if the error came from the audio device or host.
    pub const fn is_device_error(&self) -> bool {
        matches!(self, Self::AudioOutput(_) | Self::UnsupportedFormat(_))
    }

    /// Returns true if the error was caused by bad configuration input.
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::InvalidArgument(_) | Self::Json(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(Error::AudioOutput("no device".into()).is_device_error());
        assert!(Error::UnsupportedFormat("u8".into()).is_device_error());
        assert!(!Error::Config("bad".into()).is_device_error());

        assert!(Error::Config("bad".into()).is_config_error());
        assert!(Error::InvalidArgument("zero".into()).is_config_error());
        assert!(!Error::BufferInUse { handles: 1 }.is_config_error());
    }

    #[test]
    fn test_error_display() {
        let err = Error::BufferInUse { handles: 2 };
        assert_eq!(
            err.to_string(),
            "Ring buffer is still referenced by 2 other handle(s)"
        );

        let err = Error::AudioOutput("stream died".into());
        assert_eq!(err.to_string(), "Audio output error: stream died");
    }

    #[test]
    fn test_json_error_converts() {
        let json_err = serde_json::from_str::<u32>("not json").unwrap_err();
        let err: Error = json_err.into();
        assert!(err.is_config_error());
    }
}

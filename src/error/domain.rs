//! Domain-specific error types using `thiserror`.
//!
//! These surface at construction and configuration time. The streaming
//! path itself never returns errors; faults there are logged and
//! truncated so audio keeps flowing.

use std::result::Result as StdResult;

use {anyhow::Error, thiserror::Error};

use crate::config::settings::SettingsError;

/// Audio-related errors.
#[derive(Error, Debug)]
pub enum AudioError {
    /// A format failed validation.
    #[error("Invalid audio format: {reason}")]
    InvalidFormat { reason: String },
    /// A converter or asset was built over an empty sample buffer.
    #[error("Sound data is empty")]
    EmptySoundData,
    /// Settings error from the configuration module.
    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),
}

/// Operational error context propagation with `anyhow`.
///
/// Used for errors that need rich context but no specific handling logic.
pub type Result<T> = StdResult<T, Error>;

#[cfg(test)]
mod tests {
    use crate::error::domain::AudioError;

    #[test]
    fn test_audio_error_display() {
        let invalid = AudioError::InvalidFormat {
            reason: "channel count must be at least 1".to_string(),
        };
        assert_eq!(
            invalid.to_string(),
            "Invalid audio format: channel count must be at least 1"
        );

        assert_eq!(AudioError::EmptySoundData.to_string(), "Sound data is empty");
    }
}

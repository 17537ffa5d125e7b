//! Audio engine settings with JSON persistence.
//!
//! Settings are a plain serializable struct with sensible defaults; a
//! `SettingsManager` loads and saves them at a caller-supplied path so
//! the host engine can embed them in its own configuration directory.

use std::{
    fs::{create_dir_all, read_to_string, write},
    io::Error as StdError,
    path::PathBuf,
};

use {
    parking_lot::{RwLock, RwLockReadGuard},
    serde::{Deserialize, Serialize},
    serde_json::{Error as SerdeJsonError, from_str, to_string_pretty},
    thiserror::Error,
    tracing::debug,
};

use crate::{
    audio::{block::BlockPool, converter::ResampleQuality},
    error::operational::ResultExt,
};

/// Error type for settings operations.
#[derive(Error, Debug)]
pub enum SettingsError {
    /// Failed to read or write the settings file.
    #[error("IO error: {0}")]
    IoError(#[from] StdError),
    /// Failed to serialize or deserialize settings.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] SerdeJsonError),
    /// Invalid settings value.
    #[error("Invalid settings value: {reason}")]
    InvalidValue { reason: String },
}

/// Serializable audio engine settings with default values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Resampling quality applied process-wide.
    pub resample_quality: ResampleQuality,
    /// Blocks retained by the shared pool; also bounds each layer's
    /// ready queue.
    pub max_data_blocks: usize,
    /// Ceiling on how much time one update tick may buffer, in ms.
    pub max_update_ms: u32,
    /// Granularity at which volume envelopes are evaluated, in seconds.
    pub volume_interval_secs: f32,
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            resample_quality: ResampleQuality::Auto,
            max_data_blocks: BlockPool::DEFAULT_CAPACITY,
            max_update_ms: 50,
            volume_interval_secs: 0.05,
        }
    }
}

impl AudioSettings {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidValue` for out-of-range values.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.max_data_blocks == 0 {
            return Err(SettingsError::InvalidValue {
                reason: "max_data_blocks must be at least 1".to_string(),
            });
        }
        if self.volume_interval_secs <= 0.0 {
            return Err(SettingsError::InvalidValue {
                reason: "volume_interval_secs must be positive".to_string(),
            });
        }
        Ok(())
    }

    /// Pushes the resample quality into the process-wide setting.
    pub fn apply(&self) {
        crate::audio::converter::set_resample_quality(self.resample_quality);
    }
}

/// Handles loading, saving, and validation of audio settings.
#[derive(Debug)]
pub struct SettingsManager {
    /// Thread-safe settings storage.
    settings: RwLock<AudioSettings>,
    /// Path to the configuration file on disk.
    config_path: PathBuf,
}

impl SettingsManager {
    /// Creates a manager storing its file at `config_path`. Starts from
    /// defaults; call [`SettingsManager::load`] to read the file.
    #[must_use]
    pub fn new(config_path: PathBuf) -> Self {
        Self {
            settings: RwLock::new(AudioSettings::default()),
            config_path,
        }
    }

    /// Read access to the current settings.
    #[must_use]
    pub fn settings(&self) -> RwLockReadGuard<'_, AudioSettings> {
        self.settings.read()
    }

    /// Replaces the settings after validation.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError::InvalidValue` for out-of-range values.
    pub fn update(&self, settings: AudioSettings) -> Result<(), SettingsError> {
        settings.validate()?;
        *self.settings.write() = settings;
        Ok(())
    }

    /// Loads settings from the configuration file.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the file cannot be read or parsed, or
    /// holds invalid values.
    pub fn load(&self) -> Result<(), SettingsError> {
        let contents = read_to_string(&self.config_path)?;
        let settings: AudioSettings = from_str(&contents)?;
        settings.validate()?;

        debug!(path = %self.config_path.display(), "loaded audio settings");
        *self.settings.write() = settings;
        Ok(())
    }

    /// Loads settings if the file exists, keeping defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error with context if an existing file fails to parse.
    pub fn load_or_default(&self) -> crate::error::domain::Result<()> {
        if !self.config_path.exists() {
            return Ok(());
        }
        self.load().add_context("failed to load audio settings")
    }

    /// Saves the current settings to the configuration file.
    ///
    /// # Errors
    ///
    /// Returns `SettingsError` if the file cannot be written.
    pub fn save(&self) -> Result<(), SettingsError> {
        if let Some(parent) = self.config_path.parent() {
            create_dir_all(parent)?;
        }

        let contents = to_string_pretty(&*self.settings.read())?;
        write(&self.config_path, contents)?;

        debug!(path = %self.config_path.display(), "saved audio settings");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use crate::{
        audio::converter::ResampleQuality,
        config::settings::{AudioSettings, SettingsManager},
    };

    #[test]
    fn test_defaults() {
        let settings = AudioSettings::default();
        assert_eq!(settings.resample_quality, ResampleQuality::Auto);
        assert_eq!(settings.max_data_blocks, 10);
        assert_eq!(settings.max_update_ms, 50);
        assert!((settings.volume_interval_secs - 0.05).abs() < f32::EPSILON);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut settings = AudioSettings::default();
        settings.max_data_blocks = 0;
        assert!(settings.validate().is_err());

        let mut settings = AudioSettings::default();
        settings.volume_interval_secs = 0.0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_save_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audio.json");

        let manager = SettingsManager::new(path.clone());
        let mut settings = AudioSettings::default();
        settings.resample_quality = ResampleQuality::HighHann;
        settings.max_update_ms = 25;
        manager.update(settings.clone()).unwrap();
        manager.save().unwrap();

        let loaded = SettingsManager::new(path);
        loaded.load().unwrap();
        assert_eq!(*loaded.settings(), settings);
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempdir().unwrap();
        let manager = SettingsManager::new(dir.path().join("missing.json"));
        assert!(manager.load_or_default().is_ok());
        assert_eq!(*manager.settings(), AudioSettings::default());
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("audio.json");
        std::fs::write(&path, "{ not json").unwrap();

        let manager = SettingsManager::new(path);
        assert!(manager.load().is_err());
    }
}

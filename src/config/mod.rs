//! Engine audio configuration.

pub mod settings;

pub use settings::{AudioSettings, SettingsError, SettingsManager};

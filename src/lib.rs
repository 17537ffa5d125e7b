//! Sonance - engine audio core.
//!
//! The streaming heart of the engine's audio subsystem: converts decoded
//! PCM tracks into whatever format the platform backend asks for and
//! streams them continuously with gapless playback, looping, fades, and
//! crossfades. Decoding, asset loading, and the hardware device itself
//! live outside this crate; the backend pulls converted bytes through
//! the layer API.

pub mod audio;
pub mod config;
pub mod error;

// Re-export key types for convenience
pub use {
    audio::{
        backend::{AudioBackend, LayerStream},
        block::{BlockPool, DataBlock},
        converter::{AudioConverter, ResampleQuality, resample_quality, set_resample_quality},
        envelope::{CrossFadeModulation, VolumeModulation},
        format::AudioFormat,
        layer::{AudioLayer, LayerEvent, LayerMetrics, PlaybackStatus},
        track::{AudioAsset, AudioTrack},
    },
    config::{AudioSettings, SettingsManager},
    error::{AudioError, ResultExt},
};

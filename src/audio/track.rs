//! Decoded audio assets and the playlist entries that reference them.
//!
//! An `AudioAsset` is the immutable product of an upstream decoder: a
//! name, a duration, and a converter over the decoded float samples. An
//! `AudioTrack` wraps an asset with per-playback options and lives in a
//! layer's playlist until played through or removed.

use std::sync::Arc;

use crate::{
    audio::{converter::AudioConverter, format::AudioFormat},
    error::domain::AudioError,
};

/// An immutable decoded sound, ready for streaming.
pub struct AudioAsset {
    name: String,
    duration: f32,
    converter: AudioConverter,
}

impl AudioAsset {
    /// Creates an asset from decoded interleaved float samples.
    ///
    /// Decoding happens upstream; this type only carries the result.
    ///
    /// # Errors
    ///
    /// Returns `AudioError` if the format is invalid or the sample buffer
    /// is empty.
    pub fn new(
        name: impl Into<String>,
        format: AudioFormat,
        samples: Arc<[f32]>,
    ) -> Result<Self, AudioError> {
        let converter = AudioConverter::new(format, samples)?;
        let duration = converter.source_frames() as f32 / format.sample_rate as f32;

        Ok(AudioAsset {
            name: name.into(),
            duration,
            converter,
        })
    }

    /// The asset's friendly name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Duration of the sound in seconds.
    #[must_use]
    pub fn duration(&self) -> f32 {
        self.duration
    }

    /// The converter that streams this asset into arbitrary formats.
    #[must_use]
    pub fn converter(&self) -> &AudioConverter {
        &self.converter
    }
}

impl std::fmt::Debug for AudioAsset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioAsset")
            .field("name", &self.name)
            .field("duration", &self.duration)
            .finish_non_exhaustive()
    }
}

/// A playlist entry: an asset plus per-playback options.
///
/// Fade and crossfade durations are in seconds when positive; a negative
/// value is interpreted as a fraction of the asset's duration.
#[derive(Debug, Clone)]
pub struct AudioTrack {
    asset: Arc<AudioAsset>,
    /// Force the layer into looping-current mode when this track starts.
    pub set_looping_current: bool,
    /// Crossfade duration used when transitioning into the next track.
    pub cross_fade: Option<f32>,
    /// Fade-in duration applied when the track starts.
    pub fade_in: Option<f32>,
    /// Apply the fade-in only on the first loop iteration.
    pub fade_in_first_loop_only: bool,
    /// Fade-out duration applied at the end of the track.
    pub fade_out: Option<f32>,
}

impl AudioTrack {
    /// Creates a track with no options set.
    #[must_use]
    pub fn new(asset: Arc<AudioAsset>) -> Self {
        AudioTrack {
            asset,
            set_looping_current: false,
            cross_fade: None,
            fade_in: None,
            fade_in_first_loop_only: false,
            fade_out: None,
        }
    }

    /// The asset this track plays.
    #[must_use]
    pub fn asset(&self) -> &Arc<AudioAsset> {
        &self.asset
    }

    /// Marks the track to force looping-current mode when it starts.
    #[must_use]
    pub fn with_looping(mut self) -> Self {
        self.set_looping_current = true;
        self
    }

    /// Sets the crossfade duration for transitioning into the next track.
    #[must_use]
    pub fn with_cross_fade(mut self, duration: f32) -> Self {
        self.cross_fade = Some(duration);
        self
    }

    /// Sets a fade-in; `first_loop_only` restricts it to the first pass.
    #[must_use]
    pub fn with_fade_in(mut self, duration: f32, first_loop_only: bool) -> Self {
        self.fade_in = Some(duration);
        self.fade_in_first_loop_only = first_loop_only;
        self
    }

    /// Sets a fade-out at the end of the track.
    #[must_use]
    pub fn with_fade_out(mut self, duration: f32) -> Self {
        self.fade_out = Some(duration);
        self
    }

    /// Resolves a fade duration option to seconds.
    #[must_use]
    pub fn resolve_duration(&self, value: f32) -> f32 {
        if value < 0.0 {
            self.asset.duration() * -value
        } else {
            value
        }
    }
}

//! Sample-indexed volume envelopes for fades and crossfades.
//!
//! Envelopes are expressed in destination-format sample positions so they
//! stay aligned with the layer's playhead. When the backend's streaming
//! format changes, envelopes are rescaled proportionally to remain
//! temporally consistent.

use std::sync::Arc;

use crate::audio::track::AudioTrack;

/// A linear volume ramp between two sample positions.
///
/// Flat at `start_volume` before the range and at `end_volume` after it.
#[derive(Debug, Clone)]
pub struct VolumeModulation {
    pub(crate) start_volume: f32,
    pub(crate) end_volume: f32,
    pub(crate) start_sample: usize,
    pub(crate) end_sample: usize,
}

impl VolumeModulation {
    /// Creates a ramp from `start_volume` at `start_sample` to
    /// `end_volume` at `end_sample`.
    #[must_use]
    pub fn new(start_volume: f32, end_volume: f32, start_sample: usize, end_sample: usize) -> Self {
        VolumeModulation {
            start_volume,
            end_volume,
            start_sample,
            end_sample,
        }
    }

    /// The volume at the given sample position.
    ///
    /// The end bound wins when the range is empty, so a zero-length ramp
    /// acts as an instant volume change.
    #[must_use]
    pub fn volume_at(&self, sample: usize) -> f32 {
        if sample >= self.end_sample {
            return self.end_volume;
        }
        if sample <= self.start_sample {
            return self.start_volume;
        }

        let duration = (self.end_sample - self.start_sample) as f32;
        let progress = (sample - self.start_sample) as f32 / duration;
        self.start_volume + (self.end_volume - self.start_volume) * progress
    }

    /// The sample position where the ramp ends.
    #[must_use]
    pub fn end_sample(&self) -> usize {
        self.end_sample
    }

    /// Reprojects the ramp after a change in the total sample count of the
    /// track it is bound to.
    pub fn rescale(&mut self, old_total: usize, new_total: usize) {
        self.start_sample = rescale_position(self.start_sample, old_total, new_total);
        self.end_sample = rescale_position(self.end_sample, old_total, new_total);
    }
}

/// Reprojects a sample position proportionally between two totals.
pub(crate) fn rescale_position(position: usize, old_total: usize, new_total: usize) -> usize {
    if old_total == 0 {
        return 0;
    }
    let progress = position as f64 / old_total as f64;
    (progress * new_total as f64).floor() as usize
}

/// A crossfade in progress: a fade-in envelope bound to the incoming
/// track's own playhead, running while the outgoing track fades out.
#[derive(Debug, Clone)]
pub struct CrossFadeModulation {
    /// 0 to 1 ramp over the crossfade duration, in incoming-track samples.
    pub fade: VolumeModulation,
    /// The track being faded in.
    pub incoming: Arc<AudioTrack>,
    /// Playhead into the incoming track, independent of the layer's.
    pub incoming_playhead: usize,
    /// Layer playhead position at which the outgoing track is done.
    pub outgoing_end: usize,
}

impl CrossFadeModulation {
    /// Arms a crossfade into `incoming` lasting `duration_samples`
    /// (incoming-track samples), with the outgoing side finishing at
    /// `outgoing_end` on the layer playhead.
    #[must_use]
    pub fn new(incoming: Arc<AudioTrack>, duration_samples: usize, outgoing_end: usize) -> Self {
        CrossFadeModulation {
            fade: VolumeModulation::new(0.0, 1.0, 0, duration_samples),
            incoming,
            incoming_playhead: 0,
            outgoing_end,
        }
    }

    /// Reprojects the crossfade after a streaming format change.
    ///
    /// The fade bounds and the stored incoming playhead rescale by the
    /// incoming track's total ratio; the outgoing end rescales by the
    /// outgoing track's.
    pub fn rescale(
        &mut self,
        old_incoming_total: usize,
        new_incoming_total: usize,
        old_outgoing_total: usize,
        new_outgoing_total: usize,
    ) {
        self.fade.rescale(old_incoming_total, new_incoming_total);
        self.incoming_playhead =
            rescale_position(self.incoming_playhead, old_incoming_total, new_incoming_total);
        self.outgoing_end =
            rescale_position(self.outgoing_end, old_outgoing_total, new_outgoing_total);
    }
}

/// Converts a 0 to 1 volume into the multiplier applied to float samples.
///
/// The exponent approximates perceptual loudness so volume controls feel
/// linear to the listener.
#[must_use]
pub fn volume_to_multiplier(volume: f32) -> f32 {
    volume.powf(2.718)
}

//! Sample rate and channel layout conversion for streaming playback.
//!
//! An `AudioConverter` wraps one decoded track (interleaved 32-bit float
//! samples plus its source format) and produces frames in any destination
//! format on demand. Conversion is stateless per call, so the streaming
//! layer can pull from arbitrary positions while the backend's device
//! format changes underneath it.
//!
//! Four resampling algorithms are available, selected by a process-wide
//! quality setting. Channel remapping happens inline during resampling
//! using the memoized tables from the remap module.

use std::{
    f64::consts::{PI, TAU},
    sync::{
        Arc, LazyLock,
        atomic::{AtomicU8, Ordering::Relaxed},
    },
    thread::available_parallelism,
};

use {
    serde::{Deserialize, Serialize},
    tracing::debug,
};

use crate::{
    audio::{
        format::AudioFormat,
        remap::{RemapEntry, contributes, remap_for, source_class},
    },
    error::domain::AudioError,
};

/// Quality of the resampling algorithm used for playback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResampleQuality {
    /// Pick a quality suited to the machine's core count.
    Auto,
    /// Linear interpolation with a squared fraction. Cheap, slightly
    /// eased; suited to weak CPUs.
    LowCubic,
    /// Catmull-Rom interpolation over four control points.
    MediumHermite,
    /// Hann-windowed sinc reconstruction. The reference quality path.
    HighHann,
    /// Stereo fast path over a quantized sinc/Hann lookup table. Trades a
    /// little fidelity at high resample ratios for avoiding transcendental
    /// calls; non-stereo conversions fall back to `HighHann`.
    OptimizedExperimental,
}

impl ResampleQuality {
    /// Resolves `Auto` to a concrete quality by gauging CPU power from the
    /// core count. Serviceable rather than exact.
    #[must_use]
    pub fn resolve(self) -> ResampleQuality {
        match self {
            ResampleQuality::Auto => {
                let cores = available_parallelism().map_or(1, usize::from);
                if cores <= 2 {
                    ResampleQuality::LowCubic
                } else {
                    ResampleQuality::MediumHermite
                }
            }
            other => other,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            ResampleQuality::Auto => 0,
            ResampleQuality::LowCubic => 1,
            ResampleQuality::MediumHermite => 2,
            ResampleQuality::HighHann => 3,
            ResampleQuality::OptimizedExperimental => 4,
        }
    }

    fn from_u8(value: u8) -> ResampleQuality {
        match value {
            2 => ResampleQuality::MediumHermite,
            3 => ResampleQuality::HighHann,
            4 => ResampleQuality::OptimizedExperimental,
            _ => ResampleQuality::LowCubic,
        }
    }
}

static RESAMPLE_QUALITY: AtomicU8 = AtomicU8::new(1); // LowCubic

/// Returns the process-wide resample quality.
#[must_use]
pub fn resample_quality() -> ResampleQuality {
    ResampleQuality::from_u8(RESAMPLE_QUALITY.load(Relaxed))
}

/// Sets the process-wide resample quality, resolving `Auto` immediately.
pub fn set_resample_quality(quality: ResampleQuality) {
    let resolved = quality.resolve();
    RESAMPLE_QUALITY.store(resolved.as_u8(), Relaxed);
    debug!(quality = ?resolved, "set audio resample quality");
}

const HANN_FILTER_SIZE: usize = 16;
const SINC_CACHE_RESOLUTION: usize = 1000;

// Half of the destination sample rate, as a fraction of it.
const NYQUIST_FACTOR: f64 = 0.5;

fn normalized_sinc(x: f64) -> f64 {
    if x == 0.0 { 1.0 } else { (PI * x).sin() / (PI * x) }
}

fn hann_window(x: f64, width: f64) -> f64 {
    0.5 - 0.5 * (TAU * (0.5 + x / width)).cos()
}

fn precompute_hann_sinc_table(filter_size: usize) -> Box<[f32]> {
    let half_size = filter_size / 2 + 1;
    // One band past the half width, since the filter is one sample larger
    // than its size because of the center point.
    let mut table = vec![0.0f32; (half_size + 1) * SINC_CACHE_RESOLUTION];
    for (i, slot) in table.iter_mut().enumerate() {
        let x = i as f64 / SINC_CACHE_RESOLUTION as f64;
        *slot = (normalized_sinc(x) * hann_window(x, filter_size as f64)) as f32;
    }
    table.into_boxed_slice()
}

static HANN_SINC_TABLE: LazyLock<Box<[f32]>> =
    LazyLock::new(|| precompute_hann_sinc_table(HANN_FILTER_SIZE));

/// Converts audio from one fixed source buffer to any destination format.
///
/// Owns the decoded interleaved float samples and is immutable after
/// construction. All positions are expressed in destination-format
/// samples so the caller's playhead stays meaningful across calls.
pub struct AudioConverter {
    samples: Arc<[f32]>,
    source_format: AudioFormat,
    /// Number of frames per channel in the source buffer.
    source_frames: usize,
}

impl AudioConverter {
    /// Creates a converter over decoded interleaved float samples.
    ///
    /// # Errors
    ///
    /// Returns `AudioError` if the format is invalid or the buffer is
    /// empty.
    pub fn new(source_format: AudioFormat, samples: Arc<[f32]>) -> Result<Self, AudioError> {
        // Revalidate so converters built from raw format literals still
        // uphold the channel/rate invariants.
        let source_format = AudioFormat::new(
            source_format.channels,
            source_format.sample_rate,
            source_format.bits_per_sample,
            source_format.is_float,
        )?;
        if samples.is_empty() {
            return Err(AudioError::EmptySoundData);
        }

        let source_frames = samples.len() / usize::from(source_format.channels);
        Ok(AudioConverter {
            samples,
            source_format,
            source_frames,
        })
    }

    /// The decoded source samples, interleaved.
    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// The format the source samples are in.
    #[must_use]
    pub fn source_format(&self) -> &AudioFormat {
        &self.source_format
    }

    /// Number of frames per channel in the source buffer.
    #[must_use]
    pub fn source_frames(&self) -> usize {
        self.source_frames
    }

    /// Total sample count (all channels) this audio occupies in the given
    /// format. A pure function of both sample rates and channel counts.
    #[must_use]
    pub fn sample_count_in_format(&self, dst: &AudioFormat) -> usize {
        let ratio = f64::from(dst.sample_rate) / f64::from(self.source_format.sample_rate);
        ((self.source_frames as f64 * ratio) as usize) * usize::from(dst.channels)
    }

    /// Converts frames into `buf` using the process-wide quality setting.
    ///
    /// See [`AudioConverter::resampled_frames_with_quality`].
    pub fn resampled_frames(
        &self,
        dst: &AudioFormat,
        dst_sample_start: usize,
        requested_frames: usize,
        buf: &mut [f32],
    ) -> usize {
        self.resampled_frames_with_quality(
            dst,
            dst_sample_start,
            requested_frames,
            buf,
            resample_quality(),
        )
    }

    /// Converts up to `requested_frames` destination-format frames into
    /// `buf`, starting at `dst_sample_start` (a sample index relative to
    /// the total this audio has in `dst`).
    ///
    /// Returns how many frames were written. The count is clamped so the
    /// write never passes the total; a start index at or past the total
    /// yields zero frames.
    pub fn resampled_frames_with_quality(
        &self,
        dst: &AudioFormat,
        dst_sample_start: usize,
        requested_frames: usize,
        buf: &mut [f32],
        quality: ResampleQuality,
    ) -> usize {
        // Identical rate and channel layout needs no reconstruction; the
        // copy keeps identity conversions bit-exact in every quality mode.
        if dst.sample_rate == self.source_format.sample_rate
            && dst.channels == self.source_format.channels
        {
            return self.copy_frames(dst, dst_sample_start, requested_frames, buf);
        }

        match quality.resolve() {
            ResampleQuality::LowCubic => {
                self.cubic_resample(dst, dst_sample_start, requested_frames, buf)
            }
            ResampleQuality::MediumHermite => {
                self.catmull_resample(dst, dst_sample_start, requested_frames, buf)
            }
            ResampleQuality::HighHann => {
                self.hann_resample(dst, dst_sample_start, requested_frames, buf)
            }
            ResampleQuality::OptimizedExperimental => {
                self.optimized_resample(dst, dst_sample_start, requested_frames, buf)
            }
            ResampleQuality::Auto => unreachable!("resolve never yields Auto"),
        }
    }

    /// Clamps a frame request so it never reads past the converted total.
    fn clamp_requested(
        &self,
        dst: &AudioFormat,
        dst_sample_start: usize,
        requested_frames: usize,
    ) -> usize {
        let total = self.sample_count_in_format(dst);
        let dst_channels = usize::from(dst.channels);
        if dst_sample_start >= total {
            return 0;
        }
        if dst_sample_start + requested_frames * dst_channels >= total {
            (total - dst_sample_start) / dst_channels
        } else {
            requested_frames
        }
    }

    fn copy_frames(
        &self,
        dst: &AudioFormat,
        dst_sample_start: usize,
        requested_frames: usize,
        buf: &mut [f32],
    ) -> usize {
        let requested = self.clamp_requested(dst, dst_sample_start, requested_frames);
        let samples = requested * usize::from(dst.channels);
        buf[..samples].copy_from_slice(&self.samples[dst_sample_start..dst_sample_start + samples]);
        requested
    }

    fn cubic_resample(
        &self,
        dst: &AudioFormat,
        dst_sample_start: usize,
        requested_frames: usize,
        buf: &mut [f32],
    ) -> usize {
        let requested = self.clamp_requested(dst, dst_sample_start, requested_frames);
        if requested == 0 {
            return 0;
        }

        let dst_channels = usize::from(dst.channels);
        let src_channels = usize::from(self.source_format.channels);
        let remap = remap_for(self.source_format.channels, dst.channels);
        let use_channel_cache = dst_channels > 2;
        let direct = dst_channels == src_channels;
        let resample_step = self.source_format.sample_rate as f32 / dst.sample_rate as f32;
        let last_frame = self.source_frames - 1;

        let dst_frame_start = dst_sample_start / dst_channels;
        let mut channel_cache = [f32::NAN; 2];
        for out_frame in 0..requested {
            if use_channel_cache {
                channel_cache = [f32::NAN; 2];
            }

            let src_frame = (dst_frame_start + out_frame) as f32 * resample_step;
            let previous_frame = (src_frame.floor() as usize).min(last_frame);
            let next_frame = (src_frame.ceil() as usize).min(last_frame);

            let mut fraction = src_frame - src_frame.floor();
            fraction *= fraction;

            let previous_base = previous_frame * src_channels;
            let next_base = next_frame * src_channels;
            let out_base = out_frame * dst_channels;
            for c in 0..dst_channels {
                if use_channel_cache
                    && let Some(value) = cached_channel_value(&remap, c, &channel_cache)
                {
                    buf[out_base + c] = value;
                    continue;
                }

                let previous_sample = if direct {
                    self.samples[previous_base + c]
                } else {
                    self.channel_converted_sample(previous_base, c, &remap)
                };
                let next_sample = if direct {
                    self.samples[next_base + c]
                } else {
                    self.channel_converted_sample(next_base, c, &remap)
                };

                let value = previous_sample + (next_sample - previous_sample) * fraction;
                buf[out_base + c] = value;
                if use_channel_cache {
                    store_channel_value(&remap, c, value, &mut channel_cache);
                }
            }
        }

        requested
    }

    fn catmull_resample(
        &self,
        dst: &AudioFormat,
        dst_sample_start: usize,
        requested_frames: usize,
        buf: &mut [f32],
    ) -> usize {
        let requested = self.clamp_requested(dst, dst_sample_start, requested_frames);
        if requested == 0 {
            return 0;
        }

        let dst_channels = usize::from(dst.channels);
        let src_channels = usize::from(self.source_format.channels);
        let remap = remap_for(self.source_format.channels, dst.channels);
        let use_channel_cache = dst_channels > 2;
        let direct = dst_channels == src_channels;
        let resample_step = self.source_format.sample_rate as f32 / dst.sample_rate as f32;
        let last_frame = self.source_frames - 1;

        let dst_frame_start = dst_sample_start / dst_channels;
        let mut channel_cache = [f32::NAN; 2];
        for out_frame in 0..requested {
            if use_channel_cache {
                channel_cache = [f32::NAN; 2];
            }

            let src_frame = (dst_frame_start + out_frame) as f32 * resample_step;
            let previous_frame = src_frame.floor() as usize;
            let next_frame = src_frame.ceil() as usize;

            let fraction = src_frame - src_frame.floor();
            let fraction_squared = fraction * fraction;
            let fraction_cubed = fraction_squared * fraction;

            let previous_base = previous_frame.min(last_frame) * src_channels;
            let next_base = next_frame.min(last_frame) * src_channels;

            // Outer control points, clamped to the buffer edges.
            let previous_control_base =
                (previous_frame as isize - 1).max(0).min(last_frame as isize) as usize
                    * src_channels;
            let next_control_base = (next_frame + 1).min(last_frame) * src_channels;

            let out_base = out_frame * dst_channels;
            for c in 0..dst_channels {
                if use_channel_cache
                    && let Some(value) = cached_channel_value(&remap, c, &channel_cache)
                {
                    buf[out_base + c] = value;
                    continue;
                }

                let v0 = if direct {
                    self.samples[previous_control_base + c]
                } else {
                    self.channel_converted_sample(previous_control_base, c, &remap)
                };
                let v1 = if direct {
                    self.samples[previous_base + c]
                } else {
                    self.channel_converted_sample(previous_base, c, &remap)
                };
                let v2 = if direct {
                    self.samples[next_base + c]
                } else {
                    self.channel_converted_sample(next_base, c, &remap)
                };
                let v3 = if direct {
                    self.samples[next_control_base + c]
                } else {
                    self.channel_converted_sample(next_control_base, c, &remap)
                };

                let value = 0.5
                    * (2.0 * v1
                        + (v2 - v0) * fraction
                        + (2.0 * v0 - 5.0 * v1 + 4.0 * v2 - v3) * fraction_squared
                        + (3.0 * v1 - v0 - 3.0 * v2 + v3) * fraction_cubed);

                buf[out_base + c] = value;
                if use_channel_cache {
                    store_channel_value(&remap, c, value, &mut channel_cache);
                }
            }
        }

        requested
    }

    fn hann_resample(
        &self,
        dst: &AudioFormat,
        dst_sample_start: usize,
        requested_frames: usize,
        buf: &mut [f32],
    ) -> usize {
        let requested = self.clamp_requested(dst, dst_sample_start, requested_frames);
        if requested == 0 {
            return 0;
        }

        let dst_channels = usize::from(dst.channels);
        let src_channels = usize::from(self.source_format.channels);
        let remap = remap_for(self.source_format.channels, dst.channels);
        let use_channel_cache = dst_channels > 2;
        let direct = dst_channels == src_channels;
        let resample_step = self.source_format.sample_rate as f32 / dst.sample_rate as f32;
        let last_frame = self.source_frames - 1;

        let gain = 2.0 * NYQUIST_FACTOR;
        let half_window = (HANN_FILTER_SIZE / 2) as isize;
        let window_width = HANN_FILTER_SIZE as f64;

        let dst_frame_start = dst_sample_start / dst_channels;
        let mut channel_cache = [f32::NAN; 2];
        for out_frame in 0..requested {
            if use_channel_cache {
                channel_cache = [f32::NAN; 2];
            }

            let src_frame = (dst_frame_start + out_frame) as f32 * resample_step;

            let out_base = out_frame * dst_channels;
            for c in 0..dst_channels {
                if use_channel_cache
                    && let Some(value) = cached_channel_value(&remap, c, &channel_cache)
                {
                    buf[out_base + c] = value;
                    continue;
                }

                let mut accum = 0.0f64;
                for tau in -half_window..=half_window {
                    let input_frame =
                        ((src_frame + tau as f32) as isize).clamp(0, last_frame as isize) as usize;
                    let relative_idx = input_frame as f64 - f64::from(src_frame);

                    let window =
                        0.5 - 0.5 * (TAU * (0.5 + relative_idx / window_width)).cos();
                    let angle = TAU * relative_idx * NYQUIST_FACTOR;
                    let sinc = if angle != 0.0 { angle.sin() / angle } else { 1.0 };

                    let sample = if direct {
                        self.samples[input_frame * src_channels + c]
                    } else {
                        self.channel_converted_sample(input_frame * src_channels, c, &remap)
                    };
                    accum += gain * window * sinc * f64::from(sample);
                }

                let value = (accum as f32).clamp(-1.0, 1.0);
                buf[out_base + c] = value;
                if use_channel_cache {
                    store_channel_value(&remap, c, value, &mut channel_cache);
                }
            }
        }

        requested
    }

    fn optimized_resample(
        &self,
        dst: &AudioFormat,
        dst_sample_start: usize,
        requested_frames: usize,
        buf: &mut [f32],
    ) -> usize {
        // Stereo to stereo is the overwhelmingly common case; everything
        // else takes the general windowed path.
        if dst.channels != 2 || self.source_format.channels != 2 {
            return self.hann_resample(dst, dst_sample_start, requested_frames, buf);
        }

        let requested = self.clamp_requested(dst, dst_sample_start, requested_frames);
        if requested == 0 {
            return 0;
        }

        let table = &**HANN_SINC_TABLE;
        let half_window = (HANN_FILTER_SIZE / 2) as isize;
        let resample_step =
            f64::from(self.source_format.sample_rate) / f64::from(dst.sample_rate);
        let input_frames = self.source_frames as isize;

        let dst_frame_start = dst_sample_start / 2;
        let mut src_frame = dst_frame_start as f64 * resample_step;
        for out_frame in 0..requested {
            let base_frame = src_frame.floor() as isize;
            let mut sum_left = 0.0f32;
            let mut sum_right = 0.0f32;
            for tau in -half_window..=half_window {
                let tap = (base_frame + tau).clamp(0, input_frames - 1) as usize;
                let relative_idx = src_frame - tap as f64;

                let table_idx = (relative_idx * SINC_CACHE_RESOLUTION as f64).abs() as usize;
                let factor = table[table_idx];

                sum_left += self.samples[tap * 2] * factor;
                sum_right += self.samples[tap * 2 + 1] * factor;
            }

            buf[out_frame * 2] = sum_left.clamp(-1.0, 1.0);
            buf[out_frame * 2 + 1] = sum_right.clamp(-1.0, 1.0);

            src_frame += resample_step;
        }

        requested
    }

    /// Resolves one destination-channel sample at the given source sample
    /// index through the remap table.
    fn channel_converted_sample(
        &self,
        src_sample_idx: usize,
        dst_channel: usize,
        remap: &[RemapEntry],
    ) -> f32 {
        let src_channels = usize::from(self.source_format.channels);
        match remap[dst_channel] {
            RemapEntry::Source(source) => self.samples[src_sample_idx + usize::from(source)],
            RemapEntry::MixAll => {
                let mut accum = 0.0f32;
                for i in 0..src_channels {
                    accum += self.samples[src_sample_idx + i];
                }
                accum / src_channels as f32
            }
            RemapEntry::Surround => {
                let mut accum = 0.0f32;
                for i in 0..src_channels {
                    if contributes(source_class(i), dst_channel) {
                        accum += self.samples[src_sample_idx + i];
                    }
                }
                accum.clamp(-1.0, 1.0)
            }
        }
    }
}

/// Reads the per-frame channel cache for destination channels that map
/// straight onto source channel 0 or 1.
fn cached_channel_value(remap: &[RemapEntry], dst_channel: usize, cache: &[f32; 2]) -> Option<f32> {
    if let RemapEntry::Source(source) = remap[dst_channel]
        && source <= 1
        && !cache[usize::from(source)].is_nan()
    {
        return Some(cache[usize::from(source)]);
    }
    None
}

fn store_channel_value(remap: &[RemapEntry], dst_channel: usize, value: f32, cache: &mut [f32; 2]) {
    if let RemapEntry::Source(source) = remap[dst_channel]
        && source <= 1
    {
        cache[usize::from(source)] = value;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::audio::{
        converter::{AudioConverter, ResampleQuality},
        format::AudioFormat,
    };

    fn stereo_format(rate: u32) -> AudioFormat {
        AudioFormat::new(2, rate, 32, true).unwrap()
    }

    fn ramp_converter(frames: usize, channels: u16, rate: u32) -> AudioConverter {
        let samples: Arc<[f32]> = (0..frames * usize::from(channels))
            .map(|i| (i % 100) as f32 / 100.0)
            .collect();
        let format = AudioFormat::new(channels, rate, 32, true).unwrap();
        AudioConverter::new(format, samples).unwrap()
    }

    const ALL_QUALITIES: [ResampleQuality; 4] = [
        ResampleQuality::LowCubic,
        ResampleQuality::MediumHermite,
        ResampleQuality::HighHann,
        ResampleQuality::OptimizedExperimental,
    ];

    #[test]
    fn test_rejects_empty_sound_data() {
        let samples: Arc<[f32]> = Arc::from(&[][..]);
        assert!(AudioConverter::new(stereo_format(44100), samples).is_err());
    }

    #[test]
    fn test_sample_count_in_format() {
        let converter = ramp_converter(1000, 2, 44100);
        // Same format: every source sample counted.
        assert_eq!(converter.sample_count_in_format(&stereo_format(44100)), 2000);
        // Mono halves the count, rate scales it.
        let mono_22k = AudioFormat::new(1, 22050, 32, true).unwrap();
        assert_eq!(converter.sample_count_in_format(&mono_22k), 500);
    }

    #[test]
    fn test_identity_conversion_is_exact_for_all_qualities() {
        let converter = ramp_converter(500, 2, 44100);
        let dst = stereo_format(44100);
        for quality in ALL_QUALITIES {
            let mut buf = vec![0.0f32; 1000];
            let frames =
                converter.resampled_frames_with_quality(&dst, 0, 500, &mut buf, quality);
            assert_eq!(frames, 500);
            assert_eq!(&buf[..], converter.samples(), "quality {quality:?}");
        }
    }

    #[test]
    fn test_never_writes_more_than_requested_or_past_total() {
        let converter = ramp_converter(441, 2, 44100);
        let rates = [22050u32, 44100, 48000, 96000];
        let channels = [1u16, 2, 6];
        for quality in ALL_QUALITIES {
            for &rate in &rates {
                for &ch in &channels {
                    let dst = AudioFormat::new(ch, rate, 32, true).unwrap();
                    let total = converter.sample_count_in_format(&dst);
                    let mut buf = vec![0.0f32; 4096];

                    let start = total / 2;
                    let frames = converter
                        .resampled_frames_with_quality(&dst, start, 128, &mut buf, quality);
                    assert!(frames <= 128);
                    assert!(
                        start + frames * usize::from(ch) <= total,
                        "{quality:?} {rate} Hz {ch} ch wrote past the total"
                    );
                }
            }
        }
    }

    #[test]
    fn test_start_past_total_yields_zero_frames() {
        let converter = ramp_converter(441, 2, 44100);
        let dst = stereo_format(48000);
        let total = converter.sample_count_in_format(&dst);
        let mut buf = vec![0.0f32; 256];
        for quality in ALL_QUALITIES {
            assert_eq!(
                converter.resampled_frames_with_quality(&dst, total, 32, &mut buf, quality),
                0
            );
            assert_eq!(
                converter
                    .resampled_frames_with_quality(&dst, total + 999, 32, &mut buf, quality),
                0
            );
        }
    }

    #[test]
    fn test_downmix_to_mono_averages_channels() {
        let samples: Arc<[f32]> = Arc::from(&[0.1f32, 0.2, 0.3, 0.4, -0.4, 0.4, 0.0, 0.8][..]);
        let format = AudioFormat::new(4, 44100, 32, true).unwrap();
        let converter = AudioConverter::new(format, samples).unwrap();

        let mono = AudioFormat::new(1, 44100, 32, true).unwrap();
        let mut buf = vec![0.0f32; 2];
        let frames = converter.resampled_frames_with_quality(
            &mono,
            0,
            2,
            &mut buf,
            ResampleQuality::LowCubic,
        );
        assert_eq!(frames, 2);
        assert!((buf[0] - 0.25).abs() < 1e-6);
        assert!((buf[1] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_surround_downmix_combines_classified_channels() {
        // One 6-channel frame: FL, FR, C, LFE, SL, SR.
        let samples: Arc<[f32]> = Arc::from(&[0.1f32, 0.2, 0.05, 0.05, 0.3, 0.4][..]);
        let format = AudioFormat::new(6, 44100, 32, true).unwrap();
        let converter = AudioConverter::new(format, samples).unwrap();

        let quad = AudioFormat::new(4, 44100, 32, true).unwrap();
        let mut buf = vec![0.0f32; 4];
        let frames = converter.resampled_frames_with_quality(
            &quad,
            0,
            1,
            &mut buf,
            ResampleQuality::LowCubic,
        );
        assert_eq!(frames, 1);
        // Left channels + combine material.
        assert!((buf[0] - (0.1 + 0.05 + 0.05 + 0.3)).abs() < 1e-6);
        // Right channels + combine material.
        assert!((buf[1] - (0.2 + 0.05 + 0.05 + 0.4)).abs() < 1e-6);
        // Channels past the stereo pair only get combine material.
        assert!((buf[2] - 0.1).abs() < 1e-6);
        assert!((buf[3] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_optimized_falls_back_for_non_stereo() {
        let converter = ramp_converter(441, 1, 44100);
        let dst = AudioFormat::new(1, 48000, 32, true).unwrap();
        let mut optimized = vec![0.0f32; 512];
        let mut reference = vec![0.0f32; 512];

        let a = converter.resampled_frames_with_quality(
            &dst,
            0,
            128,
            &mut optimized,
            ResampleQuality::OptimizedExperimental,
        );
        let b = converter.resampled_frames_with_quality(
            &dst,
            0,
            128,
            &mut reference,
            ResampleQuality::HighHann,
        );
        assert_eq!(a, b);
        assert_eq!(optimized, reference);
    }

    #[test]
    fn test_optimized_stereo_tracks_reference_path() {
        // A smooth sine keeps the comparison away from clamping artifacts.
        let frames = 2048usize;
        let samples: Arc<[f32]> = (0..frames * 2)
            .map(|i| {
                let t = (i / 2) as f32 / 44100.0;
                (std::f32::consts::TAU * 440.0 * t).sin() * 0.5
            })
            .collect();
        let converter = AudioConverter::new(stereo_format(44100), samples).unwrap();

        let dst = stereo_format(48000);
        let mut optimized = vec![0.0f32; 1024];
        let mut reference = vec![0.0f32; 1024];
        // Start away from the buffer edges where tap clamping differs.
        let start = 512;
        converter.resampled_frames_with_quality(
            &dst,
            start,
            256,
            &mut optimized,
            ResampleQuality::OptimizedExperimental,
        );
        converter.resampled_frames_with_quality(
            &dst,
            start,
            256,
            &mut reference,
            ResampleQuality::HighHann,
        );

        for i in 0..512 {
            assert!(
                (optimized[i] - reference[i]).abs() < 0.02,
                "sample {i}: {} vs {}",
                optimized[i],
                reference[i]
            );
        }
    }

    #[test]
    fn test_output_stays_in_range_when_upsampling() {
        let converter = ramp_converter(1000, 2, 22050);
        let dst = stereo_format(96000);
        let mut buf = vec![0.0f32; 2048];
        for quality in [ResampleQuality::HighHann, ResampleQuality::OptimizedExperimental] {
            let frames =
                converter.resampled_frames_with_quality(&dst, 0, 1024, &mut buf, quality);
            assert!(frames > 0);
            for &v in &buf[..frames * 2] {
                assert!((-1.0..=1.0).contains(&v));
            }
        }
    }
}

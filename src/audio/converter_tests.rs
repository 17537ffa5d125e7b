//! Streaming-oriented conversion tests.
//!
//! The converter is stateless per call, so pulling a track in arbitrary
//! segment sizes must produce exactly the bytes a whole-buffer
//! conversion would. These tests exercise that property across formats
//! and quality modes.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::audio::{
        converter::{AudioConverter, ResampleQuality},
        format::AudioFormat,
    };

    const ALL_QUALITIES: [ResampleQuality; 4] = [
        ResampleQuality::LowCubic,
        ResampleQuality::MediumHermite,
        ResampleQuality::HighHann,
        ResampleQuality::OptimizedExperimental,
    ];

    fn sine_converter(frames: usize, channels: u16, rate: u32) -> AudioConverter {
        let samples: Arc<[f32]> = (0..frames * usize::from(channels))
            .map(|i| {
                let frame = i / usize::from(channels);
                let t = frame as f32 / rate as f32;
                (std::f32::consts::TAU * 220.0 * t).sin() * 0.7
            })
            .collect();
        let format = AudioFormat::new(channels, rate, 32, true).unwrap();
        AudioConverter::new(format, samples).unwrap()
    }

    /// Converts the whole track in one call.
    fn convert_whole(converter: &AudioConverter, dst: &AudioFormat, quality: ResampleQuality) -> Vec<f32> {
        let total = converter.sample_count_in_format(dst);
        let frames = total / usize::from(dst.channels);
        let mut buf = vec![0.0f32; total];
        let written = converter.resampled_frames_with_quality(dst, 0, frames, &mut buf, quality);
        buf.truncate(written * usize::from(dst.channels));
        buf
    }

    /// Converts the track by polling `poll_frames` at a time.
    fn convert_segmented(
        converter: &AudioConverter,
        dst: &AudioFormat,
        poll_frames: usize,
        quality: ResampleQuality,
    ) -> Vec<f32> {
        let mut out = Vec::new();
        let mut play_head = 0usize;
        let mut buf = vec![0.0f32; poll_frames * usize::from(dst.channels)];
        loop {
            let written =
                converter.resampled_frames_with_quality(dst, play_head, poll_frames, &mut buf, quality);
            if written == 0 {
                break;
            }
            let samples = written * usize::from(dst.channels);
            out.extend_from_slice(&buf[..samples]);
            play_head += samples;
        }
        out
    }

    #[test]
    fn test_segmented_conversion_matches_whole() {
        let converter = sine_converter(4410, 2, 44100);
        let destinations = [
            AudioFormat::new(2, 48000, 32, true).unwrap(),
            AudioFormat::new(1, 22050, 32, true).unwrap(),
            AudioFormat::new(2, 44100, 32, true).unwrap(),
        ];

        for quality in ALL_QUALITIES {
            for dst in &destinations {
                let whole = convert_whole(&converter, dst, quality);
                for poll in [1usize, 7, 100, 499] {
                    let segmented = convert_segmented(&converter, dst, poll, quality);
                    assert_eq!(
                        segmented.len(),
                        whole.len(),
                        "{quality:?} poll {poll} covered a different sample count"
                    );
                    if quality == ResampleQuality::OptimizedExperimental {
                        // The lookup-table path steps its source position
                        // incrementally, so segment starts differ from a
                        // whole run by accumulated rounding.
                        for (i, (a, b)) in segmented.iter().zip(&whole).enumerate() {
                            assert!(
                                (a - b).abs() < 1e-2,
                                "{quality:?} poll {poll} sample {i}: {a} vs {b}"
                            );
                        }
                    } else {
                        assert_eq!(segmented, whole, "{quality:?} poll {poll} diverged");
                    }
                }
            }
        }
    }

    #[test]
    fn test_segment_totals_match_sample_count() {
        let converter = sine_converter(1000, 1, 22050);
        let dst = AudioFormat::new(2, 48000, 32, true).unwrap();
        let total = converter.sample_count_in_format(&dst);

        let segmented =
            convert_segmented(&converter, &dst, 333, ResampleQuality::MediumHermite);
        assert_eq!(segmented.len(), total);
    }

    #[test]
    fn test_mono_to_stereo_duplicates_channel() {
        let samples: Arc<[f32]> = Arc::from(&[0.1f32, 0.2, 0.3, 0.4][..]);
        let format = AudioFormat::new(1, 44100, 32, true).unwrap();
        let converter = AudioConverter::new(format, samples).unwrap();

        let stereo = AudioFormat::new(2, 44100, 32, true).unwrap();
        let mut buf = vec![0.0f32; 8];
        let frames = converter.resampled_frames_with_quality(
            &stereo,
            0,
            4,
            &mut buf,
            ResampleQuality::LowCubic,
        );
        assert_eq!(frames, 4);
        assert_eq!(buf, vec![0.1, 0.1, 0.2, 0.2, 0.3, 0.3, 0.4, 0.4]);
    }

    #[test]
    fn test_cubic_eases_with_squared_fraction() {
        // Doubling the rate lands every odd output frame halfway between
        // two source frames; the cubic path eases with fraction^2.
        let samples: Arc<[f32]> = Arc::from(&[0.0f32, 1.0, 0.0, 1.0][..]);
        let format = AudioFormat::new(1, 22050, 32, true).unwrap();
        let converter = AudioConverter::new(format, samples).unwrap();

        let dst = AudioFormat::new(1, 44100, 32, true).unwrap();
        let mut buf = vec![0.0f32; 8];
        let frames = converter.resampled_frames_with_quality(
            &dst,
            0,
            8,
            &mut buf,
            ResampleQuality::LowCubic,
        );
        assert_eq!(frames, 8);
        // Frame 1 sits at source position 0.5: lerp(0, 1, 0.25).
        assert!((buf[1] - 0.25).abs() < 1e-6);
        // Frame 3 sits at source position 1.5: lerp(1, 0, 0.25).
        assert!((buf[3] - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_catmull_passes_through_source_frames() {
        let converter = sine_converter(512, 1, 22050);
        let dst = AudioFormat::new(1, 44100, 32, true).unwrap();
        let mut buf = vec![0.0f32; 512];
        let frames = converter.resampled_frames_with_quality(
            &dst,
            0,
            256,
            &mut buf,
            ResampleQuality::MediumHermite,
        );
        assert_eq!(frames, 256);
        // Even output frames land exactly on source frames and the
        // Catmull blend reduces to the center point there.
        for i in (0..256).step_by(2) {
            let expected = converter.samples()[i / 2];
            assert!(
                (buf[i] - expected).abs() < 1e-6,
                "frame {i}: {} vs {expected}",
                buf[i]
            );
        }
    }

    #[test]
    fn test_edge_indices_clamp_instead_of_wrapping() {
        // A short buffer forces every algorithm to sample past both ends.
        let samples: Arc<[f32]> = Arc::from(&[0.5f32, -0.5, 0.5, -0.5][..]);
        let format = AudioFormat::new(2, 44100, 32, true).unwrap();
        let converter = AudioConverter::new(format, samples).unwrap();

        let dst = AudioFormat::new(2, 96000, 32, true).unwrap();
        let total = converter.sample_count_in_format(&dst);
        let frames = total / 2;
        for quality in ALL_QUALITIES {
            let mut buf = vec![0.0f32; total];
            let written =
                converter.resampled_frames_with_quality(&dst, 0, frames, &mut buf, quality);
            assert_eq!(written, frames);
            for &value in &buf[..written * 2] {
                assert!(value.is_finite());
                assert!((-1.0..=1.0).contains(&value), "{quality:?} left range");
            }
        }
    }
}

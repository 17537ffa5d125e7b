//! Conversion between 32-bit float samples and device byte formats.
//!
//! All internal processing happens on interleaved `f32` samples; the
//! streaming layer converts to the backend's byte format as the last step
//! before handing data over. Integer formats use asymmetric scaling so
//! that -1.0 maps to the type minimum and 1.0 to the type maximum.

use tracing::warn;

use crate::audio::format::AudioFormat;

/// Writes float samples into `dest` in the byte layout `format` describes.
///
/// Writes `min(samples.len(), dest capacity)` samples and returns how many
/// were written. Unsupported bit depths log a warning and leave `dest`
/// untouched; this path never panics since it runs during streaming.
pub fn write_samples_to_bytes(samples: &[f32], dest: &mut [u8], format: &AudioFormat) -> usize {
    let sample_size = format.sample_size();
    if sample_size == 0 {
        warn!(
            bits_per_sample = format.bits_per_sample,
            "cannot write samples with a zero-sized sample format"
        );
        return 0;
    }

    let count = samples.len().min(dest.len() / sample_size);
    match (format.bits_per_sample, format.is_float) {
        (8, false) => {
            for (i, &value) in samples[..count].iter().enumerate() {
                dest[i] = (value * f32::from(u8::MAX)) as u8;
            }
        }
        (16, false) => {
            for (i, &value) in samples[..count].iter().enumerate() {
                let converted = if value < 0.0 {
                    (-value * i16::MIN as f32) as i16
                } else {
                    (value * i16::MAX as f32) as i16
                };
                dest[i * 2..i * 2 + 2].copy_from_slice(&converted.to_le_bytes());
            }
        }
        (32, false) => {
            for (i, &value) in samples[..count].iter().enumerate() {
                let converted = if value < 0.0 {
                    (-value * i32::MIN as f32) as i32
                } else {
                    (value * i32::MAX as f32) as i32
                };
                dest[i * 4..i * 4 + 4].copy_from_slice(&converted.to_le_bytes());
            }
        }
        (32, true) => {
            for (i, &value) in samples[..count].iter().enumerate() {
                dest[i * 4..i * 4 + 4].copy_from_slice(&value.to_le_bytes());
            }
        }
        _ => {
            warn!(
                bits_per_sample = format.bits_per_sample,
                is_float = format.is_float,
                "unsupported bits per sample for byte conversion"
            );
            return 0;
        }
    }

    count
}

/// Reads the sample at `sample_idx` from a PCM byte buffer as a float.
///
/// Used by upstream decoders and tests; unsupported depths read as
/// silence.
#[must_use]
pub fn sample_to_float(sample_idx: usize, src: &[u8], format: &AudioFormat) -> f32 {
    match (format.bits_per_sample, format.is_float) {
        (8, false) => f32::from(src[sample_idx]) / f32::from(u8::MAX),
        (16, false) => {
            let offset = sample_idx * 2;
            let value = i16::from_le_bytes([src[offset], src[offset + 1]]);
            if value < 0 {
                f32::from(value) / -(i16::MIN as f32)
            } else {
                f32::from(value) / i16::MAX as f32
            }
        }
        (32, false) => {
            let offset = sample_idx * 4;
            let value = i32::from_le_bytes([
                src[offset],
                src[offset + 1],
                src[offset + 2],
                src[offset + 3],
            ]);
            if value < 0 {
                value as f32 / -(i32::MIN as f32)
            } else {
                value as f32 / i32::MAX as f32
            }
        }
        (32, true) => {
            let offset = sample_idx * 4;
            f32::from_le_bytes([
                src[offset],
                src[offset + 1],
                src[offset + 2],
                src[offset + 3],
            ])
        }
        _ => 0.0,
    }
}

#[cfg(test)]
mod tests {
    use crate::audio::{
        format::AudioFormat,
        pcm::{sample_to_float, write_samples_to_bytes},
    };

    #[test]
    fn test_write_i16_extremes() {
        let format = AudioFormat::new(1, 44100, 16, false).unwrap();
        let samples = [-1.0f32, 0.0, 1.0];
        let mut dest = [0u8; 6];

        let written = write_samples_to_bytes(&samples, &mut dest, &format);
        assert_eq!(written, 3);

        assert_eq!(i16::from_le_bytes([dest[0], dest[1]]), i16::MIN);
        assert_eq!(i16::from_le_bytes([dest[2], dest[3]]), 0);
        assert_eq!(i16::from_le_bytes([dest[4], dest[5]]), i16::MAX);
    }

    #[test]
    fn test_write_f32_passthrough() {
        let format = AudioFormat::default();
        let samples = [0.25f32, -0.75];
        let mut dest = [0u8; 8];

        write_samples_to_bytes(&samples, &mut dest, &format);

        assert_eq!(f32::from_le_bytes([dest[0], dest[1], dest[2], dest[3]]), 0.25);
        assert_eq!(f32::from_le_bytes([dest[4], dest[5], dest[6], dest[7]]), -0.75);
    }

    #[test]
    fn test_write_truncates_to_dest() {
        let format = AudioFormat::new(1, 44100, 16, false).unwrap();
        let samples = [0.5f32; 8];
        let mut dest = [0u8; 6]; // room for 3 samples

        let written = write_samples_to_bytes(&samples, &mut dest, &format);
        assert_eq!(written, 3);
    }

    #[test]
    fn test_unsupported_depth_writes_nothing() {
        let format = AudioFormat::new(1, 44100, 24, false).unwrap();
        let samples = [0.5f32; 4];
        let mut dest = [0xAAu8; 12];

        let written = write_samples_to_bytes(&samples, &mut dest, &format);
        assert_eq!(written, 0);
        assert!(dest.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn test_round_trip_i16() {
        let format = AudioFormat::new(1, 44100, 16, false).unwrap();
        let samples = [-1.0f32, -0.5, 0.0, 0.5, 1.0];
        let mut dest = [0u8; 10];

        write_samples_to_bytes(&samples, &mut dest, &format);
        for (i, &expected) in samples.iter().enumerate() {
            let got = sample_to_float(i, &dest, &format);
            assert!(
                (got - expected).abs() < 1.0 / 32_000.0,
                "sample {i}: {got} vs {expected}"
            );
        }
    }

    #[test]
    fn test_round_trip_u8_positive_range() {
        let format = AudioFormat::new(1, 22050, 8, false).unwrap();
        let samples = [0.0f32, 0.25, 0.5, 1.0];
        let mut dest = [0u8; 4];

        write_samples_to_bytes(&samples, &mut dest, &format);
        for (i, &expected) in samples.iter().enumerate() {
            let got = sample_to_float(i, &dest, &format);
            assert!((got - expected).abs() < 1.0 / 250.0);
        }
    }
}

//! Audio format description shared by the conversion and streaming paths.
//!
//! An `AudioFormat` describes how PCM data is laid out: channel count,
//! sample rate, and the size/encoding of a single sample. It is an
//! immutable value type; streaming code copies it freely.

use serde::{Deserialize, Serialize};

use crate::error::domain::AudioError;

/// Description of a PCM data layout.
///
/// A *sample* is a single scalar value for one channel; a *frame* is one
/// sample per channel at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    /// Number of interleaved channels.
    pub channels: u16,
    /// Sample rate in Hz.
    pub sample_rate: u32,
    /// Size of a single sample in bits.
    pub bits_per_sample: u16,
    /// Whether samples are IEEE floats rather than integers.
    pub is_float: bool,
}

impl AudioFormat {
    /// Creates a validated audio format.
    ///
    /// # Errors
    ///
    /// Returns `AudioError::InvalidFormat` if `channels` is zero or
    /// `sample_rate` is zero.
    pub fn new(
        channels: u16,
        sample_rate: u32,
        bits_per_sample: u16,
        is_float: bool,
    ) -> Result<Self, AudioError> {
        if channels == 0 {
            return Err(AudioError::InvalidFormat {
                reason: "channel count must be at least 1".to_string(),
            });
        }
        if sample_rate == 0 {
            return Err(AudioError::InvalidFormat {
                reason: "sample rate must be greater than 0".to_string(),
            });
        }

        Ok(AudioFormat {
            channels,
            sample_rate,
            bits_per_sample,
            is_float,
        })
    }

    /// Size of a single sample in bytes.
    #[must_use]
    pub fn sample_size(&self) -> usize {
        usize::from(self.bits_per_sample) / 8
    }

    /// Size of a single frame (one sample per channel) in bytes.
    #[must_use]
    pub fn frame_size(&self) -> usize {
        self.sample_size() * usize::from(self.channels)
    }

    /// Number of frames that cover the given duration in seconds.
    #[must_use]
    pub fn seconds_to_frames(&self, seconds: f32) -> usize {
        (seconds * self.sample_rate as f32) as usize
    }

    /// Duration in seconds of the given number of frames.
    #[must_use]
    pub fn frames_to_seconds(&self, frames: usize) -> f32 {
        frames as f32 / self.sample_rate as f32
    }

    /// Duration in seconds of a byte buffer holding data in this format.
    #[must_use]
    pub fn duration_of_bytes(&self, byte_len: usize) -> f32 {
        let frame_size = self.frame_size();
        if frame_size == 0 {
            return 0.0;
        }
        self.frames_to_seconds(byte_len / frame_size)
    }

    /// Whether the bit depth is one the byte conversion path understands.
    ///
    /// Supported: unsigned 8-bit, signed 16-bit, signed 32-bit, 32-bit
    /// float. Other depths are streamed best-effort with a logged warning.
    #[must_use]
    pub fn is_supported_bit_depth(&self) -> bool {
        matches!(
            (self.bits_per_sample, self.is_float),
            (8, false) | (16, false) | (32, _)
        )
    }
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 32,
            is_float: true,
        }
    }
}

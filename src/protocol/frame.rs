//! Audio frame geometry and PCM conversion.
//!
//! Frames carry raw little-endian signed 16-bit mono PCM with no header.
//! Their size is fixed by configuration on both ends.

use crate::defaults;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Shape of the PCM stream exchanged between harness and server.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub bytes_per_sample: u16,
    pub frame_seconds: f64,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: defaults::SAMPLE_RATE,
            bytes_per_sample: defaults::BYTES_PER_SAMPLE,
            frame_seconds: defaults::FRAME_SECONDS,
        }
    }
}

impl AudioFormat {
    /// Same stream shape with a different frame duration.
    pub fn with_frame_seconds(self, frame_seconds: f64) -> Self {
        Self {
            frame_seconds,
            ..self
        }
    }

    /// Bytes of PCM per second of audio.
    pub fn bytes_per_second(&self) -> usize {
        self.sample_rate as usize * self.bytes_per_sample as usize
    }

    /// Size of one frame on the wire.
    pub fn frame_bytes(&self) -> usize {
        (self.bytes_per_second() as f64 * self.frame_seconds).round() as usize
    }

    /// Frame duration as a [`Duration`].
    pub fn frame_duration(&self) -> Duration {
        Duration::from_secs_f64(self.frame_seconds)
    }

    /// Audio duration represented by `bytes` of PCM.
    pub fn duration_of(&self, bytes: usize) -> Duration {
        let bps = self.bytes_per_second();
        if bps == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(bytes as f64 / bps as f64)
    }

    /// Number of samples needed to cover `seconds` of audio.
    pub fn samples_for(&self, seconds: f64) -> usize {
        let exact = seconds * self.sample_rate as f64;
        let nearest = exact.round();
        if (exact - nearest).abs() < 1e-6 {
            nearest as usize
        } else {
            exact.ceil() as usize
        }
    }
}

/// Zero-extend `bytes` to `frame_bytes` (silence in s16le).
///
/// Longer buffers are returned unchanged.
pub fn pad_frame(mut bytes: Vec<u8>, frame_bytes: usize) -> Vec<u8> {
    if bytes.len() < frame_bytes {
        bytes.resize(frame_bytes, 0);
    }
    bytes
}

/// Decode s16le PCM into samples normalized to [-1.0, 1.0).
///
/// A trailing odd byte cannot form a sample and is ignored.
pub fn decode_pcm16le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

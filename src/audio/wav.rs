//! WAV loading for recognizer warm-up.
//!
//! The server feeds the first second of a speech file to the recognizer at
//! startup so the first real chunk is not slowed down by lazy initialization.

use crate::defaults::SAMPLE_RATE;
use crate::error::{Result, StreamError};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Load up to `max_seconds` of a WAV file as 16kHz mono f32 samples.
pub fn load_warmup_file(path: &Path, max_seconds: f64) -> Result<Vec<f32>> {
    if !path.is_file() {
        return Err(StreamError::WarmupFileNotFound {
            path: path.display().to_string(),
        });
    }
    let file = File::open(path)?;
    load_wav(BufReader::new(file), max_seconds)
}

/// Decode WAV data from any reader, downmixing to mono and resampling to 16kHz.
///
/// Integer PCM of 8–32 bits and 32-bit float are accepted.
pub fn load_wav<R: Read>(reader: R, max_seconds: f64) -> Result<Vec<f32>> {
    let mut wav_reader = hound::WavReader::new(reader).map_err(|e| StreamError::AudioDecode {
        message: format!("Failed to parse WAV file: {}", e),
    })?;

    let spec = wav_reader.spec();
    if spec.channels == 0 {
        return Err(StreamError::AudioDecode {
            message: "WAV file declares zero channels".to_string(),
        });
    }

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => wav_reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>(),
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
            wav_reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()
        }
    }
    .map_err(|e| StreamError::AudioDecode {
        message: format!("Failed to read WAV samples: {}", e),
    })?;

    let mono = downmix(&interleaved, spec.channels as usize);
    let mut samples = resample(&mono, spec.sample_rate, SAMPLE_RATE);

    let limit = (max_seconds * SAMPLE_RATE as f64) as usize;
    samples.truncate(limit);
    Ok(samples)
}

/// Average interleaved channels into one.
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Simple linear interpolation resampling.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = source_pos.floor() as usize;
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[source_idx.min(samples.len() - 1)]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}

//! ffmpeg/ffprobe child processes that turn any media file into raw PCM.

use crate::error::{Result, StreamError};
use crate::protocol::AudioFormat;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::{Child, ChildStdout, Command};

/// External tool locations.
#[derive(Debug, Clone)]
pub struct TranscoderTools {
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for TranscoderTools {
    fn default() -> Self {
        Self {
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

/// Arguments asking ffprobe for the container duration in seconds.
pub fn probe_args(path: &Path) -> Vec<String> {
    vec![
        "-v".to_string(),
        "error".to_string(),
        "-show_entries".to_string(),
        "format=duration".to_string(),
        "-of".to_string(),
        "default=noprint_wrappers=1:nokey=1".to_string(),
        path.display().to_string(),
    ]
}

/// Arguments asking ffmpeg for headerless s16le mono PCM on stdout.
pub fn transcode_args(path: &Path, format: &AudioFormat) -> Vec<String> {
    vec![
        "-i".to_string(),
        path.display().to_string(),
        "-f".to_string(),
        "s16le".to_string(),
        "-acodec".to_string(),
        "pcm_s16le".to_string(),
        "-ar".to_string(),
        format.sample_rate.to_string(),
        "-ac".to_string(),
        "1".to_string(),
        "-".to_string(),
    ]
}

/// Parse ffprobe's duration output.
pub fn parse_duration(output: &str) -> Result<f64> {
    let trimmed = output.trim();
    trimmed
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d >= 0.0)
        .ok_or_else(|| StreamError::Transcoder {
            message: format!("Unexpected ffprobe duration output: {:?}", trimmed),
        })
}

/// Total duration of a media file, in seconds.
pub async fn probe_duration(tools: &TranscoderTools, path: &Path) -> Result<f64> {
    let output = Command::new(&tools.ffprobe)
        .args(probe_args(path))
        .stdin(Stdio::null())
        .output()
        .await
        .map_err(|e| StreamError::Transcoder {
            message: format!("Failed to run {}: {}", tools.ffprobe.display(), e),
        })?;

    if !output.status.success() {
        return Err(StreamError::Transcoder {
            message: format!(
                "ffprobe exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ),
        });
    }

    parse_duration(&String::from_utf8_lossy(&output.stdout))
}

/// Running ffmpeg process streaming PCM on its stdout.
#[derive(Debug)]
pub struct Transcoder {
    child: Child,
}

impl Transcoder {
    /// Start transcoding `path`.
    pub fn spawn(tools: &TranscoderTools, path: &Path, format: &AudioFormat) -> Result<Self> {
        let child = Command::new(&tools.ffmpeg)
            .args(transcode_args(path, format))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| StreamError::Transcoder {
                message: format!("Failed to run {}: {}", tools.ffmpeg.display(), e),
            })?;
        Ok(Self { child })
    }

    /// Take the PCM stream. Returns `None` if already taken.
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }

    /// Stop ffmpeg (it may still be running if the harness bailed out early).
    pub async fn terminate(mut self) -> Result<()> {
        match self.child.try_wait()? {
            Some(_) => Ok(()),
            None => {
                self.child.kill().await?;
                Ok(())
            }
        }
    }
}

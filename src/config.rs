use crate::defaults;
use crate::error::{Result, StreamError};
use crate::protocol::AudioFormat;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioFormat,
    pub server: ServerConfig,
    pub recognizer: RecognizerConfig,
    pub client: ClientConfig,
}

/// Transcription server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Sessions served concurrently; 1 serves connections one after another
    pub max_sessions: usize,
    /// Frames buffered between a connection's reader and its session
    pub frame_backlog: usize,
    /// Audio accumulated before the first recognizer call
    pub min_chunk_seconds: f64,
    /// Ask the recognizer for trailing text when the client disconnects
    pub flush_on_close: bool,
    pub warmup_file: Option<PathBuf>,
}

/// Recognizer backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognizerConfig {
    pub model_path: PathBuf,
    pub language: String,
    pub device: Device,
    pub threads: Option<usize>,
    pub buffer_trimming_seconds: f64,
}

/// Inference device
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
#[cfg_attr(feature = "cli", derive(clap::ValueEnum))]
pub enum Device {
    Cpu,
    Gpu,
}

/// Replay harness configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    pub host: String,
    pub port: u16,
    /// Seconds of audio per chunk; also the pacing interval
    pub chunk_seconds: f64,
    /// How long to wait for outstanding responses after the last chunk
    pub final_wait_ms: u64,
    /// Back-off before reading again after a socket read error
    pub poll_interval_ms: u64,
    pub ffmpeg: PathBuf,
    pub ffprobe: PathBuf,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: defaults::DEFAULT_HOST.to_string(),
            port: defaults::SERVER_PORT,
            max_sessions: defaults::MAX_SESSIONS,
            frame_backlog: defaults::FRAME_BACKLOG,
            min_chunk_seconds: defaults::MIN_CHUNK_SECONDS,
            flush_on_close: false,
            warmup_file: None,
        }
    }
}

impl Default for RecognizerConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(defaults::DEFAULT_MODEL_PATH),
            language: defaults::AUTO_LANGUAGE.to_string(),
            device: Device::Gpu,
            threads: None,
            buffer_trimming_seconds: defaults::BUFFER_TRIMMING_SECONDS,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: defaults::DEFAULT_HOST.to_string(),
            port: defaults::CLIENT_PORT,
            chunk_seconds: defaults::FRAME_SECONDS,
            final_wait_ms: defaults::FINAL_WAIT_MS,
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            ffmpeg: PathBuf::from("ffmpeg"),
            ffprobe: PathBuf::from("ffprobe"),
        }
    }
}

impl std::str::FromStr for Device {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Device::Cpu),
            "gpu" => Ok(Device::Gpu),
            other => Err(StreamError::ConfigInvalidValue {
                key: "recognizer.device".to_string(),
                message: format!("expected cpu or gpu, got '{}'", other),
            }),
        }
    }
}

impl ClientConfig {
    pub fn final_wait(&self) -> Duration {
        Duration::from_millis(self.final_wait_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                StreamError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                StreamError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file, or defaults if the file is missing.
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(StreamError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - STREAMSCRIBE_MODEL → recognizer.model_path
    /// - STREAMSCRIBE_LANGUAGE → recognizer.language
    /// - STREAMSCRIBE_DEVICE → recognizer.device (ignored if not cpu/gpu)
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(model) = std::env::var("STREAMSCRIBE_MODEL")
            && !model.is_empty()
        {
            self.recognizer.model_path = PathBuf::from(model);
        }

        if let Ok(language) = std::env::var("STREAMSCRIBE_LANGUAGE")
            && !language.is_empty()
        {
            self.recognizer.language = language;
        }

        if let Ok(device) = std::env::var("STREAMSCRIBE_DEVICE")
            && let Ok(device) = device.parse::<Device>()
        {
            self.recognizer.device = device;
        }

        self
    }

    /// Check values that would break frame geometry or pacing.
    pub fn validate(&self) -> Result<()> {
        fn invalid(key: &str, message: &str) -> StreamError {
            StreamError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            }
        }

        if self.audio.sample_rate == 0 {
            return Err(invalid("audio.sample_rate", "must be positive"));
        }
        if self.audio.bytes_per_sample != defaults::BYTES_PER_SAMPLE {
            return Err(invalid(
                "audio.bytes_per_sample",
                "only 16-bit PCM (2 bytes) is supported",
            ));
        }
        check_frame_seconds(&self.audio, "audio.frame_seconds", self.audio.frame_seconds)?;
        check_frame_seconds(&self.audio, "client.chunk_seconds", self.client.chunk_seconds)?;
        let min_chunk = self.server.min_chunk_seconds;
        if min_chunk.is_nan() || min_chunk < 0.0 {
            return Err(invalid("server.min_chunk_seconds", "must not be negative"));
        }
        if self.server.max_sessions == 0 {
            return Err(invalid("server.max_sessions", "must be at least 1"));
        }
        if self.server.frame_backlog == 0 {
            return Err(invalid("server.frame_backlog", "must be at least 1"));
        }
        if self.client.poll_interval_ms == 0 {
            return Err(invalid("client.poll_interval_ms", "must be positive"));
        }
        Ok(())
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/streamscribe/config.toml on Linux
    #[cfg(feature = "cli")]
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("streamscribe").join("config.toml"))
    }
}

fn check_frame_seconds(audio: &AudioFormat, key: &str, seconds: f64) -> Result<()> {
    if !(seconds.is_finite() && seconds > 0.0) {
        return Err(StreamError::ConfigInvalidValue {
            key: key.to_string(),
            message: "must be a positive number of seconds".to_string(),
        });
    }
    let samples = seconds * audio.sample_rate as f64;
    if (samples - samples.round()).abs() > 1e-6 {
        return Err(StreamError::ConfigInvalidValue {
            key: key.to_string(),
            message: format!("{} s is not a whole number of samples", seconds),
        });
    }
    Ok(())
}

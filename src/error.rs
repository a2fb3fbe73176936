//! Error types for streamscribe.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    #[error("Warm-up file not found at {path}")]
    WarmupFileNotFound { path: String },

    // Audio errors
    #[error("Audio decode failed: {message}")]
    AudioDecode { message: String },

    #[error("Transcoder failed: {message}")]
    Transcoder { message: String },

    // Recognition errors
    #[error("Recognizer model not found at {path}")]
    RecognizerModelNotFound { path: String },

    #[error("Recognition failed: {message}")]
    Recognition { message: String },

    // Transport errors
    #[error("Connection failed: {message}")]
    Connection { message: String },

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, StreamError>;

impl StreamError {
    /// ffmpeg, ffprobe or server connection trouble met by the replay harness.
    /// A replay reports these and exits normally.
    pub fn is_harness_io(&self) -> bool {
        matches!(self, Self::Transcoder { .. } | Self::Connection { .. })
    }
}

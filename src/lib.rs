//! streamscribe - streaming speech recognition over TCP
//!
//! A server that answers fixed-size PCM frames with timestamped transcript
//! lines, and a replay harness that streams recorded audio at real-time pace
//! and measures how long each chunk takes to come back.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod audio;
#[cfg(feature = "cli")]
pub mod cli;
pub mod client;
pub mod config;
pub mod defaults;
pub mod error;
pub mod protocol;
pub mod server;
pub mod stt;

// Wire protocol
pub use protocol::{AudioFormat, FrameRead, FrameReader, LineSplitter};

// Recognition
pub use stt::{Recognizer, RecognizerFactory, Segment};

// Server and harness
pub use client::{ReplayObserver, ReplayReport, ReplaySettings, replay};
pub use server::{Server, ServerSettings, SessionProcessor, SessionState};

// Error handling
pub use error::{Result, StreamError};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

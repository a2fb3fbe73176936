//! Command-line interface for streamscribe
//!
//! Provides argument parsing using clap derive macros.

use crate::config::{Config, Device};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Streaming speech recognition over TCP
#[derive(Parser, Debug)]
#[command(
    name = "streamscribe",
    version,
    about = "Streaming speech recognition server and real-time replay harness"
)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging (-v: per-frame diagnostics, -vv: everything)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Accept audio streams and answer each frame with a transcript line
    Serve {
        /// Address to listen on
        #[arg(long, value_name = "HOST")]
        host: Option<String>,

        /// Port to listen on (default: 43007)
        #[arg(long, value_name = "PORT")]
        port: Option<u16>,

        /// Run recognition on cpu or gpu
        #[arg(long, value_enum, value_name = "DEVICE")]
        device: Option<Device>,

        /// WAV file whose first second warms up the recognizer
        #[arg(long, value_name = "PATH")]
        warmup_file: Option<PathBuf>,

        /// Path to a ggml whisper model
        #[arg(long, value_name = "PATH")]
        model: Option<PathBuf>,

        /// Source language (default: auto-detect). Examples: auto, en, de
        #[arg(long, value_name = "LANG")]
        language: Option<String>,

        /// Seconds of audio collected before the first recognition pass
        #[arg(long, value_name = "SECONDS")]
        min_chunk_size: Option<f64>,

        /// Connections served at the same time (default: 1)
        #[arg(long, value_name = "N")]
        max_sessions: Option<usize>,

        /// Send the recognizer's final segment when a client disconnects
        #[arg(long)]
        flush_on_close: bool,
    },

    /// Stream an audio file to a server in real time and report latency
    Replay {
        /// Audio or video file readable by ffmpeg
        #[arg(value_name = "AUDIO")]
        audio: PathBuf,

        /// Server host
        #[arg(long, value_name = "HOST")]
        host: Option<String>,

        /// Server port (default: 43001)
        #[arg(long, value_name = "PORT")]
        port: Option<u16>,

        /// Chunk duration. Examples: 2, 0.5, 500ms
        #[arg(long, value_name = "DURATION", value_parser = parse_interval_secs)]
        interval: Option<f64>,

        /// How long to wait for outstanding responses after sending. Examples: 30, 30s, 1m
        #[arg(long, value_name = "DURATION", value_parser = parse_wait)]
        final_wait: Option<Duration>,

        /// Print one JSON object per event instead of text
        #[arg(long)]
        json: bool,
    },
}

impl Commands {
    /// Overlay explicitly given flags on top of `config`.
    pub fn apply_to(&self, config: &mut Config) {
        match self {
            Commands::Serve {
                host,
                port,
                device,
                warmup_file,
                model,
                language,
                min_chunk_size,
                max_sessions,
                flush_on_close,
            } => {
                if let Some(host) = host {
                    config.server.host = host.clone();
                }
                if let Some(port) = port {
                    config.server.port = *port;
                }
                if let Some(device) = device {
                    config.recognizer.device = *device;
                }
                if let Some(path) = warmup_file {
                    config.server.warmup_file = Some(path.clone());
                }
                if let Some(model) = model {
                    config.recognizer.model_path = model.clone();
                }
                if let Some(language) = language {
                    config.recognizer.language = language.clone();
                }
                if let Some(seconds) = min_chunk_size {
                    config.server.min_chunk_seconds = *seconds;
                }
                if let Some(n) = max_sessions {
                    config.server.max_sessions = *n;
                }
                if *flush_on_close {
                    config.server.flush_on_close = true;
                }
            }
            Commands::Replay {
                host,
                port,
                interval,
                final_wait,
                ..
            } => {
                if let Some(host) = host {
                    config.client.host = host.clone();
                }
                if let Some(port) = port {
                    config.client.port = *port;
                }
                if let Some(seconds) = interval {
                    config.client.chunk_seconds = *seconds;
                }
                if let Some(wait) = final_wait {
                    config.client.final_wait_ms = wait.as_millis() as u64;
                }
            }
        }
    }
}

/// Parse a chunk duration into fractional seconds.
///
/// Bare numbers are seconds (`2`, `0.5`); anything else goes through
/// `humantime` (`500ms`, `2s`).
fn parse_interval_secs(s: &str) -> Result<f64, String> {
    let s = s.trim();
    let secs = match s.parse::<f64>() {
        Ok(secs) => secs,
        Err(_) => humantime::parse_duration(s)
            .map(|d| d.as_secs_f64())
            .map_err(|e| e.to_string())?,
    };
    if !secs.is_finite() || secs <= 0.0 {
        return Err(format!("interval must be positive, got {}", s));
    }
    Ok(secs)
}

/// Parse a wait duration. Bare numbers are seconds.
fn parse_wait(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if let Ok(secs) = s.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

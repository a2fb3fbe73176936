use anyhow::{Context, Result};
use clap::Parser;
use owo_colors::OwoColorize;
use std::sync::Arc;
use streamscribe::cli::{Cli, Commands};
use streamscribe::client::report::ConsoleReporter;
use streamscribe::client::run_replay;
use streamscribe::config::Config;
use streamscribe::error::StreamError;
use streamscribe::server::{Server, ServerSettings, warm_up};
use streamscribe::stt::whisper::{WhisperConfig, WhisperRecognizerFactory};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.quiet, cli.verbose);

    let mut config = load_config(cli.config.as_deref())?;
    cli.command.apply_to(&mut config);
    config.validate()?;

    match cli.command {
        Commands::Serve { .. } => serve(config).await,
        Commands::Replay { audio, json, .. } => {
            let reporter = ConsoleReporter::stdout(json, config.audio.bytes_per_second());
            match run_replay(&audio, config.audio, &config.client, reporter).await {
                Ok(_) => Ok(()),
                // Harness I/O trouble is part of the run's outcome, not a crash.
                Err(e) if e.is_harness_io() => {
                    println!("{}", format!("Error: {}", e).red());
                    if matches!(e, StreamError::Connection { .. }) {
                        println!("Connection closed");
                    }
                    Ok(())
                }
                Err(e) => Err(e.into()),
            }
        }
    }
}

async fn serve(config: Config) -> Result<()> {
    tracing::info!(version = %streamscribe::version_string(), "Starting streamscribe server");

    tracing::info!(
        model = %config.recognizer.model_path.display(),
        language = %config.recognizer.language,
        device = ?config.recognizer.device,
        backend = streamscribe::defaults::gpu_backend(),
        "Loading recognizer"
    );
    let whisper = WhisperConfig::from(&config.recognizer);
    let factory = WhisperRecognizerFactory::new(whisper).context("Failed to load recognizer")?;

    if let Err(e) = warm_up(&factory, config.server.warmup_file.as_deref()) {
        if matches!(e, StreamError::WarmupFileNotFound { .. }) {
            eprintln!("{}", format!("Error: {}", e).red());
            std::process::exit(1);
        }
        return Err(e).context("Failed to warm up recognizer");
    }

    let server = Server::new(ServerSettings::from_config(&config), Arc::new(factory));
    server.run().await?;
    Ok(())
}

/// Install the stderr log subscriber.
///
/// `RUST_LOG` wins when set; otherwise -q, -v and -vv pick the level.
fn init_logging(quiet: bool, verbose: u8) {
    let level = match (quiet, verbose) {
        (true, _) => "warn",
        (false, 0) => "info",
        (false, 1) => "debug",
        (false, _) => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .init();
}

fn load_config(custom_path: Option<&std::path::Path>) -> Result<Config> {
    let config = if let Some(path) = custom_path {
        // Load from custom path
        Config::load(path)?
    } else {
        // Try default path, fall back to defaults
        match Config::default_path() {
            Some(path) => Config::load_or_default(&path)?,
            None => Config::default(),
        }
    };

    // Apply environment variable overrides
    Ok(config.with_env_overrides())
}

//! TCP transcription server.
//!
//! Each accepted connection becomes a session: a reader task reassembles
//! frames and hands them to the session processor over a bounded channel,
//! while the processor owns the write half and answers one line per frame.

pub mod session;

pub use session::{ConnectionSession, SessionConfig, SessionProcessor, SessionState, SessionSummary};

use crate::audio::wav::load_warmup_file;
use crate::config::Config;
use crate::defaults::WARMUP_SECONDS;
use crate::error::{Result, StreamError};
use crate::protocol::{FrameRead, FrameReader};
use crate::stt::RecognizerFactory;
use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Listening-side settings.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub max_sessions: usize,
    pub frame_backlog: usize,
    pub session: SessionConfig,
}

impl ServerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            host: config.server.host.clone(),
            port: config.server.port,
            max_sessions: config.server.max_sessions,
            frame_backlog: config.server.frame_backlog,
            session: SessionConfig {
                format: config.audio,
                min_chunk_seconds: config.server.min_chunk_seconds,
                flush_on_close: config.server.flush_on_close,
            },
        }
    }
}

/// Feed the recognizer a short speech sample before serving.
///
/// Without a file the server still runs, but the first chunk of the first
/// session pays for lazy initialization. A configured file that does not
/// exist is an error.
pub fn warm_up(factory: &dyn RecognizerFactory, warmup_file: Option<&Path>) -> Result<()> {
    let Some(path) = warmup_file else {
        warn!(
            "No warm-up file given; the first chunk may take longer to process. \
             Pass --warmup-file with a short speech sample to avoid this"
        );
        return Ok(());
    };

    let samples = load_warmup_file(path, WARMUP_SECONDS)?;
    let started = std::time::Instant::now();
    factory.warm_up(&samples)?;
    info!(
        recognizer = factory.name(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Recognizer warmed up with {}",
        path.display()
    );
    Ok(())
}

/// Accepts connections and runs a session for each.
pub struct Server {
    settings: ServerSettings,
    factory: Arc<dyn RecognizerFactory>,
}

impl Server {
    pub fn new(settings: ServerSettings, factory: Arc<dyn RecognizerFactory>) -> Self {
        Self { settings, factory }
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener> {
        let address = format!("{}:{}", self.settings.host, self.settings.port);
        TcpListener::bind(&address)
            .await
            .map_err(|e| StreamError::Connection {
                message: format!("Failed to bind {}: {}", address, e),
            })
    }

    /// Bind and serve until ctrl-c.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.serve(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for ctrl-c: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
        })
        .await
    }

    /// Serve connections from `listener` until `shutdown` completes.
    ///
    /// Sessions already running are allowed to finish.
    pub async fn serve<S>(&self, listener: TcpListener, shutdown: S) -> Result<()>
    where
        S: Future<Output = ()>,
    {
        let local = listener.local_addr()?;
        info!(
            address = %local,
            recognizer = self.factory.name(),
            max_sessions = self.settings.max_sessions,
            "Listening"
        );

        let permits = Arc::new(Semaphore::new(self.settings.max_sessions));
        let mut sessions = JoinSet::new();
        tokio::pin!(shutdown);

        loop {
            // Take the slot before accepting so excess clients wait in the backlog.
            let permit = tokio::select! {
                permit = Arc::clone(&permits).acquire_owned() => {
                    permit.map_err(|e| StreamError::Other(format!("Session limiter closed: {}", e)))?
                }
                _ = &mut shutdown => break,
            };

            let (stream, peer) = tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(100)).await;
                        continue;
                    }
                },
                _ = &mut shutdown => break,
            };

            info!(peer = %peer, "Connected to client");
            let factory = Arc::clone(&self.factory);
            let settings = self.settings.clone();
            sessions.spawn(async move {
                let _permit = permit;
                match handle_connection(stream, peer, factory.as_ref(), &settings).await {
                    Ok(summary) => info!(
                        peer = %peer,
                        frames = summary.frames_processed,
                        lines = summary.lines_sent,
                        bytes = summary.bytes_received,
                        "Connection to client closed"
                    ),
                    Err(e) => error!(peer = %peer, "Session failed: {}", e),
                }
            });

            while let Some(finished) = sessions.try_join_next() {
                if let Err(e) = finished {
                    error!("Session task panicked: {}", e);
                }
            }
        }

        drop(listener);
        if !sessions.is_empty() {
            info!(running = sessions.len(), "Waiting for running sessions to finish");
        }
        while let Some(finished) = sessions.join_next().await {
            if let Err(e) = finished {
                error!("Session task panicked: {}", e);
            }
        }
        info!("Server stopped");
        Ok(())
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    factory: &dyn RecognizerFactory,
    settings: &ServerSettings,
) -> Result<SessionSummary> {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(peer = %peer, "Failed to disable Nagle: {}", e);
    }
    let recognizer = factory.create()?;
    let (reader, mut writer) = stream.into_split();
    serve_connection(
        reader,
        &mut writer,
        SessionProcessor::new(settings.session, recognizer, &peer.to_string()),
        settings.session.format.frame_bytes(),
        settings.frame_backlog,
    )
    .await
}

/// Run one session over an arbitrary byte transport.
pub async fn serve_connection<R, W>(
    reader: R,
    writer: &mut W,
    processor: SessionProcessor,
    frame_bytes: usize,
    frame_backlog: usize,
) -> Result<SessionSummary>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin,
{
    if frame_bytes == 0 {
        return Err(StreamError::Protocol {
            message: "frame size must be at least one byte".to_string(),
        });
    }
    let (tx, rx) = mpsc::channel(frame_backlog.max(1));
    let pump = tokio::spawn(pump_frames(FrameReader::new(reader, frame_bytes), tx));

    let result = processor.run(rx, writer).await;

    // The processor may stop early (write failure); the reader must not
    // linger on a socket nobody answers.
    pump.abort();
    if let Err(e) = writer.shutdown().await {
        debug!("Failed to shut down writer: {}", e);
    }
    result
}

/// Read frames until the peer closes or the session stops listening.
async fn pump_frames<R>(mut reader: FrameReader<R>, frames: mpsc::Sender<FrameRead>)
where
    R: AsyncRead + Unpin,
{
    loop {
        let frame = match reader.next_frame().await {
            Ok(FrameRead::EndOfStream) => break,
            Ok(frame) => frame,
            Err(e) => {
                warn!("Read failed, ending session: {}", e);
                break;
            }
        };
        if frames.send(frame).await.is_err() {
            break;
        }
    }
    debug!(
        frames = reader.frames_read(),
        bytes = reader.bytes_received(),
        "Frame reader finished"
    );
}

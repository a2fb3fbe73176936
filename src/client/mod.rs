//! Replay harness: stream an audio file to a server in real time and
//! measure how long each chunk takes to come back as text.
//!
//! Sending and receiving run concurrently. The send task owns the write
//! half and paces chunks; the drain loop owns the read half and matches
//! lines to chunks. Chunk records flow from the first to the second over
//! an unbounded channel, and nothing else is shared.

pub mod correlator;
pub mod latency;
pub mod pacer;
#[cfg(feature = "cli")]
pub mod report;

pub use correlator::{
    ChunkResponse, CorrelationEvent, Correlator, PendingQueue, PendingSend, PollOutcome,
    Unanswered,
};
pub use latency::{LatencyStats, LatencyTracker};
pub use pacer::{ChunkSent, SendPacer, SendSummary};

use crate::audio::transcode::{Transcoder, TranscoderTools, probe_duration};
use crate::config::ClientConfig;
use crate::error::{Result, StreamError};
use crate::protocol::AudioFormat;
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::io::AsyncRead;
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Receives progress of a replay run as it happens.
pub trait ReplayObserver: Send {
    fn on_duration(&mut self, _seconds: f64) {}

    fn on_connected(&mut self, _address: &str) {}

    fn on_chunk_sent(&mut self, _chunk: &ChunkSent) {}

    fn on_received(&mut self, _bytes: usize) {}

    fn on_event(&mut self, _event: &CorrelationEvent) {}

    /// A read hiccup while polling; the run continues.
    fn on_poll_error(&mut self, error: &io::Error) {
        warn!("Error receiving: {}", error);
    }

    /// The send loop is done; `outstanding` chunks still await their line.
    fn on_sending_done(&mut self, _outstanding: usize) {}

    fn on_report(&mut self, _report: &ReplayReport) {}
}

/// Timing knobs for one run.
#[derive(Debug, Clone, Copy)]
pub struct ReplaySettings {
    /// Stream shape; `frame_seconds` is the chunk duration.
    pub format: AudioFormat,
    pub final_wait: Duration,
    /// Pause after a failed read; readiness itself is awaited.
    pub poll_interval: Duration,
}

impl ReplaySettings {
    pub fn from_config(audio: AudioFormat, client: &ClientConfig) -> Self {
        Self {
            format: audio.with_frame_seconds(client.chunk_seconds),
            final_wait: client.final_wait(),
            poll_interval: client.poll_interval(),
        }
    }
}

/// Everything a finished run observed.
#[derive(Debug, Clone, Default)]
pub struct ReplayReport {
    pub sent: SendSummary,
    /// Why sending stopped early, if it did.
    pub send_error: Option<String>,
    pub responses: Vec<ChunkResponse>,
    pub unsolicited: Vec<String>,
    pub unanswered: Vec<Unanswered>,
    pub latency: Option<LatencyStats>,
    pub bytes_received: u64,
    /// The server closed the connection before the harness did.
    pub server_closed: bool,
}

/// Replay a media file against the server configured in `client`.
///
/// Failing to probe or transcode the file is an error. Once connected,
/// transport problems end up in the report instead.
pub async fn run_replay<O>(
    audio: &Path,
    format: AudioFormat,
    client: &ClientConfig,
    mut observer: O,
) -> Result<(ReplayReport, O)>
where
    O: ReplayObserver + 'static,
{
    let tools = TranscoderTools {
        ffmpeg: client.ffmpeg.clone(),
        ffprobe: client.ffprobe.clone(),
    };
    let settings = ReplaySettings::from_config(format, client);

    let duration = probe_duration(&tools, audio).await?;
    observer.on_duration(duration);

    let mut transcoder = Transcoder::spawn(&tools, audio, &settings.format)?;
    let pcm = transcoder.take_stdout().ok_or_else(|| StreamError::Transcoder {
        message: "ffmpeg stdout unavailable".to_string(),
    })?;

    let address = format!("{}:{}", client.host, client.port);
    let stream = TcpStream::connect(&address)
        .await
        .map_err(|e| StreamError::Connection {
            message: format!("Failed to connect to {}: {}", address, e),
        })?;
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to disable Nagle: {}", e);
    }
    observer.on_connected(&address);

    let outcome = replay(pcm, stream, settings, observer).await;

    if let Err(e) = transcoder.terminate().await {
        warn!("Failed to stop ffmpeg: {}", e);
    }
    Ok(outcome)
}

/// Stream `source` over `stream` and collect the responses.
pub async fn replay<R, O>(
    source: R,
    stream: TcpStream,
    settings: ReplaySettings,
    observer: O,
) -> (ReplayReport, O)
where
    R: AsyncRead + Unpin + Send + 'static,
    O: ReplayObserver + 'static,
{
    let (reader, mut writer) = stream.into_split();
    let (records_tx, mut records) = mpsc::unbounded_channel();
    let pacer = SendPacer::new(settings.format);

    let sender = tokio::spawn(async move {
        let result = pacer.run(source, &mut writer, &records_tx).await;
        drop(records_tx);
        (result, writer)
    });

    let mut drain = Drain::new(observer);
    drain.run(&reader, &mut records, &settings).await;

    if !sender.is_finished() {
        sender.abort();
    }
    // Holding the write half until here keeps the connection open for the
    // final wait.
    let send_result = match sender.await {
        Ok((result, _writer)) => result.map_err(|e| e.to_string()),
        Err(e) if e.is_cancelled() => Err("stopped after the server closed".to_string()),
        Err(e) => Err(format!("send task failed: {}", e)),
    };

    while let Ok(chunk) = records.try_recv() {
        drain.track(&chunk);
    }
    drain.finish(send_result)
}

/// Read side of a run.
struct Drain<O> {
    observer: O,
    correlator: Correlator,
    latency: LatencyTracker,
    report: ReplayReport,
}

impl<O: ReplayObserver> Drain<O> {
    fn new(observer: O) -> Self {
        Self {
            observer,
            correlator: Correlator::new(),
            latency: LatencyTracker::new(),
            report: ReplayReport::default(),
        }
    }

    /// Poll for responses until every chunk is answered after sending
    /// stopped, the server closes, or the final wait runs out.
    async fn run(
        &mut self,
        reader: &OwnedReadHalf,
        records: &mut mpsc::UnboundedReceiver<ChunkSent>,
        settings: &ReplaySettings,
    ) {
        let mut sending = true;
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            if !sending && self.correlator.pending().is_empty() {
                break;
            }

            tokio::select! {
                record = records.recv(), if sending => match record {
                    Some(chunk) => self.track(&chunk),
                    None => {
                        sending = false;
                        deadline = Some(tokio::time::Instant::now() + settings.final_wait);
                        self.observer.on_sending_done(self.correlator.pending().len());
                    }
                },
                ready = reader.readable() => {
                    if let Err(e) = ready {
                        self.observer.on_poll_error(&e);
                        tokio::time::sleep(settings.poll_interval).await;
                        continue;
                    }
                    // A line may race ahead of the channel; take every
                    // announced record before matching.
                    while let Ok(chunk) = records.try_recv() {
                        self.track(&chunk);
                    }
                    match self.correlator.poll_once(reader) {
                        PollOutcome::Idle => {}
                        PollOutcome::Events { bytes, events } => {
                            self.report.bytes_received += bytes as u64;
                            self.observer.on_received(bytes);
                            self.absorb(events);
                        }
                        PollOutcome::Closed => {
                            let tail = self.correlator.close(Instant::now());
                            self.absorb(tail);
                            self.report.server_closed = true;
                            break;
                        }
                        PollOutcome::Failed(e) => {
                            self.observer.on_poll_error(&e);
                            tokio::time::sleep(settings.poll_interval).await;
                        }
                    }
                }
                _ = wait_until(deadline) => break,
            }
        }
    }

    fn track(&mut self, chunk: &ChunkSent) {
        self.report.sent.chunks += 1;
        self.report.sent.bytes_sent += chunk.padded_bytes as u64;
        self.report.sent.padded_bytes += chunk.padded_bytes.saturating_sub(chunk.audio_bytes) as u64;
        self.correlator.track(PendingSend::from(chunk));
        self.observer.on_chunk_sent(chunk);
    }

    fn absorb(&mut self, events: Vec<CorrelationEvent>) {
        for event in events {
            self.observer.on_event(&event);
            match event {
                CorrelationEvent::Response(response) => {
                    self.latency.record(response.latency);
                    self.report.responses.push(response);
                }
                CorrelationEvent::Unsolicited { text } => self.report.unsolicited.push(text),
            }
        }
    }

    fn finish(mut self, send_result: std::result::Result<SendSummary, String>) -> (ReplayReport, O) {
        match send_result {
            Ok(summary) => self.report.sent = summary,
            Err(message) => self.report.send_error = Some(message),
        }
        self.report.unanswered = self.correlator.finish(Instant::now());
        self.report.latency = self.latency.stats();
        self.observer.on_report(&self.report);
        (self.report, self.observer)
    }
}

async fn wait_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

//! One client connection: frames in, timestamped text lines out.

use crate::defaults::NO_INPUT;
use crate::error::{Result, StreamError};
use crate::protocol::{AudioFormat, FrameRead, decode_pcm16le, encode_line};
use crate::stt::{Recognizer, Segment};
use std::time::Instant;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accumulating audio until the recognizer has its minimum chunk.
    WarmingUp,
    /// Every frame produces one output line.
    Streaming,
    Closed,
}

/// Per-session knobs, derived from the server configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionConfig {
    pub format: AudioFormat,
    pub min_chunk_seconds: f64,
    pub flush_on_close: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            format: AudioFormat::default(),
            min_chunk_seconds: crate::defaults::MIN_CHUNK_SECONDS,
            flush_on_close: false,
        }
    }
}

/// Timeline bookkeeping shared by every line of one connection.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSession {
    pub is_first_frame: bool,
    pub frame_count: u64,
    /// End of the last emitted interval, in milliseconds.
    pub last_end_ms: Option<f64>,
}

impl ConnectionSession {
    pub fn new() -> Self {
        Self {
            is_first_frame: true,
            frame_count: 0,
            last_end_ms: None,
        }
    }

    /// Render a recognizer result as an output line.
    ///
    /// Begin times are pulled forward so consecutive intervals never overlap.
    pub fn format_output(&mut self, segment: Option<&Segment>) -> String {
        let Some(segment) = segment else {
            return NO_INPUT.to_string();
        };

        let mut begin_ms = segment.begin_seconds * 1000.0;
        let end_ms = segment.end_seconds * 1000.0;
        if let Some(last_end) = self.last_end_ms {
            begin_ms = begin_ms.max(last_end);
        }
        self.last_end_ms = Some(end_ms);

        format!("{:.0} {:.0} {}", begin_ms, end_ms, segment.text)
    }
}

/// What a finished session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub frames_processed: u64,
    pub lines_sent: u64,
    pub bytes_received: u64,
    pub partial_frames: u64,
    pub state: SessionState,
}

/// Drives a recognizer from a stream of frames.
pub struct SessionProcessor {
    config: SessionConfig,
    recognizer: Option<Box<dyn Recognizer>>,
    state: SessionState,
    session: ConnectionSession,
    warmup: Vec<f32>,
    peer: String,
    lines_sent: u64,
    bytes_received: u64,
    partial_frames: u64,
}

impl SessionProcessor {
    pub fn new(config: SessionConfig, recognizer: Box<dyn Recognizer>, peer: &str) -> Self {
        Self {
            config,
            recognizer: Some(recognizer),
            state: SessionState::WarmingUp,
            session: ConnectionSession::new(),
            warmup: Vec::new(),
            peer: peer.to_string(),
            lines_sent: 0,
            bytes_received: 0,
            partial_frames: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Consume frames until the sender goes away, writing one line per
    /// processed frame.
    ///
    /// A failed write ends the session quietly. Recognizer errors are
    /// returned.
    pub async fn run<W>(
        mut self,
        mut frames: mpsc::Receiver<FrameRead>,
        writer: &mut W,
    ) -> Result<SessionSummary>
    where
        W: AsyncWrite + Unpin,
    {
        self.call_recognizer(|recognizer| {
            recognizer.init();
            Ok(())
        })
        .await?;

        while let Some(frame) = frames.recv().await {
            let bytes = match frame {
                FrameRead::Complete(bytes) => bytes,
                FrameRead::Partial(bytes) => {
                    warn!(
                        peer = %self.peer,
                        bytes = bytes.len(),
                        expected = self.config.format.frame_bytes(),
                        "Connection closed mid-frame, processing partial frame"
                    );
                    self.partial_frames += 1;
                    bytes
                }
                FrameRead::EndOfStream => break,
            };
            self.bytes_received += bytes.len() as u64;
            debug!(peer = %self.peer, bytes = bytes.len(), "Received audio frame");

            let Some(samples) = self.accept_samples(decode_pcm16le(&bytes)) else {
                continue;
            };

            self.session.frame_count += 1;
            let started = Instant::now();
            let output = self
                .call_recognizer(move |recognizer| {
                    recognizer.insert_audio_chunk(&samples);
                    recognizer.process_iter()
                })
                .await?;
            debug!(
                peer = %self.peer,
                frame = self.session.frame_count,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Recognizer iteration finished"
            );

            let line = self.session.format_output(output.as_ref());
            if let Err(e) = write_line(writer, &line).await {
                error!(peer = %self.peer, "Failed to send line: {}", e);
                return Ok(self.close());
            }
            info!(peer = %self.peer, frame = self.session.frame_count, "{}", line);
            self.lines_sent += 1;
        }

        if self.config.flush_on_close && self.state == SessionState::Streaming {
            self.flush(writer).await?;
        }

        Ok(self.close())
    }

    /// Warm-up gate. Returns the samples to feed the recognizer, or `None`
    /// while the minimum chunk is still being collected.
    fn accept_samples(&mut self, samples: Vec<f32>) -> Option<Vec<f32>> {
        if self.state != SessionState::WarmingUp {
            return Some(samples);
        }

        self.warmup.extend(samples);
        let needed = self
            .config
            .format
            .samples_for(self.config.min_chunk_seconds);
        if self.warmup.len() < needed {
            debug!(
                peer = %self.peer,
                collected = self.warmup.len(),
                needed,
                "Warming up"
            );
            return None;
        }

        self.state = SessionState::Streaming;
        self.session.is_first_frame = false;
        Some(std::mem::take(&mut self.warmup))
    }

    async fn flush<W>(&mut self, writer: &mut W) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        let output = self.call_recognizer(|recognizer| recognizer.finish()).await?;
        let Some(segment) = output.filter(|s| !s.text.trim().is_empty()) else {
            return Ok(());
        };

        let line = self.session.format_output(Some(&segment));
        match write_line(writer, &line).await {
            Ok(()) => {
                info!(peer = %self.peer, "{} (final)", line);
                self.lines_sent += 1;
            }
            Err(e) => error!(peer = %self.peer, "Failed to send final line: {}", e),
        }
        Ok(())
    }

    /// Run a recognizer call on the blocking pool.
    async fn call_recognizer<T, F>(&mut self, call: F) -> Result<T>
    where
        F: FnOnce(&mut dyn Recognizer) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let mut recognizer = self.recognizer.take().ok_or_else(|| StreamError::Recognition {
            message: "Recognizer lost by an earlier failed call".to_string(),
        })?;

        let (recognizer, result) = tokio::task::spawn_blocking(move || {
            let result = call(recognizer.as_mut());
            (recognizer, result)
        })
        .await
        .map_err(|e| StreamError::Recognition {
            message: format!("Recognizer task failed: {}", e),
        })?;

        self.recognizer = Some(recognizer);
        result
    }

    fn close(mut self) -> SessionSummary {
        self.state = SessionState::Closed;
        SessionSummary {
            frames_processed: self.session.frame_count,
            lines_sent: self.lines_sent,
            bytes_received: self.bytes_received,
            partial_frames: self.partial_frames,
            state: self.state,
        }
    }
}

async fn write_line<W>(writer: &mut W, line: &str) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&encode_line(line)).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stt::recognizer::ScriptedRecognizer;
    use std::io;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    fn config(frame_seconds: f64, min_chunk_seconds: f64) -> SessionConfig {
        SessionConfig {
            format: AudioFormat::default().with_frame_seconds(frame_seconds),
            min_chunk_seconds,
            flush_on_close: false,
        }
    }

    fn frames(items: Vec<FrameRead>) -> mpsc::Receiver<FrameRead> {
        let (tx, rx) = mpsc::channel(items.len().max(1));
        for item in items {
            tx.try_send(item).unwrap();
        }
        rx
    }

    fn lines(output: &[u8]) -> Vec<String> {
        String::from_utf8(output.to_vec())
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    struct BrokenWriter;

    impl AsyncWrite for BrokenWriter {
        fn poll_write(
            self: Pin<&mut Self>,
            _cx: &mut Context<'_>,
            _buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)))
        }

        fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }

        fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Poll::Ready(Ok(()))
        }
    }

    #[test]
    fn no_output_is_no_input() {
        let mut session = ConnectionSession::new();
        assert_eq!(session.format_output(None), "No input");
        assert_eq!(session.last_end_ms, None);
    }

    #[test]
    fn overlapping_begin_is_clamped_to_previous_end() {
        let mut session = ConnectionSession::new();
        assert_eq!(
            session.format_output(Some(&Segment::new(0.0, 1.5, "hello"))),
            "0 1500 hello"
        );
        assert_eq!(
            session.format_output(Some(&Segment::new(1.2, 2.8, "world"))),
            "1500 2800 world"
        );
        // No input in between does not reset the timeline.
        assert_eq!(session.format_output(None), "No input");
        assert_eq!(
            session.format_output(Some(&Segment::new(2.0, 4.0, "again"))),
            "2800 4000 again"
        );
    }

    #[test]
    fn non_overlapping_begin_is_kept() {
        let mut session = ConnectionSession::new();
        session.format_output(Some(&Segment::new(0.0, 1.0, "a")));
        assert_eq!(
            session.format_output(Some(&Segment::new(3.25, 4.0, "b"))),
            "3250 4000 b"
        );
    }

    #[tokio::test]
    async fn five_seconds_in_two_second_frames_gives_three_lines() {
        let format = AudioFormat::default();
        let recognizer = ScriptedRecognizer::new(vec![
            Some(Segment::new(0.0, 1.8, "one")),
            None,
            Some(Segment::new(1.5, 4.9, "three")),
        ]);
        let log = recognizer.log();
        let processor = SessionProcessor::new(config(2.0, 1.0), Box::new(recognizer), "test");

        let mut output = Vec::new();
        let summary = processor
            .run(
                frames(vec![
                    FrameRead::Complete(vec![0u8; format.frame_bytes()]),
                    FrameRead::Complete(vec![0u8; format.frame_bytes()]),
                    FrameRead::Partial(vec![0u8; 32000]),
                ]),
                &mut output,
            )
            .await
            .unwrap();

        assert_eq!(
            lines(&output),
            vec!["0 1800 one", "No input", "1800 4900 three"]
        );
        assert_eq!(summary.frames_processed, 3);
        assert_eq!(summary.lines_sent, 3);
        assert_eq!(summary.partial_frames, 1);
        assert_eq!(summary.bytes_received, 160_000);
        assert_eq!(summary.state, SessionState::Closed);
        assert_eq!(log.inserted(), vec![32000, 32000, 16000]);
    }

    #[tokio::test]
    async fn empty_connection_sends_nothing() {
        let recognizer = ScriptedRecognizer::new(vec![Some(Segment::new(0.0, 1.0, "x"))]);
        let log = recognizer.log();
        let processor = SessionProcessor::new(config(2.0, 1.0), Box::new(recognizer), "test");

        let mut output = Vec::new();
        let summary = processor
            .run(frames(vec![FrameRead::EndOfStream]), &mut output)
            .await
            .unwrap();

        assert!(output.is_empty());
        assert_eq!(summary.frames_processed, 0);
        assert_eq!(summary.lines_sent, 0);
        assert_eq!(log.iterations(), 0);
    }

    #[tokio::test]
    async fn warm_up_accumulates_small_frames() {
        // 0.5 s frames, 1.0 s minimum chunk: first frame is held back.
        let recognizer = ScriptedRecognizer::new(vec![Some(Segment::new(0.0, 1.0, "hi"))]);
        let log = recognizer.log();
        let processor = SessionProcessor::new(config(0.5, 1.0), Box::new(recognizer), "test");

        let mut output = Vec::new();
        let summary = processor
            .run(
                frames(vec![
                    FrameRead::Complete(vec![0u8; 16000]),
                    FrameRead::Complete(vec![0u8; 16000]),
                    FrameRead::Complete(vec![0u8; 16000]),
                ]),
                &mut output,
            )
            .await
            .unwrap();

        assert_eq!(lines(&output), vec!["0 1000 hi", "No input"]);
        assert_eq!(log.inserted(), vec![16000, 8000]);
        assert_eq!(summary.frames_processed, 2);
        assert_eq!(summary.bytes_received, 48000);
    }

    #[tokio::test]
    async fn short_connection_never_leaves_warm_up() {
        let recognizer = ScriptedRecognizer::new(vec![]);
        let log = recognizer.log();
        let processor = SessionProcessor::new(config(0.5, 1.0), Box::new(recognizer), "test");

        let mut output = Vec::new();
        let summary = processor
            .run(
                frames(vec![FrameRead::Complete(vec![0u8; 16000])]),
                &mut output,
            )
            .await
            .unwrap();

        assert!(output.is_empty());
        assert_eq!(summary.lines_sent, 0);
        assert!(log.inserted().is_empty());
    }

    #[tokio::test]
    async fn recognizer_error_ends_session() {
        let recognizer = ScriptedRecognizer::new(vec![Some(Segment::new(0.0, 1.0, "a"))])
            .with_failure_at(2);
        let processor = SessionProcessor::new(config(0.5, 0.0), Box::new(recognizer), "test");

        let mut output = Vec::new();
        let result = processor
            .run(
                frames(vec![
                    FrameRead::Complete(vec![0u8; 16000]),
                    FrameRead::Complete(vec![0u8; 16000]),
                    FrameRead::Complete(vec![0u8; 16000]),
                ]),
                &mut output,
            )
            .await;

        match result {
            Err(StreamError::Recognition { message }) => {
                assert!(message.contains("iteration 2"))
            }
            other => panic!("Expected Recognition error, got {:?}", other),
        }
        assert_eq!(lines(&output), vec!["0 1000 a"]);
    }

    #[tokio::test]
    async fn write_failure_ends_session_without_error() {
        let recognizer = ScriptedRecognizer::new(vec![]);
        let log = recognizer.log();
        let processor = SessionProcessor::new(config(0.5, 0.0), Box::new(recognizer), "test");

        let summary = processor
            .run(
                frames(vec![
                    FrameRead::Complete(vec![0u8; 16000]),
                    FrameRead::Complete(vec![0u8; 16000]),
                ]),
                &mut BrokenWriter,
            )
            .await
            .unwrap();

        assert_eq!(summary.lines_sent, 0);
        assert_eq!(summary.frames_processed, 1);
        assert_eq!(summary.state, SessionState::Closed);
        assert_eq!(log.iterations(), 1);
    }

    #[tokio::test]
    async fn flush_on_close_sends_final_segment() {
        let recognizer = ScriptedRecognizer::new(vec![Some(Segment::new(0.0, 0.4, "start"))])
            .with_final(Segment::new(0.2, 0.5, "end"));
        let log = recognizer.log();
        let mut cfg = config(0.5, 0.0);
        cfg.flush_on_close = true;
        let processor = SessionProcessor::new(cfg, Box::new(recognizer), "test");

        let mut output = Vec::new();
        let summary = processor
            .run(
                frames(vec![FrameRead::Complete(vec![0u8; 16000])]),
                &mut output,
            )
            .await
            .unwrap();

        assert_eq!(lines(&output), vec!["0 400 start", "400 500 end"]);
        assert_eq!(summary.lines_sent, 2);
        assert_eq!(log.finishes.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn finish_is_skipped_by_default() {
        let recognizer =
            ScriptedRecognizer::new(vec![None]).with_final(Segment::new(0.0, 0.5, "tail"));
        let log = recognizer.log();
        let processor = SessionProcessor::new(config(0.5, 0.0), Box::new(recognizer), "test");

        let mut output = Vec::new();
        processor
            .run(
                frames(vec![FrameRead::Complete(vec![0u8; 16000])]),
                &mut output,
            )
            .await
            .unwrap();

        assert_eq!(lines(&output), vec!["No input"]);
        assert_eq!(log.finishes.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}

//! Real-time paced transmission of PCM chunks.

use crate::error::{Result, StreamError};
use crate::protocol::{AudioFormat, FrameReader, pad_frame};
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;

/// One chunk that went out on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkSent {
    /// 1-based send order.
    pub sequence: u64,
    /// Audio bytes taken from the source.
    pub audio_bytes: usize,
    /// Bytes written, silence padding included.
    pub padded_bytes: usize,
    pub sent_at: Instant,
}

/// Totals for a completed send loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendSummary {
    pub chunks: u64,
    pub bytes_sent: u64,
    /// Zero bytes appended to the final chunk.
    pub padded_bytes: u64,
}

/// Sends one chunk per chunk duration, as a live microphone would.
#[derive(Debug, Clone, Copy)]
pub struct SendPacer {
    chunk_bytes: usize,
    interval: Duration,
}

impl SendPacer {
    /// `format.frame_seconds` is the chunk duration.
    pub fn new(format: AudioFormat) -> Self {
        Self {
            chunk_bytes: format.frame_bytes(),
            interval: format.frame_duration(),
        }
    }

    pub fn chunk_bytes(&self) -> usize {
        self.chunk_bytes
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stream `source` to `writer` until the source runs dry.
    ///
    /// Every chunk is announced on `sent` before it is written, so a
    /// response can never arrive ahead of its record. The short final chunk
    /// is padded with silence to full size.
    pub async fn run<R, W>(
        &self,
        source: R,
        writer: &mut W,
        sent: &mpsc::UnboundedSender<ChunkSent>,
    ) -> Result<SendSummary>
    where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        if self.chunk_bytes == 0 {
            return Err(StreamError::Protocol {
                message: "chunk size must be at least one byte".to_string(),
            });
        }
        let mut reader = FrameReader::new(source, self.chunk_bytes);
        let mut summary = SendSummary::default();
        let mut last_send: Option<tokio::time::Instant> = None;

        let mut next = reader.next_frame().await?;
        while let Some(audio) = next.into_bytes() {
            let audio_bytes = audio.len();
            let chunk = pad_frame(audio, self.chunk_bytes);

            if let Some(previous) = last_send {
                tokio::time::sleep_until(previous + self.interval).await;
            }

            let now = tokio::time::Instant::now();
            summary.chunks += 1;
            let record = ChunkSent {
                sequence: summary.chunks,
                audio_bytes,
                padded_bytes: chunk.len(),
                sent_at: now.into_std(),
            };
            sent.send(record).map_err(|_| StreamError::Connection {
                message: "Response reader stopped".to_string(),
            })?;

            writer
                .write_all(&chunk)
                .await
                .map_err(|e| StreamError::Connection {
                    message: format!("Failed to send chunk {}: {}", record.sequence, e),
                })?;
            last_send = Some(now);

            summary.bytes_sent += chunk.len() as u64;
            summary.padded_bytes += (chunk.len() - audio_bytes) as u64;

            next = reader.next_frame().await?;
        }

        writer.flush().await?;
        Ok(summary)
    }
}

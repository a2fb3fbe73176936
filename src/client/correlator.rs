//! Pairs response lines with the chunks that caused them.
//!
//! The server answers every processed chunk with exactly one line and in
//! order, so the oldest outstanding chunk owns the next line that arrives.

use crate::client::pacer::ChunkSent;
use crate::defaults::RECV_BUFFER_BYTES;
use crate::protocol::{LineSplitter, is_disconnect};
use std::collections::VecDeque;
use std::io;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedReadHalf;

/// A chunk still waiting for its line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingSend {
    pub sequence: u64,
    pub sent_at: Instant,
}

impl From<&ChunkSent> for PendingSend {
    fn from(chunk: &ChunkSent) -> Self {
        Self {
            sequence: chunk.sequence,
            sent_at: chunk.sent_at,
        }
    }
}

/// A chunk that never got its line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unanswered {
    pub sequence: u64,
    pub waited: Duration,
}

/// FIFO of outstanding chunks.
#[derive(Debug, Default)]
pub struct PendingQueue {
    records: VecDeque<PendingSend>,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: PendingSend) {
        self.records.push_back(record);
    }

    pub fn pop_oldest(&mut self) -> Option<PendingSend> {
        self.records.pop_front()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Empty the queue, reporting how long each record waited.
    pub fn drain_unanswered(&mut self, now: Instant) -> Vec<Unanswered> {
        self.records
            .drain(..)
            .map(|record| Unanswered {
                sequence: record.sequence,
                waited: now.saturating_duration_since(record.sent_at),
            })
            .collect()
    }
}

/// A line matched to its chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkResponse {
    pub sequence: u64,
    pub latency: Duration,
    pub text: String,
}

/// Result of feeding received bytes to the correlator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorrelationEvent {
    Response(ChunkResponse),
    /// A line arrived while no chunk was outstanding.
    Unsolicited { text: String },
}

/// Result of one non-blocking poll of the socket.
#[derive(Debug)]
pub enum PollOutcome {
    /// Nothing to read right now.
    Idle,
    Events {
        bytes: usize,
        events: Vec<CorrelationEvent>,
    },
    /// The server closed the connection.
    Closed,
    /// Transient read failure; callers log it and poll again later.
    Failed(io::Error),
}

/// Sockets that can be read without waiting.
pub trait TryRead {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;
}

impl TryRead for OwnedReadHalf {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        OwnedReadHalf::try_read(self, buf)
    }
}

impl TryRead for TcpStream {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        TcpStream::try_read(self, buf)
    }
}

/// Matches response lines to outstanding chunks, oldest first.
#[derive(Debug)]
pub struct Correlator {
    pending: PendingQueue,
    splitter: LineSplitter,
    buffer: Vec<u8>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            pending: PendingQueue::new(),
            splitter: LineSplitter::new(),
            buffer: vec![0u8; RECV_BUFFER_BYTES],
        }
    }

    pub fn track(&mut self, record: PendingSend) {
        self.pending.push(record);
    }

    pub fn pending(&self) -> &PendingQueue {
        &self.pending
    }

    /// Split `bytes` into lines and match each non-empty one.
    ///
    /// Several lines in one read are matched in order; a line cut across
    /// reads is held until its newline arrives.
    pub fn ingest(&mut self, bytes: &[u8], now: Instant) -> Vec<CorrelationEvent> {
        self.splitter
            .push(bytes)
            .into_iter()
            .filter_map(|line| self.correlate(line, now))
            .collect()
    }

    /// Read whatever is available from `socket` without blocking.
    pub fn poll_once<S: TryRead>(&mut self, socket: &S) -> PollOutcome {
        let read = socket.try_read(&mut self.buffer);
        match read {
            Ok(0) => PollOutcome::Closed,
            Ok(n) => {
                let received = self.buffer[..n].to_vec();
                PollOutcome::Events {
                    bytes: n,
                    events: self.ingest(&received, Instant::now()),
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => PollOutcome::Idle,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => PollOutcome::Idle,
            Err(e) if is_disconnect(&e) => PollOutcome::Closed,
            Err(e) => PollOutcome::Failed(e),
        }
    }

    /// Match a trailing line the server sent without a newline before closing.
    pub fn close(&mut self, now: Instant) -> Vec<CorrelationEvent> {
        self.splitter
            .finish()
            .and_then(|line| self.correlate(line, now))
            .into_iter()
            .collect()
    }

    /// Give up on everything still outstanding.
    pub fn finish(&mut self, now: Instant) -> Vec<Unanswered> {
        self.pending.drain_unanswered(now)
    }

    fn correlate(&mut self, line: String, now: Instant) -> Option<CorrelationEvent> {
        if line.trim().is_empty() {
            return None;
        }
        Some(match self.pending.pop_oldest() {
            Some(record) => CorrelationEvent::Response(ChunkResponse {
                sequence: record.sequence,
                latency: now.saturating_duration_since(record.sent_at),
                text: line,
            }),
            None => CorrelationEvent::Unsolicited { text: line },
        })
    }
}

//! Operator-facing output of the replay harness.
//!
//! Human mode prints colored progress lines; JSON mode prints one object
//! per event for scripts.

use crate::client::latency::format_duration;
use crate::client::{ChunkSent, CorrelationEvent, ReplayObserver, ReplayReport};
use owo_colors::OwoColorize;
use serde::Serialize;
use std::io::{self, Write};
use std::time::Instant;

/// Machine-readable event, one JSON object per line.
#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum ReportEvent<'a> {
    Duration {
        seconds: f64,
    },
    Connected {
        address: &'a str,
    },
    Sent {
        chunk: u64,
        bytes: usize,
        audio_bytes: usize,
        at_seconds: f64,
    },
    Received {
        bytes: usize,
    },
    Response {
        chunk: u64,
        latency_ms: f64,
        text: &'a str,
    },
    Unsolicited {
        text: &'a str,
    },
    SendingDone {
        outstanding: usize,
    },
    Unanswered {
        chunk: u64,
        waited_seconds: f64,
    },
    Summary {
        chunks_sent: u64,
        bytes_sent: u64,
        responses: usize,
        unanswered: usize,
        unsolicited: usize,
        latency: Option<crate::client::LatencyStats>,
        send_error: Option<&'a str>,
        server_closed: bool,
    },
}

/// Prints replay progress to a writer (stdout in the binary).
pub struct ConsoleReporter<W> {
    out: W,
    json: bool,
    started: Instant,
    bytes_per_second: usize,
}

impl ConsoleReporter<io::Stdout> {
    pub fn stdout(json: bool, bytes_per_second: usize) -> Self {
        Self::new(io::stdout(), json, bytes_per_second)
    }
}

impl<W: Write> ConsoleReporter<W> {
    /// `bytes_per_second` converts chunk sizes into audio seconds.
    pub fn new(out: W, json: bool, bytes_per_second: usize) -> Self {
        Self {
            out,
            json,
            started: Instant::now(),
            bytes_per_second,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, event: &ReportEvent<'_>, text: impl FnOnce() -> String) {
        if !self.json {
            self.say(&text());
            return;
        }
        match serde_json::to_string(event) {
            Ok(json) => self.say(&json),
            Err(e) => tracing::warn!("Failed to encode report event: {}", e),
        }
    }

    /// Human-mode only line.
    fn note(&mut self, text: &str) {
        if !self.json {
            self.say(text);
        }
    }

    fn say(&mut self, line: &str) {
        if let Err(e) = writeln!(self.out, "{}", line).and_then(|()| self.out.flush()) {
            tracing::debug!("Failed to write report: {}", e);
        }
    }
}

impl<W: Write + Send> ReplayObserver for ConsoleReporter<W> {
    fn on_duration(&mut self, seconds: f64) {
        self.emit(&ReportEvent::Duration { seconds }, || {
            format!("Audio duration: {:.2} seconds", seconds)
        });
    }

    fn on_connected(&mut self, address: &str) {
        self.emit(&ReportEvent::Connected { address }, || {
            format!("Connected to {}", address.green())
        });
    }

    fn on_chunk_sent(&mut self, chunk: &ChunkSent) {
        let at = chunk.sent_at.saturating_duration_since(self.started).as_secs_f64();
        let audio_seconds = chunk.audio_bytes as f64 / self.bytes_per_second.max(1) as f64;
        let event = ReportEvent::Sent {
            chunk: chunk.sequence,
            bytes: chunk.padded_bytes,
            audio_bytes: chunk.audio_bytes,
            at_seconds: at,
        };
        self.emit(&event, || {
            let mut line = format!(
                "Sent chunk {}: {} bytes ({:.2} seconds) at {:.3}s",
                chunk.sequence, chunk.audio_bytes, audio_seconds, at
            );
            let padding = chunk.padded_bytes.saturating_sub(chunk.audio_bytes);
            if padding > 0 {
                line.push_str(&format!(
                    "\n{}",
                    format!("Padded final chunk with {} bytes of silence", padding).dimmed()
                ));
            }
            line
        });
    }

    fn on_received(&mut self, bytes: usize) {
        self.emit(&ReportEvent::Received { bytes }, || {
            format!("{}", format!("Received {} bytes of response data", bytes).dimmed())
        });
    }

    fn on_event(&mut self, event: &CorrelationEvent) {
        match event {
            CorrelationEvent::Response(response) => {
                let report = ReportEvent::Response {
                    chunk: response.sequence,
                    latency_ms: response.latency.as_micros() as f64 / 1000.0,
                    text: &response.text,
                };
                self.emit(&report, || {
                    format!(
                        "Response for chunk {} after {}: {}",
                        response.sequence,
                        format_duration(response.latency).yellow(),
                        response.text.green()
                    )
                });
            }
            CorrelationEvent::Unsolicited { text } => {
                self.emit(&ReportEvent::Unsolicited { text }, || {
                    format!("{} {}", "Response with no chunk pending:".yellow(), text)
                });
            }
        }
    }

    fn on_sending_done(&mut self, outstanding: usize) {
        self.emit(&ReportEvent::SendingDone { outstanding }, || {
            format!("Finished sending, waiting for {} remaining responses", outstanding)
        });
    }

    fn on_report(&mut self, report: &ReplayReport) {
        if let Some(error) = &report.send_error {
            self.note(&format!("{}", format!("Error: {}", error).red()));
        }
        if !report.unanswered.is_empty() {
            self.note("\nChunks without responses:");
        }
        for unanswered in &report.unanswered {
            let waited = unanswered.waited.as_secs_f64();
            let event = ReportEvent::Unanswered {
                chunk: unanswered.sequence,
                waited_seconds: waited,
            };
            self.emit(&event, || {
                format!(
                    "  Chunk {}: sent {:.2} seconds ago, {}",
                    unanswered.sequence,
                    waited,
                    "no response received".red()
                )
            });
        }

        let summary = ReportEvent::Summary {
            chunks_sent: report.sent.chunks,
            bytes_sent: report.sent.bytes_sent,
            responses: report.responses.len(),
            unanswered: report.unanswered.len(),
            unsolicited: report.unsolicited.len(),
            latency: report.latency,
            send_error: report.send_error.as_deref(),
            server_closed: report.server_closed,
        };
        self.emit(&summary, || {
            let mut text = format!(
                "Sent {} chunks ({} bytes), {} responses, {} unanswered",
                report.sent.chunks,
                report.sent.bytes_sent,
                report.responses.len(),
                report.unanswered.len()
            );
            if let Some(stats) = report.latency {
                text.push_str(&format!(
                    "\nLatency: avg {}, p50 {}, min {}, max {}",
                    format_duration(stats.avg).yellow(),
                    format_duration(stats.p50),
                    format_duration(stats.min),
                    format_duration(stats.max)
                ));
            }
            text.push_str("\nConnection closed");
            text
        });
    }
}

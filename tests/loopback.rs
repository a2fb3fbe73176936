//! End-to-end runs of the server and the replay harness over localhost TCP,
//! with a scripted recognizer standing in for Whisper.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use streamscribe::client::{ChunkSent, CorrelationEvent, ReplayObserver, ReplaySettings, replay};
use streamscribe::server::{Server, ServerSettings, SessionConfig};
use streamscribe::stt::Segment;
use streamscribe::stt::recognizer::ScriptedRecognizerFactory;
use streamscribe::{AudioFormat, ReplayReport};
use tokio::net::TcpStream;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

const FRAME_SECONDS: f64 = 0.1;

fn format() -> AudioFormat {
    AudioFormat::default().with_frame_seconds(FRAME_SECONDS)
}

struct RunningServer {
    address: std::net::SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<streamscribe::Result<()>>,
}

impl RunningServer {
    async fn start(factory: ScriptedRecognizerFactory, max_sessions: usize) -> Self {
        let settings = ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 0,
            max_sessions,
            frame_backlog: 4,
            session: SessionConfig {
                format: format(),
                min_chunk_seconds: FRAME_SECONDS / 2.0,
                flush_on_close: false,
            },
        };
        let server = Server::new(settings, Arc::new(factory));
        let listener = server.bind().await.unwrap();
        let address = listener.local_addr().unwrap();
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            server
                .serve(listener, async {
                    stopped.await.ok();
                })
                .await
        });
        Self {
            address,
            stop,
            task,
        }
    }

    async fn shutdown(self) {
        self.stop.send(()).unwrap();
        self.task.await.unwrap().unwrap();
    }
}

#[derive(Default)]
struct Transcript {
    sent: Vec<u64>,
    lines: Vec<String>,
}

impl ReplayObserver for Transcript {
    fn on_chunk_sent(&mut self, chunk: &ChunkSent) {
        self.sent.push(chunk.sequence);
    }

    fn on_event(&mut self, event: &CorrelationEvent) {
        if let CorrelationEvent::Response(response) = event {
            self.lines.push(response.text.clone());
        }
    }
}

fn settings() -> ReplaySettings {
    ReplaySettings {
        format: format(),
        final_wait: Duration::from_secs(5),
        poll_interval: Duration::from_millis(10),
    }
}

async fn run(address: std::net::SocketAddr, audio_bytes: usize) -> (ReplayReport, Transcript) {
    let stream = TcpStream::connect(address).await.unwrap();
    let source = std::io::Cursor::new(vec![0u8; audio_bytes]);
    replay(source, stream, settings(), Transcript::default()).await
}

#[tokio::test]
async fn every_chunk_gets_exactly_one_line_in_order() {
    let factory = ScriptedRecognizerFactory::new(vec![
        Some(Segment::new(0.0, 0.08, "the quick")),
        None,
        Some(Segment::new(0.05, 0.25, "brown fox")),
        None,
    ]);
    let log = factory.log();
    let server = RunningServer::start(factory, 1).await;

    // 0.35 s of audio in 0.1 s chunks: three full chunks and a padded one.
    let chunk = format().frame_bytes();
    let (report, transcript) = run(server.address, chunk * 3 + chunk / 2).await;

    assert_eq!(transcript.sent, vec![1, 2, 3, 4]);
    assert_eq!(
        transcript.lines,
        vec!["0 80 the quick", "No input", "80 250 brown fox", "No input"]
    );
    let sequences: Vec<u64> = report.responses.iter().map(|r| r.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3, 4]);
    assert!(report.unanswered.is_empty());
    assert!(report.unsolicited.is_empty());
    assert_eq!(report.sent.padded_bytes, (chunk - chunk / 2) as u64);
    assert_eq!(report.latency.map(|l| l.count), Some(4));

    server.shutdown().await;
    // 0.1 s at 16 kHz per chunk, padding included.
    assert_eq!(log.inserted(), vec![1600; 4]);
}

#[tokio::test]
async fn sequential_clients_each_get_a_fresh_session() {
    let factory = ScriptedRecognizerFactory::new(vec![Some(Segment::new(0.0, 0.1, "hi"))]);
    let log = factory.log();
    let server = RunningServer::start(factory, 1).await;
    let chunk = format().frame_bytes();

    let (first, _) = run(server.address, chunk).await;
    let (second, _) = run(server.address, chunk).await;

    assert_eq!(first.responses.len(), 1);
    assert_eq!(second.responses.len(), 1);
    assert_eq!(log.sessions.load(Ordering::SeqCst), 2);

    server.shutdown().await;
}

#[tokio::test]
async fn concurrent_sessions_when_allowed() {
    let factory = ScriptedRecognizerFactory::new(vec![]);
    let log = factory.log();
    let server = RunningServer::start(factory, 2).await;
    let chunk = format().frame_bytes();

    let (a, b) = tokio::join!(run(server.address, chunk * 3), run(server.address, chunk * 3));

    assert_eq!(a.0.responses.len(), 3);
    assert_eq!(b.0.responses.len(), 3);
    assert!(a.1.lines.iter().all(|line| line == "No input"));
    assert_eq!(log.sessions.load(Ordering::SeqCst), 2);

    server.shutdown().await;
}

#[tokio::test]
async fn empty_audio_produces_no_traffic() {
    let factory = ScriptedRecognizerFactory::new(vec![]);
    let log = factory.log();
    let server = RunningServer::start(factory, 1).await;

    let (report, transcript) = run(server.address, 0).await;

    assert_eq!(report.sent.chunks, 0);
    assert!(transcript.lines.is_empty());
    assert!(report.unanswered.is_empty());

    server.shutdown().await;
    assert_eq!(log.iterations(), 0);
}

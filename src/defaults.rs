//! Default configuration constants for streamscribe.
//!
//! Shared by the config layer, the CLI and the tests so both ends of the
//! connection agree on frame geometry without negotiating it on the wire.

/// Audio sample rate in Hz. The recognizer expects 16kHz mono.
pub const SAMPLE_RATE: u32 = 16000;

/// Bytes per PCM sample (signed 16-bit little-endian).
pub const BYTES_PER_SAMPLE: u16 = 2;

/// Duration of one audio frame on the wire, in seconds.
///
/// 2 seconds at 16kHz/16-bit/mono is 64000 bytes per frame.
pub const FRAME_SECONDS: f64 = 2.0;

/// Host both server and client use when none is given.
pub const DEFAULT_HOST: &str = "localhost";

/// Port the server listens on by default.
pub const SERVER_PORT: u16 = 43007;

/// Port the replay harness connects to by default.
///
/// Differs from [`SERVER_PORT`]; the harness is usually pointed at a relay
/// or an explicitly chosen server port.
pub const CLIENT_PORT: u16 = 43001;

/// Minimum audio the server accumulates before the first recognizer call.
pub const MIN_CHUNK_SECONDS: f64 = 1.0;

/// Seconds of warm-up audio fed to the recognizer at startup.
pub const WARMUP_SECONDS: f64 = 1.0;

/// Maximum concurrent sessions. One reproduces accept-process-accept.
pub const MAX_SESSIONS: usize = 1;

/// Frames buffered between a connection's reader and its session.
pub const FRAME_BACKLOG: usize = 4;

/// Back-off after a failed socket read before the harness reads again.
pub const POLL_INTERVAL_MS: u64 = 100;

/// How long the harness waits for outstanding responses after the last send.
pub const FINAL_WAIT_MS: u64 = 30_000;

/// Receive size for one correlator poll.
pub const RECV_BUFFER_BYTES: usize = 4096;

/// Language value that triggers automatic language detection.
pub const AUTO_LANGUAGE: &str = "auto";

/// Default Whisper model file.
pub const DEFAULT_MODEL_PATH: &str = "models/ggml-base.bin";

/// Audio kept in the recognizer buffer before committed text is trimmed away.
pub const BUFFER_TRIMMING_SECONDS: f64 = 15.0;

/// Line sent when the recognizer has nothing new for a frame.
pub const NO_INPUT: &str = "No input";

/// Report the GPU backend compiled into this build.
pub fn gpu_backend() -> &'static str {
    if cfg!(feature = "cuda") {
        "CUDA"
    } else if cfg!(feature = "vulkan") {
        "Vulkan"
    } else if cfg!(feature = "hipblas") {
        "HipBLAS (AMD)"
    } else if cfg!(feature = "openblas") {
        "OpenBLAS"
    } else {
        "CPU"
    }
}

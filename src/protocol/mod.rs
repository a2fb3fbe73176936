//! Wire protocol shared by server and replay harness.
//!
//! Ingress carries headerless fixed-size PCM frames; egress carries one
//! newline-terminated UTF-8 line per processed frame.

pub mod frame;
pub mod line;
pub mod reassembler;

pub use frame::{AudioFormat, decode_pcm16le, pad_frame};
pub use line::{LineSplitter, encode_line};
pub use reassembler::{FrameRead, FrameReader, is_disconnect};

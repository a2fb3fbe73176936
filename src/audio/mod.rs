//! Audio sources: media transcoding for the harness, WAV warm-up for the server.

pub mod transcode;
pub mod wav;

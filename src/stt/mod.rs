//! Speech recognition collaborators.

pub mod recognizer;
pub mod whisper;

pub use recognizer::{Recognizer, RecognizerFactory, Segment};

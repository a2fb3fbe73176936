//! Whisper-based incremental recognizer.
//!
//! Audio accumulates in a per-session buffer. Every iteration re-transcribes
//! the buffer; all segments except the last (which may still change as more
//! audio arrives) are committed and cut from the buffer. When the buffer grows
//! past the trimming threshold everything is committed and the buffer is
//! emptied, even when it held no words.
//!
//! # Feature Gate
//!
//! Real inference requires the `whisper` feature (and cmake):
//!
//! ```bash
//! cargo build --features whisper
//! ```

use crate::config::{Device, RecognizerConfig};
use crate::defaults;
use crate::error::{Result, StreamError};
use crate::stt::recognizer::Segment;
use std::path::PathBuf;

#[cfg(feature = "whisper")]
use crate::stt::recognizer::{Recognizer, RecognizerFactory};
#[cfg(feature = "whisper")]
use std::sync::{Arc, Mutex, Once};
#[cfg(feature = "whisper")]
use whisper_rs::{
    FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters, install_logging_hooks,
};

#[cfg(feature = "whisper")]
static LOGGING_HOOKS_INSTALLED: Once = Once::new();

/// Characters of committed text handed to Whisper as the prompt.
const PROMPT_CHARS: usize = 200;

/// Configuration for the Whisper recognizer.
#[derive(Debug, Clone)]
pub struct WhisperConfig {
    /// Path to the ggml model file
    pub model_path: PathBuf,
    /// Language code (e.g., "en", "cs") or "auto"
    pub language: String,
    /// Number of threads for inference (None = auto-detect)
    pub threads: Option<usize>,
    /// Run inference on the GPU backend compiled into this build
    pub use_gpu: bool,
    /// Buffer length after which all pending text is committed
    pub buffer_trimming_seconds: f64,
}

impl Default for WhisperConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from(defaults::DEFAULT_MODEL_PATH),
            language: defaults::AUTO_LANGUAGE.to_string(),
            threads: None,
            use_gpu: false,
            buffer_trimming_seconds: defaults::BUFFER_TRIMMING_SECONDS,
        }
    }
}

impl From<&RecognizerConfig> for WhisperConfig {
    fn from(config: &RecognizerConfig) -> Self {
        Self {
            model_path: config.model_path.clone(),
            language: config.language.clone(),
            threads: config.threads,
            use_gpu: config.device == Device::Gpu,
            buffer_trimming_seconds: config.buffer_trimming_seconds,
        }
    }
}

/// Segment as reported by Whisper, relative to the buffer start.
#[derive(Debug, Clone, PartialEq)]
pub struct RawSegment {
    pub begin_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
}

/// What to commit from one transcription of the buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct Commit {
    /// Committed text with absolute stream times; `None` when the trimmed
    /// audio held no words.
    pub segment: Option<Segment>,
    /// Seconds to drop from the front of the buffer.
    pub trim_seconds: f64,
}

/// Decide which segments of a buffer transcription are final.
///
/// `offset_seconds` is the stream time of the buffer start. With `force`
/// (or a buffer longer than `trimming_seconds`) every segment is committed
/// and the whole buffer is trimmed, even when nothing was recognized;
/// otherwise the last segment is held back. Returns `None` when there is
/// neither text to commit nor audio to trim.
pub fn plan_commit(
    segments: &[RawSegment],
    offset_seconds: f64,
    buffer_seconds: f64,
    trimming_seconds: f64,
    force: bool,
) -> Option<Commit> {
    let commit_all = force || buffer_seconds > trimming_seconds;
    let count = if commit_all {
        segments.len()
    } else {
        segments.len().saturating_sub(1)
    };

    let trim_seconds = if commit_all {
        buffer_seconds
    } else if count > 0 {
        segments[count - 1].end_seconds.min(buffer_seconds)
    } else {
        0.0
    };

    let committed: Vec<&RawSegment> = segments[..count]
        .iter()
        .filter(|s| !s.text.trim().is_empty())
        .collect();
    let segment = match (committed.first(), committed.last()) {
        (Some(first), Some(last)) => Some(Segment {
            begin_seconds: offset_seconds + first.begin_seconds,
            end_seconds: offset_seconds + last.end_seconds,
            text: committed
                .iter()
                .map(|s| s.text.trim())
                .collect::<Vec<_>>()
                .join(" "),
        }),
        _ => None,
    };

    if segment.is_none() && trim_seconds <= 0.0 {
        return None;
    }
    Some(Commit {
        segment,
        trim_seconds,
    })
}

/// Keep the last `max_chars` characters of committed text for prompting.
fn prompt_tail(committed: &str, max_chars: usize) -> &str {
    let count = committed.chars().count();
    if count <= max_chars {
        return committed;
    }
    let skip = count - max_chars;
    let start = committed
        .char_indices()
        .nth(skip)
        .map(|(i, _)| i)
        .unwrap_or(0);
    &committed[start..]
}

/// Loads a Whisper model once and hands out per-session recognizers.
#[cfg(feature = "whisper")]
pub struct WhisperRecognizerFactory {
    context: Arc<Mutex<WhisperContext>>,
    config: WhisperConfig,
    model_name: String,
}

#[cfg(feature = "whisper")]
impl std::fmt::Debug for WhisperRecognizerFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WhisperRecognizerFactory")
            .field("config", &self.config)
            .field("model_name", &self.model_name)
            .field("context", &"<WhisperContext>")
            .finish()
    }
}

/// Placeholder when built without the `whisper` feature.
#[cfg(not(feature = "whisper"))]
#[derive(Debug)]
pub struct WhisperRecognizerFactory {
    config: WhisperConfig,
}

fn model_name_of(config: &WhisperConfig) -> String {
    config
        .model_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(feature = "whisper")]
impl WhisperRecognizerFactory {
    /// Load the model.
    ///
    /// # Errors
    /// Returns `StreamError::RecognizerModelNotFound` if the model file doesn't exist
    /// Returns `StreamError::Recognition` if model loading fails
    pub fn new(config: WhisperConfig) -> Result<Self> {
        LOGGING_HOOKS_INSTALLED.call_once(|| {
            install_logging_hooks();
        });

        if !config.model_path.exists() {
            return Err(StreamError::RecognizerModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }

        let model_name = model_name_of(&config);

        let mut context_params = WhisperContextParameters::default();
        context_params.use_gpu(config.use_gpu);
        context_params.flash_attn(true);
        let context = WhisperContext::new_with_params(
            config
                .model_path
                .to_str()
                .ok_or_else(|| StreamError::Recognition {
                    message: "Invalid UTF-8 in model path".to_string(),
                })?,
            context_params,
        )
        .map_err(|e| StreamError::Recognition {
            message: format!("Failed to load Whisper model: {}", e),
        })?;

        Ok(Self {
            context: Arc::new(Mutex::new(context)),
            config,
            model_name,
        })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

#[cfg(not(feature = "whisper"))]
impl WhisperRecognizerFactory {
    /// Always fails: this binary has no speech recognition compiled in.
    pub fn new(config: WhisperConfig) -> Result<Self> {
        if !config.model_path.exists() {
            return Err(StreamError::RecognizerModelNotFound {
                path: config.model_path.to_string_lossy().to_string(),
            });
        }
        Err(StreamError::Recognition {
            message: format!(
                "Whisper feature not enabled; cannot load '{}'. Rebuild with --features whisper",
                model_name_of(&config)
            ),
        })
    }

    pub fn config(&self) -> &WhisperConfig {
        &self.config
    }
}

/// Run one full transcription of `audio`, returning buffer-relative segments.
#[cfg(feature = "whisper")]
fn transcribe_segments(
    context: &Mutex<WhisperContext>,
    config: &WhisperConfig,
    audio: &[f32],
    prompt: &str,
) -> Result<Vec<RawSegment>> {
    let context = context.lock().map_err(|e| StreamError::Recognition {
        message: format!("Failed to acquire context lock: {}", e),
    })?;

    let mut state = context
        .create_state()
        .map_err(|e| StreamError::Recognition {
            message: format!("Failed to create Whisper state: {}", e),
        })?;

    let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
    if config.language == defaults::AUTO_LANGUAGE {
        params.set_language(None);
    } else {
        params.set_language(Some(&config.language));
    }
    if let Some(threads) = config.threads {
        params.set_n_threads(threads as i32);
    }
    if !prompt.is_empty() {
        params.set_initial_prompt(prompt);
    }
    params.set_print_special(false);
    params.set_print_progress(false);
    params.set_print_realtime(false);
    params.set_print_timestamps(false);

    state
        .full(params, audio)
        .map_err(|e| StreamError::Recognition {
            message: format!("Whisper inference failed: {}", e),
        })?;

    // Whisper timestamps are in centiseconds
    Ok(state
        .as_iter()
        .map(|segment| RawSegment {
            begin_seconds: segment.start_timestamp() as f64 / 100.0,
            end_seconds: segment.end_timestamp() as f64 / 100.0,
            text: segment.to_string(),
        })
        .collect())
}

#[cfg(feature = "whisper")]
impl RecognizerFactory for WhisperRecognizerFactory {
    fn create(&self) -> Result<Box<dyn Recognizer>> {
        Ok(Box::new(WhisperRecognizer {
            context: Arc::clone(&self.context),
            config: self.config.clone(),
            buffer: Vec::new(),
            offset_seconds: 0.0,
            committed: String::new(),
        }))
    }

    fn warm_up(&self, samples: &[f32]) -> Result<()> {
        transcribe_segments(&self.context, &self.config, samples, "").map(|_| ())
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

#[cfg(not(feature = "whisper"))]
impl crate::stt::recognizer::RecognizerFactory for WhisperRecognizerFactory {
    fn create(&self) -> Result<Box<dyn crate::stt::recognizer::Recognizer>> {
        Err(StreamError::Recognition {
            message: "Whisper feature not enabled".to_string(),
        })
    }

    fn warm_up(&self, _samples: &[f32]) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "whisper (disabled)"
    }
}

/// Per-session recognizer state on top of a shared Whisper model.
#[cfg(feature = "whisper")]
pub struct WhisperRecognizer {
    context: Arc<Mutex<WhisperContext>>,
    config: WhisperConfig,
    buffer: Vec<f32>,
    offset_seconds: f64,
    committed: String,
}

#[cfg(feature = "whisper")]
impl WhisperRecognizer {
    fn buffer_seconds(&self) -> f64 {
        self.buffer.len() as f64 / defaults::SAMPLE_RATE as f64
    }

    fn step(&mut self, force: bool) -> Result<Option<Segment>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let prompt = prompt_tail(&self.committed, PROMPT_CHARS).to_string();
        let segments = transcribe_segments(&self.context, &self.config, &self.buffer, &prompt)?;
        let buffer_seconds = self.buffer_seconds();

        let Some(commit) = plan_commit(
            &segments,
            self.offset_seconds,
            buffer_seconds,
            self.config.buffer_trimming_seconds,
            force,
        ) else {
            return Ok(None);
        };

        let trim_samples = ((commit.trim_seconds * defaults::SAMPLE_RATE as f64) as usize)
            .min(self.buffer.len());
        self.buffer.drain(..trim_samples);
        self.offset_seconds += trim_samples as f64 / defaults::SAMPLE_RATE as f64;

        let Some(segment) = commit.segment else {
            return Ok(None);
        };
        if !self.committed.is_empty() {
            self.committed.push(' ');
        }
        self.committed.push_str(&segment.text);

        Ok(Some(segment))
    }
}

#[cfg(feature = "whisper")]
impl Recognizer for WhisperRecognizer {
    fn init(&mut self) {
        self.buffer.clear();
        self.offset_seconds = 0.0;
        self.committed.clear();
    }

    fn insert_audio_chunk(&mut self, samples: &[f32]) {
        self.buffer.extend_from_slice(samples);
    }

    fn process_iter(&mut self) -> Result<Option<Segment>> {
        self.step(false)
    }

    fn finish(&mut self) -> Result<Option<Segment>> {
        self.step(true)
    }
}

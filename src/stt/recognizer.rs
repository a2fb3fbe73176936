use crate::error::{Result, StreamError};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// A transcribed, time-stamped piece of speech.
///
/// Times are seconds from the start of the session's audio, as estimated by
/// the recognizer.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub begin_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
}

impl Segment {
    pub fn new(begin_seconds: f64, end_seconds: f64, text: &str) -> Self {
        Self {
            begin_seconds,
            end_seconds,
            text: text.to_string(),
        }
    }
}

/// Incremental speech recognizer owned by a single session.
///
/// Audio goes in with [`insert_audio_chunk`](Recognizer::insert_audio_chunk);
/// each [`process_iter`](Recognizer::process_iter) returns newly committed
/// text, or `None` when nothing new is ready. Calls may block for longer than
/// the audio they process.
pub trait Recognizer: Send {
    /// Reset internal buffers for a new stream.
    fn init(&mut self);

    /// Append samples (16kHz mono, normalized f32).
    fn insert_audio_chunk(&mut self, samples: &[f32]);

    /// Run one recognition step over the buffered audio.
    fn process_iter(&mut self) -> Result<Option<Segment>>;

    /// Flush whatever text is still uncommitted at end of stream.
    fn finish(&mut self) -> Result<Option<Segment>>;
}

/// Creates one [`Recognizer`] per session from a shared, loaded model.
pub trait RecognizerFactory: Send + Sync {
    /// Create a fresh recognizer for a new connection.
    fn create(&self) -> Result<Box<dyn Recognizer>>;

    /// Run a throwaway transcription so the first real chunk is fast.
    fn warm_up(&self, samples: &[f32]) -> Result<()>;

    /// Name of the backing model.
    fn name(&self) -> &str;
}

impl<T: RecognizerFactory> RecognizerFactory for Arc<T> {
    fn create(&self) -> Result<Box<dyn Recognizer>> {
        (**self).create()
    }

    fn warm_up(&self, samples: &[f32]) -> Result<()> {
        (**self).warm_up(samples)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

/// Observations shared between a [`ScriptedRecognizer`] and its factory.
#[derive(Debug, Default)]
pub struct ScriptLog {
    /// Length of every inserted chunk, in samples.
    pub inserted: Mutex<Vec<usize>>,
    pub iterations: AtomicUsize,
    pub finishes: AtomicUsize,
    pub warmups: AtomicUsize,
    pub sessions: AtomicUsize,
}

impl ScriptLog {
    pub fn inserted(&self) -> Vec<usize> {
        self.inserted.lock().map(|v| v.clone()).unwrap_or_default()
    }

    pub fn iterations(&self) -> usize {
        self.iterations.load(Ordering::SeqCst)
    }
}

/// Recognizer that replays a fixed list of outputs, for tests and dry runs.
///
/// Each `process_iter` pops the next scripted output; once the script is
/// exhausted it keeps returning `None`.
#[derive(Debug)]
pub struct ScriptedRecognizer {
    script: VecDeque<Option<Segment>>,
    final_segment: Option<Segment>,
    fail_at: Option<usize>,
    log: Arc<ScriptLog>,
}

impl ScriptedRecognizer {
    pub fn new(script: Vec<Option<Segment>>) -> Self {
        Self {
            script: script.into(),
            final_segment: None,
            fail_at: None,
            log: Arc::new(ScriptLog::default()),
        }
    }

    /// Segment returned by `finish`.
    pub fn with_final(mut self, segment: Segment) -> Self {
        self.final_segment = Some(segment);
        self
    }

    /// Fail the `n`th `process_iter` call (1-based).
    pub fn with_failure_at(mut self, n: usize) -> Self {
        self.fail_at = Some(n);
        self
    }

    pub fn log(&self) -> Arc<ScriptLog> {
        Arc::clone(&self.log)
    }
}

impl Recognizer for ScriptedRecognizer {
    fn init(&mut self) {}

    fn insert_audio_chunk(&mut self, samples: &[f32]) {
        if let Ok(mut inserted) = self.log.inserted.lock() {
            inserted.push(samples.len());
        }
    }

    fn process_iter(&mut self) -> Result<Option<Segment>> {
        let n = self.log.iterations.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_at == Some(n) {
            return Err(StreamError::Recognition {
                message: format!("scripted failure at iteration {}", n),
            });
        }
        Ok(self.script.pop_front().flatten())
    }

    fn finish(&mut self) -> Result<Option<Segment>> {
        self.log.finishes.fetch_add(1, Ordering::SeqCst);
        Ok(self.final_segment.take())
    }
}

/// Factory handing every session a copy of the same script.
#[derive(Debug, Clone)]
pub struct ScriptedRecognizerFactory {
    script: Vec<Option<Segment>>,
    final_segment: Option<Segment>,
    fail_at: Option<usize>,
    log: Arc<ScriptLog>,
}

impl ScriptedRecognizerFactory {
    pub fn new(script: Vec<Option<Segment>>) -> Self {
        Self {
            script,
            final_segment: None,
            fail_at: None,
            log: Arc::new(ScriptLog::default()),
        }
    }

    pub fn with_final(mut self, segment: Segment) -> Self {
        self.final_segment = Some(segment);
        self
    }

    pub fn with_failure_at(mut self, n: usize) -> Self {
        self.fail_at = Some(n);
        self
    }

    /// Log shared by every recognizer this factory creates.
    pub fn log(&self) -> Arc<ScriptLog> {
        Arc::clone(&self.log)
    }
}

impl RecognizerFactory for ScriptedRecognizerFactory {
    fn create(&self) -> Result<Box<dyn Recognizer>> {
        self.log.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedRecognizer {
            script: self.script.clone().into(),
            final_segment: self.final_segment.clone(),
            fail_at: self.fail_at,
            log: Arc::clone(&self.log),
        }))
    }

    fn warm_up(&self, _samples: &[f32]) -> Result<()> {
        self.log.warmups.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scripted_recognizer_replays_outputs_then_none() {
        let mut recognizer = ScriptedRecognizer::new(vec![
            Some(Segment::new(0.0, 1.72, "Takhle to je")),
            None,
        ]);

        assert_eq!(
            recognizer.process_iter().unwrap(),
            Some(Segment::new(0.0, 1.72, "Takhle to je"))
        );
        assert_eq!(recognizer.process_iter().unwrap(), None);
        assert_eq!(recognizer.process_iter().unwrap(), None);
        assert_eq!(recognizer.log().iterations(), 3);
    }

    #[test]
    fn scripted_recognizer_records_inserted_chunks() {
        let mut recognizer = ScriptedRecognizer::new(vec![]);
        recognizer.insert_audio_chunk(&[0.0; 32000]);
        recognizer.insert_audio_chunk(&[0.0; 10]);
        assert_eq!(recognizer.log().inserted(), vec![32000, 10]);
    }

    #[test]
    fn scripted_recognizer_fails_on_request() {
        let mut recognizer = ScriptedRecognizer::new(vec![None, None]).with_failure_at(2);
        assert!(recognizer.process_iter().is_ok());
        match recognizer.process_iter() {
            Err(StreamError::Recognition { message }) => {
                assert!(message.contains("iteration 2"));
            }
            other => panic!("Expected Recognition error, got {:?}", other),
        }
    }

    #[test]
    fn scripted_recognizer_finish_returns_final_once() {
        let mut recognizer =
            ScriptedRecognizer::new(vec![]).with_final(Segment::new(4.0, 5.0, "bye"));
        assert_eq!(
            recognizer.finish().unwrap(),
            Some(Segment::new(4.0, 5.0, "bye"))
        );
        assert_eq!(recognizer.finish().unwrap(), None);
    }

    #[test]
    fn factory_gives_each_session_a_fresh_script() {
        let factory = ScriptedRecognizerFactory::new(vec![Some(Segment::new(0.0, 1.0, "a"))]);
        let mut first = factory.create().unwrap();
        let mut second = factory.create().unwrap();

        assert!(first.process_iter().unwrap().is_some());
        assert!(second.process_iter().unwrap().is_some());
        assert_eq!(factory.log().sessions.load(Ordering::SeqCst), 2);
        assert_eq!(factory.log().iterations(), 2);
    }

    #[test]
    fn factory_is_object_safe_behind_arc() {
        let factory: Arc<dyn RecognizerFactory> =
            Arc::new(ScriptedRecognizerFactory::new(vec![]));
        assert_eq!(factory.name(), "scripted");
        assert!(factory.warm_up(&[0.0; 16000]).is_ok());
    }
}

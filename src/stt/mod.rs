//! Speech-to-text providers and the primary/secondary selector.

pub mod selector;
pub mod whisper_api;
pub mod yandex;

pub use selector::TranscriptionSelector;
pub use whisper_api::WhisperApi;
pub use yandex::YandexSpeechKit;

use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;

/// Transcription failure kinds.
///
/// `LengthExceeded` is the only kind that triggers the fallback provider.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SttError {
    #[error("clip of {duration_secs}s exceeds the primary recognizer's length limit")]
    LengthExceeded { duration_secs: u64 },

    #[error("clip of {bytes} bytes exceeds the {limit} byte upload limit")]
    TooLarge { bytes: usize, limit: usize },

    #[error("clip exceeds the primary recognizer's limit and no fallback is configured")]
    NoFallback,

    #[error("{provider} returned an empty transcript")]
    EmptyTranscript { provider: String },

    #[error("{provider}: {message}")]
    Failed { provider: String, message: String },
}

impl SttError {
    pub fn failed(provider: &str, message: impl Into<String>) -> Self {
        SttError::Failed {
            provider: provider.to_string(),
            message: message.into(),
        }
    }
}

/// Audio handed to a provider.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub bytes: Vec<u8>,
    /// Duration reported by the telephony provider.
    pub duration_secs: u64,
    /// File name sent with multipart uploads, e.g. `<call_id>.mp3`.
    pub file_name: String,
}

impl AudioClip {
    pub fn new(bytes: Vec<u8>, duration_secs: u64, file_name: impl Into<String>) -> Self {
        Self {
            bytes,
            duration_secs,
            file_name: file_name.into(),
        }
    }
}

/// Transcript text and the provider that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transcript {
    pub text: String,
    pub provider: String,
}

/// A speech-to-text engine.
#[async_trait::async_trait]
pub trait SpeechToText: Send + Sync {
    async fn transcribe(&self, clip: &AudioClip) -> Result<Transcript, SttError>;

    /// Provider name used in logs and transcripts.
    fn name(&self) -> &str;
}

/// Mock recognizer for testing
#[derive(Debug)]
pub struct MockSpeechToText {
    name: String,
    response: String,
    max_duration_secs: Option<u64>,
    should_fail: bool,
    calls: AtomicUsize,
}

impl MockSpeechToText {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            response: "mock transcription".to_string(),
            max_duration_secs: None,
            should_fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Configure the mock to return a specific transcript
    pub fn with_response(mut self, response: &str) -> Self {
        self.response = response.to_string();
        self
    }

    /// Reject clips longer than `secs` with `LengthExceeded`
    pub fn with_max_duration(mut self, secs: u64) -> Self {
        self.max_duration_secs = Some(secs);
        self
    }

    /// Configure the mock to fail on transcribe
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Number of `transcribe` invocations so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SpeechToText for MockSpeechToText {
    async fn transcribe(&self, clip: &AudioClip) -> Result<Transcript, SttError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(max) = self.max_duration_secs
            && clip.duration_secs > max
        {
            return Err(SttError::LengthExceeded {
                duration_secs: clip.duration_secs,
            });
        }
        if self.should_fail {
            return Err(SttError::failed(&self.name, "mock transcription failure"));
        }
        Ok(Transcript {
            text: self.response.clone(),
            provider: self.name.clone(),
        })
    }

    fn name(&self) -> &str {
        &self.name
    }
}

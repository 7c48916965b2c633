//! Primary-then-secondary transcription.
//!
//! The secondary provider is consulted only when the primary reports
//! [`SttError::LengthExceeded`]. Every other primary failure is final.

use crate::stt::{AudioClip, SpeechToText, SttError, Transcript};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub struct TranscriptionSelector {
    primary: Arc<dyn SpeechToText>,
    secondary: Option<Arc<dyn SpeechToText>>,
}

impl TranscriptionSelector {
    pub fn new(primary: Arc<dyn SpeechToText>, secondary: Option<Arc<dyn SpeechToText>>) -> Self {
        Self { primary, secondary }
    }

    pub fn has_fallback(&self) -> bool {
        self.secondary.is_some()
    }

    pub async fn transcribe(&self, clip: &AudioClip) -> Result<Transcript, SttError> {
        debug!(
            provider = self.primary.name(),
            duration_secs = clip.duration_secs,
            bytes = clip.bytes.len(),
            "transcribing"
        );
        match self.primary.transcribe(clip).await {
            Ok(transcript) => non_empty(transcript),
            Err(SttError::LengthExceeded { duration_secs }) => {
                let Some(secondary) = &self.secondary else {
                    warn!(duration_secs, "clip too long for primary and no fallback configured");
                    return Err(SttError::NoFallback);
                };
                info!(
                    duration_secs,
                    fallback = secondary.name(),
                    "clip too long for primary, using fallback"
                );
                non_empty(secondary.transcribe(clip).await?)
            }
            Err(e) => Err(e),
        }
    }
}

fn non_empty(transcript: Transcript) -> Result<Transcript, SttError> {
    if transcript.text.trim().is_empty() {
        Err(SttError::EmptyTranscript {
            provider: transcript.provider,
        })
    } else {
        Ok(transcript)
    }
}

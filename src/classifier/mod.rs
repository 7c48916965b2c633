//! Transcript classification with a language model.

pub mod openai;
pub mod prompt;
pub mod verdict;

pub use openai::OpenAiChat;
pub use prompt::PromptTemplates;
pub use verdict::{AlertDetails, ClassificationVerdict, parse_verdict};

use crate::defaults;
use crate::error::{CallSentryError, Result};
use crate::telephony::CallMetadata;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::{debug, info, warn};

/// Text-in, text-out model call.
#[async_trait::async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}

pub struct Classifier {
    model: Arc<dyn LanguageModel>,
    prompts: PromptTemplates,
}

impl Classifier {
    pub fn new(model: Arc<dyn LanguageModel>, prompts: PromptTemplates) -> Self {
        Self { model, prompts }
    }

    pub fn prompts(&self) -> &PromptTemplates {
        &self.prompts
    }

    /// Classify one transcript.
    ///
    /// `Err` only when the model could not be reached or answered with an
    /// error; unusable output is an `Ignore` verdict.
    pub async fn classify(
        &self,
        transcript: &str,
        call: &CallMetadata,
    ) -> Result<ClassificationVerdict> {
        if transcript.trim().is_empty() {
            return Ok(ClassificationVerdict::ignore_with("empty transcript"));
        }

        let prompt = self.prompts.compose(transcript, Some(call));
        debug!(
            model = self.model.model_name(),
            prompt_chars = prompt.chars().count(),
            "classifying transcript"
        );
        let raw = self.model.complete(&prompt).await?;

        let verdict = parse_verdict(&raw);
        match &verdict {
            ClassificationVerdict::Ignore {
                diagnostic: Some(reason),
            } => {
                let excerpt: String = raw.chars().take(200).collect();
                warn!(%reason, response = %excerpt, "unusable classifier output, treating as ignore");
            }
            ClassificationVerdict::Ignore { diagnostic: None } => {
                debug!("classifier verdict: ignore");
            }
            ClassificationVerdict::Alert(details) => {
                info!(
                    error_code = details
                        .error_code
                        .as_deref()
                        .unwrap_or(defaults::UNKNOWN_ERROR_CODE),
                    "classifier verdict: alert"
                );
            }
        }
        Ok(verdict)
    }
}

/// Mock language model for testing
#[derive(Debug)]
pub struct MockLanguageModel {
    response: String,
    should_fail: bool,
    prompts: Mutex<Vec<String>>,
}

impl MockLanguageModel {
    /// Always answers `response`.
    pub fn new(response: &str) -> Self {
        Self {
            response: response.to_string(),
            should_fail: false,
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Configure the mock to fail every request
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Prompts received so far.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait::async_trait]
impl LanguageModel for MockLanguageModel {
    async fn complete(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());
        if self.should_fail {
            return Err(CallSentryError::Classifier {
                message: "mock model failure".to_string(),
            });
        }
        Ok(self.response.clone())
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

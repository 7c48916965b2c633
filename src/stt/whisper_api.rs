//! OpenAI Whisper transcription endpoint, used for clips the primary
//! recognizer rejects as too long.

use crate::config::TranscriptionConfig;
use crate::defaults;
use crate::error::Result;
use crate::http;
use crate::stt::{AudioClip, SpeechToText, SttError, Transcript};
use reqwest::multipart::{Form, Part};
use serde::Deserialize;

const PROVIDER: &str = "whisper";

pub struct WhisperApi {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    language: String,
    max_bytes: usize,
}

#[derive(Debug, Deserialize)]
struct TranscriptionResponse {
    text: Option<String>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}

impl WhisperApi {
    pub fn new(config: &TranscriptionConfig) -> Result<Self> {
        Ok(Self {
            http: http::build_client(config.timeout_secs)?,
            url: config.whisper_url.clone(),
            api_key: config.openai_api_key.clone(),
            model: config.whisper_model.clone(),
            language: config.whisper_language.clone(),
            max_bytes: defaults::SECONDARY_MAX_AUDIO_BYTES,
        })
    }
}

pub fn check_size(bytes: usize, limit: usize) -> std::result::Result<(), SttError> {
    if bytes > limit {
        Err(SttError::TooLarge { bytes, limit })
    } else {
        Ok(())
    }
}

/// Guess the upload content type from the file name.
fn mime_for(file_name: &str) -> &'static str {
    match file_name.rsplit('.').next().map(str::to_ascii_lowercase).as_deref() {
        Some("wav") => "audio/wav",
        Some("ogg") | Some("opus") => "audio/ogg",
        Some("m4a") => "audio/mp4",
        Some("webm") => "audio/webm",
        _ => "audio/mpeg",
    }
}

#[async_trait::async_trait]
impl SpeechToText for WhisperApi {
    async fn transcribe(&self, clip: &AudioClip) -> std::result::Result<Transcript, SttError> {
        check_size(clip.bytes.len(), self.max_bytes)?;

        let part = Part::bytes(clip.bytes.clone())
            .file_name(clip.file_name.clone())
            .mime_str(mime_for(&clip.file_name))
            .map_err(|e| SttError::failed(PROVIDER, format!("invalid content type: {e}")))?;
        let mut form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "json");
        if !self.language.is_empty() {
            form = form.text("language", self.language.clone());
        }

        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| SttError::failed(PROVIDER, format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SttError::failed(PROVIDER, format!("failed to read response: {e}")))?;
        let parsed: Option<TranscriptionResponse> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            let message = parsed
                .and_then(|p| p.error)
                .and_then(|e| e.message)
                .unwrap_or_else(|| http::body_excerpt(&body));
            return Err(SttError::failed(PROVIDER, format!("{status}: {message}")));
        }

        let text = parsed
            .and_then(|p| p.text)
            .ok_or_else(|| SttError::failed(PROVIDER, "response has no 'text' field"))?;
        Ok(Transcript {
            text: text.trim().to_string(),
            provider: PROVIDER.to_string(),
        })
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

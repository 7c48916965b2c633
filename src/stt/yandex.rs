//! Yandex SpeechKit short-form recognition (synchronous, 30 s limit).

use crate::config::TranscriptionConfig;
use crate::error::Result;
use crate::http;
use crate::stt::{AudioClip, SpeechToText, SttError, Transcript};
use serde::Deserialize;
use tracing::debug;

const PROVIDER: &str = "yandex";

pub struct YandexSpeechKit {
    http: reqwest::Client,
    url: String,
    api_key: String,
    language: String,
    format: String,
    max_duration_secs: u64,
}

#[derive(Debug, Deserialize)]
struct RecognizeResponse {
    result: Option<String>,
    error_code: Option<String>,
    error_message: Option<String>,
}

impl YandexSpeechKit {
    pub fn new(config: &TranscriptionConfig) -> Result<Self> {
        Ok(Self {
            http: http::build_client(config.timeout_secs)?,
            url: config.yandex_url.clone(),
            api_key: config.yandex_api_key.clone(),
            language: config.language.clone(),
            format: config.audio_format.clone(),
            max_duration_secs: config.max_primary_secs,
        })
    }
}

/// Reject clips the short-form API cannot take before uploading anything.
pub fn check_duration(duration_secs: u64, max_secs: u64) -> std::result::Result<(), SttError> {
    if duration_secs > max_secs {
        Err(SttError::LengthExceeded { duration_secs })
    } else {
        Ok(())
    }
}

/// The service reports over-long audio as a generic bad request; only its
/// length-limit wording counts.
fn is_length_rejection(message: &str) -> bool {
    const PHRASES: [&str; 3] = [
        "audio duration should be less than",
        "audio is too long",
        "audio is longer than",
    ];
    let lower = message.to_lowercase();
    PHRASES.iter().any(|p| lower.contains(p))
}

#[async_trait::async_trait]
impl SpeechToText for YandexSpeechKit {
    async fn transcribe(&self, clip: &AudioClip) -> std::result::Result<Transcript, SttError> {
        check_duration(clip.duration_secs, self.max_duration_secs)?;

        let response = self
            .http
            .post(&self.url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Api-Key {}", self.api_key),
            )
            .query(&[
                ("lang", self.language.as_str()),
                ("format", self.format.as_str()),
            ])
            .body(clip.bytes.clone())
            .send()
            .await
            .map_err(|e| SttError::failed(PROVIDER, format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SttError::failed(PROVIDER, format!("failed to read response: {e}")))?;
        let parsed: Option<RecognizeResponse> = serde_json::from_str(&body).ok();

        if !status.is_success() {
            let message = parsed
                .and_then(|p| match (p.error_code, p.error_message) {
                    (Some(code), Some(msg)) => Some(format!("{code}: {msg}")),
                    (None, Some(msg)) => Some(msg),
                    (Some(code), None) => Some(code),
                    (None, None) => None,
                })
                .unwrap_or_else(|| http::body_excerpt(&body));
            if is_length_rejection(&message) {
                debug!(%status, %message, "service rejected clip length");
                return Err(SttError::LengthExceeded {
                    duration_secs: clip.duration_secs,
                });
            }
            return Err(SttError::failed(PROVIDER, format!("{status}: {message}")));
        }

        let text = parsed
            .and_then(|p| p.result)
            .ok_or_else(|| SttError::failed(PROVIDER, "response has no 'result' field"))?;
        Ok(Transcript {
            text: text.trim().to_string(),
            provider: PROVIDER.to_string(),
        })
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_limit_is_inclusive() {
        assert!(check_duration(0, 30).is_ok());
        assert!(check_duration(30, 30).is_ok());
        assert_eq!(
            check_duration(31, 30),
            Err(SttError::LengthExceeded { duration_secs: 31 })
        );
    }

    #[test]
    fn length_rejections_are_recognized() {
        assert!(is_length_rejection(
            "BAD_REQUEST: audio duration should be less than 30s"
        ));
        assert!(is_length_rejection("Audio is too long"));
        assert!(!is_length_rejection("UNAUTHORIZED: invalid api key"));
    }

    #[test]
    fn other_duration_messages_are_not_length_rejections() {
        assert!(!is_length_rejection(
            "BAD_REQUEST: could not determine audio duration"
        ));
        assert!(!is_length_rejection("BAD_REQUEST: invalid duration header"));
        assert!(!is_length_rejection("payload exceeds maximum allowed size"));
        assert!(!is_length_rejection("request body too long"));
    }

    #[tokio::test]
    async fn long_clip_fails_before_any_request() {
        let config = TranscriptionConfig {
            yandex_url: "http://127.0.0.1:9/unreachable".to_string(),
            ..TranscriptionConfig::default()
        };
        let stt = YandexSpeechKit::new(&config).unwrap();
        let clip = AudioClip::new(vec![0; 8], 31, "c.mp3");

        assert_eq!(
            stt.transcribe(&clip).await,
            Err(SttError::LengthExceeded { duration_secs: 31 })
        );
    }

    #[test]
    fn parses_service_payloads() {
        let ok: RecognizeResponse = serde_json::from_str(r#"{"result":"алло"}"#).unwrap();
        assert_eq!(ok.result.as_deref(), Some("алло"));

        let err: RecognizeResponse =
            serde_json::from_str(r#"{"error_code":"BAD_REQUEST","error_message":"x"}"#).unwrap();
        assert_eq!(err.result, None);
        assert_eq!(err.error_code.as_deref(), Some("BAD_REQUEST"));
    }
}

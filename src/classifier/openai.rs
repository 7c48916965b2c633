//! OpenAI chat completions client.

use crate::classifier::LanguageModel;
use crate::config::ClassifierConfig;
use crate::error::{CallSentryError, Result};
use crate::http;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub struct OpenAiChat {
    http: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 1],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl OpenAiChat {
    pub fn new(config: &ClassifierConfig) -> Result<Self> {
        Ok(Self {
            http: http::build_client(config.timeout_secs)?,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn request<'a>(&'a self, prompt: &'a str) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: [ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[async_trait::async_trait]
impl LanguageModel for OpenAiChat {
    async fn complete(&self, prompt: &str) -> Result<String> {
        let response = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&self.request(prompt))
            .send()
            .await
            .map_err(|e| classifier_error(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| classifier_error(format!("failed to read response: {e}")))?;
        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error.message)
                .unwrap_or_else(|_| http::body_excerpt(&body));
            return Err(classifier_error(format!("{status}: {message}")));
        }

        let parsed: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| classifier_error(format!("unexpected response: {e}")))?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| classifier_error("response has no message content".to_string()))?;
        debug!(model = %self.model, chars = content.len(), "model responded");
        Ok(content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn classifier_error(message: String) -> CallSentryError {
    CallSentryError::Classifier { message }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let chat = OpenAiChat::new(&ClassifierConfig::default()).unwrap();
        let json = serde_json::to_value(chat.request("hi")).unwrap();

        assert_eq!(json["model"], "gpt-4o");
        assert_eq!(json["max_tokens"], 800);
        assert_eq!(json["messages"][0]["role"], "user");
        assert_eq!(json["messages"][0]["content"], "hi");
        let temperature = json["temperature"].as_f64().unwrap();
        assert!((temperature - 0.1).abs() < 1e-6);
    }

    #[test]
    fn response_parsing() {
        let parsed: ChatResponse = serde_json::from_str(
            r#"{"id":"x","choices":[{"index":0,"message":{"role":"assistant","content":"{\"status\":\"ignore\"}"}}]}"#,
        )
        .unwrap();
        assert_eq!(
            parsed.choices[0].message.content.as_deref(),
            Some(r#"{"status":"ignore"}"#)
        );

        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        assert!(empty.choices.is_empty());
    }

    #[test]
    fn error_parsing() {
        let parsed: ErrorResponse = serde_json::from_str(
            r#"{"error":{"message":"Incorrect API key provided","type":"invalid_request_error"}}"#,
        )
        .unwrap();
        assert_eq!(parsed.error.message, "Incorrect API key provided");
    }
}

//! Telegram Bot API transport.

use crate::alert::AlertTransport;
use crate::config::AlertsConfig;
use crate::error::{CallSentryError, Result};
use crate::http;
use serde::{Deserialize, Serialize};
use tracing::debug;

pub struct TelegramTransport {
    http: reqwest::Client,
    url: String,
    chat_id: String,
    parse_mode: Option<String>,
}

#[derive(Debug, Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    parse_mode: Option<&'a str>,
    disable_web_page_preview: bool,
}

#[derive(Debug, Deserialize)]
struct BotResponse {
    ok: bool,
    description: Option<String>,
}

impl TelegramTransport {
    pub fn new(config: &AlertsConfig) -> Result<Self> {
        Ok(Self {
            http: http::build_client(config.timeout_secs)?,
            url: send_message_url(&config.api_base, &config.telegram_bot_token),
            chat_id: config.telegram_chat_id.clone(),
            parse_mode: config
                .parse_mode
                .clone()
                .filter(|m| !m.trim().is_empty()),
        })
    }

    fn payload<'a>(&'a self, text: &'a str) -> SendMessage<'a> {
        SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: self.parse_mode.as_deref(),
            disable_web_page_preview: true,
        }
    }
}

fn send_message_url(api_base: &str, token: &str) -> String {
    format!("{}/bot{token}/sendMessage", api_base.trim_end_matches('/'))
}

#[async_trait::async_trait]
impl AlertTransport for TelegramTransport {
    async fn send(&self, message: &str) -> Result<()> {
        // The URL embeds the bot token; keep reqwest's error text out of logs.
        let response = self
            .http
            .post(&self.url)
            .json(&self.payload(message))
            .send()
            .await
            .map_err(|e| alert_error(format!("request failed: {}", e.without_url())))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| alert_error(format!("failed to read response: {}", e.without_url())))?;
        let parsed: Option<BotResponse> = serde_json::from_str(&body).ok();

        match parsed {
            Some(BotResponse { ok: true, .. }) if status.is_success() => {
                debug!(chat_id = %self.chat_id, "alert delivered");
                Ok(())
            }
            Some(BotResponse { description, .. }) => Err(alert_error(format!(
                "{status}: {}",
                description.unwrap_or_else(|| "no description".to_string())
            ))),
            None => Err(alert_error(format!("{status}: {}", http::body_excerpt(&body)))),
        }
    }
}

fn alert_error(message: String) -> CallSentryError {
    CallSentryError::Alert { message }
}

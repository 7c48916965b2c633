//! Telphin REST API: OAuth token, call listing and recordings.

use crate::config::TelephonyConfig;
use crate::defaults;
use crate::error::{CallSentryError, Result};
use crate::http;
use crate::state::is_storable_call_id;
use crate::telephony::{CallRecord, CallSource, Direction, RecordingFetcher, TimeWindow};
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Telphin client. Authenticates lazily on first use and reuses the token
/// for the rest of the run.
pub struct TelphinClient {
    http: reqwest::Client,
    base_url: String,
    auth_url: String,
    client_id: String,
    client_secret: String,
    offset: FixedOffset,
    page_size: u32,
    max_pages: u32,
    token: OnceCell<String>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// One entry of the listing payload.
#[derive(Debug, Deserialize)]
struct RawCall {
    call_uuid: Option<String>,
    flow: Option<String>,
    start_time_gmt: Option<String>,
    init_time_gmt: Option<String>,
    duration: Option<Value>,
    bridged_duration: Option<Value>,
    result: Option<String>,
    from_username: Option<String>,
    to_username: Option<String>,
    bridged_username: Option<String>,
}

impl TelphinClient {
    pub fn new(config: &TelephonyConfig) -> Result<Self> {
        Ok(Self {
            http: http::build_client(config.timeout_secs)?,
            base_url: http::base_url(&config.hostname),
            auth_url: config.auth_url.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            offset: config.provider_offset()?,
            page_size: config.page_size.max(1),
            max_pages: config.max_pages.max(1),
            token: OnceCell::new(),
        })
    }

    /// Bearer token, fetched once.
    pub async fn token(&self) -> Result<&str> {
        let token = self
            .token
            .get_or_try_init(|| self.authenticate())
            .await?;
        Ok(token.as_str())
    }

    async fn authenticate(&self) -> Result<String> {
        debug!(url = %self.auth_url, "requesting telephony token");
        let response = self
            .http
            .post(&self.auth_url)
            .form(&[
                ("grant_type", "client_credentials"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
            ])
            .send()
            .await
            .map_err(|e| CallSentryError::Auth {
                message: format!("request failed: {e}"),
            })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| CallSentryError::Auth {
            message: format!("failed to read response: {e}"),
        })?;
        if !status.is_success() {
            return Err(CallSentryError::Auth {
                message: format!("{status}: {}", http::body_excerpt(&body)),
            });
        }

        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| CallSentryError::Auth {
                message: format!("unexpected token response: {e}"),
            })?;
        match parsed.access_token {
            Some(token) if !token.is_empty() => {
                info!("authenticated with telephony provider");
                Ok(token)
            }
            _ => Err(CallSentryError::Auth {
                message: "token response has no access_token".to_string(),
            }),
        }
    }

    fn calls_url(&self) -> String {
        format!("{}/api/ver1.0/client/@me/calls/", self.base_url)
    }

    fn record_url(&self, call_id: &str) -> String {
        format!("{}/api/ver1.0/client/@me/record/{call_id}/", self.base_url)
    }

    async fn fetch_page(&self, start: &str, end: &str, page: u32) -> Result<Vec<Value>> {
        let token = self.token().await?;
        let page_size = self.page_size.to_string();
        let page_no = page.to_string();
        let response = self
            .http
            .get(self.calls_url())
            .bearer_auth(token)
            .query(&[
                ("start_datetime", start),
                ("end_datetime", end),
                ("per_page", page_size.as_str()),
                ("page", page_no.as_str()),
            ])
            .send()
            .await
            .map_err(|e| listing_error(format!("request failed: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| listing_error(format!("failed to read response: {e}")))?;
        if !status.is_success() {
            return Err(listing_error(format!(
                "{status}: {}",
                http::body_excerpt(&body)
            )));
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|e| listing_error(format!("response is not JSON: {e}")))?;
        extract_calls(value)
    }
}

#[async_trait::async_trait]
impl CallSource for TelphinClient {
    async fn list_calls(&self, window: &TimeWindow) -> Result<Vec<CallRecord>> {
        let (start, end) = window_bounds(window, self.offset);
        info!(%start, %end, "listing calls");

        let mut seen = HashSet::new();
        let mut calls = Vec::new();
        for page in 1..=self.max_pages {
            let raw = self.fetch_page(&start, &end, page).await?;
            let page_len = raw.len();

            let mut fresh = 0usize;
            for value in raw {
                if let Some(call) = into_record(value)?
                    && seen.insert(call.id.clone())
                {
                    calls.push(call);
                    fresh += 1;
                }
            }
            debug!(page, page_len, fresh, "fetched call page");

            if page_len < self.page_size as usize || fresh == 0 {
                break;
            }
            if page == self.max_pages {
                warn!(
                    max_pages = self.max_pages,
                    "page limit reached, later calls are picked up next run"
                );
            }
        }

        info!(count = calls.len(), "calls retrieved");
        Ok(calls)
    }
}

#[async_trait::async_trait]
impl RecordingFetcher for TelphinClient {
    async fn probe(&self, call_id: &str) -> Result<Option<u64>> {
        let token = self.token().await?;
        let response = self
            .http
            .head(self.record_url(call_id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| recording_error(call_id, format!("probe failed: {e}")))?;

        match response.status() {
            StatusCode::NOT_FOUND | StatusCode::NO_CONTENT => Ok(None),
            status if status.is_success() => {
                let size = response
                    .headers()
                    .get(reqwest::header::CONTENT_LENGTH)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok());
                match size {
                    Some(0) => Ok(None),
                    Some(n) => Ok(Some(n)),
                    None => Ok(Some(0)),
                }
            }
            status => Err(recording_error(call_id, format!("probe returned {status}"))),
        }
    }

    async fn fetch(&self, call_id: &str) -> Result<Option<Vec<u8>>> {
        let token = self.token().await?;
        let response = self
            .http
            .get(self.record_url(call_id))
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| recording_error(call_id, format!("download failed: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(recording_error(call_id, format!("download returned {status}")));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| recording_error(call_id, format!("failed to read body: {e}")))?;
        if bytes.is_empty() {
            return Ok(None);
        }
        debug!(call_id, bytes = bytes.len(), "recording downloaded");
        Ok(Some(bytes.to_vec()))
    }
}

/// Render the window in the provider's local zone and lexical format.
pub fn window_bounds(window: &TimeWindow, offset: FixedOffset) -> (String, String) {
    let render = |t: DateTime<Utc>| {
        t.with_timezone(&offset)
            .format(defaults::PROVIDER_DATETIME_FORMAT)
            .to_string()
    };
    (render(window.start), render(window.end))
}

/// Accept a bare list, `{"calls": [...]}` or `{"results": [...]}`.
fn extract_calls(value: Value) -> Result<Vec<Value>> {
    match value {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => {
            for key in ["calls", "results"] {
                if let Some(Value::Array(items)) = map.remove(key) {
                    return Ok(items);
                }
            }
            Err(listing_error(
                "response object has no 'calls' or 'results' list".to_string(),
            ))
        }
        other => Err(listing_error(format!(
            "unexpected response shape: {}",
            json_kind(&other)
        ))),
    }
}

/// `Ok(None)` for entries without a call id.
fn into_record(value: Value) -> Result<Option<CallRecord>> {
    let raw: RawCall = serde_json::from_value(value)
        .map_err(|e| listing_error(format!("malformed call entry: {e}")))?;

    let Some(id) = raw.call_uuid.filter(|id| !id.trim().is_empty()) else {
        warn!("skipping call entry without call_uuid");
        return Ok(None);
    };
    if !is_storable_call_id(&id) {
        warn!(call_id = ?id, "skipping call entry with whitespace in call_uuid");
        return Ok(None);
    }

    let start_raw = raw
        .start_time_gmt
        .as_deref()
        .or(raw.init_time_gmt.as_deref())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| listing_error(format!("call {id} has no start time")))?;
    let start_time = parse_provider_time(start_raw)
        .ok_or_else(|| listing_error(format!("call {id} has unparseable start time '{start_raw}'")))?;

    Ok(Some(CallRecord {
        direction: Direction::from_flow(raw.flow.as_deref().unwrap_or_default()),
        start_time,
        duration_secs: as_secs(raw.duration.as_ref()),
        bridged_duration_secs: as_secs(raw.bridged_duration.as_ref()),
        outcome: raw.result.unwrap_or_default(),
        caller_party: raw.from_username,
        called_party: raw.to_username,
        bridged_party: raw.bridged_username,
        id,
    }))
}

/// GMT timestamps come as `%Y-%m-%d %H:%M:%S`; RFC 3339 is accepted too.
fn parse_provider_time(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, defaults::PROVIDER_DATETIME_FORMAT)
        .map(|naive| naive.and_utc())
        .ok()
        .or_else(|| {
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|t| t.with_timezone(&Utc))
        })
}

/// Durations arrive as integers, floats or numeric strings.
fn as_secs(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f.round() as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|f| *f >= 0.0)
            .map(|f| f.round() as u64)
            .unwrap_or(0),
        _ => 0,
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn listing_error(message: String) -> CallSentryError {
    CallSentryError::CallSource { message }
}

fn recording_error(call_id: &str, message: String) -> CallSentryError {
    CallSentryError::Recording {
        message: format!("{call_id}: {message}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn moscow() -> FixedOffset {
        FixedOffset::east_opt(3 * 3600).unwrap()
    }

    #[test]
    fn window_bounds_render_in_provider_zone() {
        let end = Utc.with_ymd_and_hms(2025, 6, 1, 9, 15, 0).unwrap();
        let window = TimeWindow::trailing(end, std::time::Duration::from_secs(3600));

        let (start, end) = window_bounds(&window, moscow());
        assert_eq!(start, "2025-06-01 11:15:00");
        assert_eq!(end, "2025-06-01 12:15:00");
    }

    #[test]
    fn window_bounds_cross_midnight() {
        let end = Utc.with_ymd_and_hms(2025, 6, 1, 21, 30, 0).unwrap();
        let window = TimeWindow::trailing(end, std::time::Duration::from_secs(2 * 3600));

        let (start, end) = window_bounds(&window, moscow());
        assert_eq!(start, "2025-06-01 22:30:00");
        assert_eq!(end, "2025-06-02 00:30:00");
    }

    #[test]
    fn extract_calls_accepts_all_envelopes() {
        let entry = json!({"call_uuid": "a"});
        assert_eq!(extract_calls(json!([entry.clone()])).unwrap().len(), 1);
        assert_eq!(
            extract_calls(json!({"calls": [entry.clone(), entry.clone()]}))
                .unwrap()
                .len(),
            2
        );
        assert_eq!(
            extract_calls(json!({"results": [], "count": 0})).unwrap().len(),
            0
        );
    }

    #[test]
    fn extract_calls_rejects_unknown_shapes() {
        assert!(extract_calls(json!({"data": []})).is_err());
        assert!(extract_calls(json!("nope")).is_err());
        assert!(extract_calls(json!(null)).is_err());
    }

    #[test]
    fn into_record_maps_provider_fields() {
        let record = into_record(json!({
            "call_uuid": "7d1c",
            "flow": "in",
            "start_time_gmt": "2025-06-01 08:00:05",
            "duration": 42,
            "bridged_duration": "37",
            "result": "answered",
            "from_username": "79001234567@sip.telphin.ru",
            "to_username": "0001*101",
            "bridged_username": null
        }))
        .unwrap()
        .unwrap();

        assert_eq!(record.id, "7d1c");
        assert_eq!(record.direction, Direction::Inbound);
        assert_eq!(
            record.start_time,
            Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 5).unwrap()
        );
        assert_eq!(record.duration_secs, 42);
        assert_eq!(record.bridged_duration_secs, 37);
        assert_eq!(record.outcome, "answered");
        assert_eq!(record.client_number().as_deref(), Some("79001234567"));
    }

    #[test]
    fn into_record_falls_back_to_init_time() {
        let record = into_record(json!({
            "call_uuid": "x",
            "flow": "out",
            "init_time_gmt": "2025-06-01 07:59:58"
        }))
        .unwrap()
        .unwrap();
        assert_eq!(record.direction, Direction::Outbound);
        assert_eq!(
            record.start_time,
            Utc.with_ymd_and_hms(2025, 6, 1, 7, 59, 58).unwrap()
        );
        assert_eq!(record.duration_secs, 0);
    }

    #[test]
    fn into_record_skips_entries_without_id() {
        let skipped = into_record(json!({"flow": "in", "start_time_gmt": "2025-06-01 08:00:00"}));
        assert!(skipped.unwrap().is_none());
        let blank = into_record(json!({"call_uuid": " ", "start_time_gmt": "2025-06-01 08:00:00"}));
        assert!(blank.unwrap().is_none());
    }

    #[test]
    fn into_record_skips_ids_the_store_cannot_keep() {
        for id in ["call 42", "call\t42", "abc\n"] {
            let entry = into_record(json!({"call_uuid": id, "start_time_gmt": "2025-06-01 08:00:00"}));
            assert!(entry.unwrap().is_none(), "{id:?} should be skipped");
        }
    }

    #[test]
    fn into_record_missing_or_bad_start_time_is_malformed() {
        let missing = into_record(json!({"call_uuid": "a", "flow": "in"}));
        assert!(matches!(missing, Err(CallSentryError::CallSource { .. })));

        let bad = into_record(json!({"call_uuid": "a", "start_time_gmt": "yesterday"}));
        assert!(matches!(bad, Err(CallSentryError::CallSource { .. })));
    }

    #[test]
    fn parse_provider_time_accepts_rfc3339() {
        assert_eq!(
            parse_provider_time("2025-06-01T11:00:00+03:00"),
            Some(Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap())
        );
    }

    #[test]
    fn as_secs_handles_number_shapes() {
        assert_eq!(as_secs(Some(&json!(12))), 12);
        assert_eq!(as_secs(Some(&json!(12.6))), 13);
        assert_eq!(as_secs(Some(&json!("9"))), 9);
        assert_eq!(as_secs(Some(&json!(-4))), 0);
        assert_eq!(as_secs(Some(&json!("n/a"))), 0);
        assert_eq!(as_secs(None), 0);
    }

    #[test]
    fn client_builds_urls_from_hostname() {
        let config = TelephonyConfig {
            hostname: "apiproxy.telphin.ru".to_string(),
            ..TelephonyConfig::default()
        };
        let client = TelphinClient::new(&config).unwrap();
        assert_eq!(
            client.calls_url(),
            "https://apiproxy.telphin.ru/api/ver1.0/client/@me/calls/"
        );
        assert_eq!(
            client.record_url("abc"),
            "https://apiproxy.telphin.ru/api/ver1.0/client/@me/record/abc/"
        );
    }
}

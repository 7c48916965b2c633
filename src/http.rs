//! Shared HTTP client construction for the external APIs.

use crate::error::{CallSentryError, Result};
use std::time::Duration;

/// Build a client with a request timeout and a product user agent.
pub fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .user_agent(concat!("callsentry/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| CallSentryError::Other(format!("Failed to build HTTP client: {e}")))
}

/// Prefix the host with `https://` unless a scheme is already present.
pub fn base_url(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("https://{host}")
    }
}

/// Short, single-line excerpt of a response body for error messages.
pub fn body_excerpt(body: &str) -> String {
    const MAX: usize = 200;
    let flat: String = body
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    let flat = flat.trim();
    if flat.chars().count() <= MAX {
        flat.to_string()
    } else {
        let cut: String = flat.chars().take(MAX).collect();
        format!("{cut}...")
    }
}

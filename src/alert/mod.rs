//! Alert formatting and delivery.

pub mod format;
pub mod telegram;

pub use format::AlertFormatter;
pub use telegram::TelegramTransport;

use crate::classifier::AlertDetails;
use crate::error::{CallSentryError, Result};
use crate::telephony::CallRecord;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::info;

/// Delivers a rendered message. One attempt per call, no retries.
#[async_trait::async_trait]
pub trait AlertTransport: Send + Sync {
    async fn send(&self, message: &str) -> Result<()>;
}

/// Formats an alert and sends it through a transport.
pub struct AlertDispatcher {
    formatter: AlertFormatter,
    transport: Arc<dyn AlertTransport>,
}

impl AlertDispatcher {
    pub fn new(formatter: AlertFormatter, transport: Arc<dyn AlertTransport>) -> Self {
        Self {
            formatter,
            transport,
        }
    }

    pub async fn dispatch(&self, details: &AlertDetails, call: &CallRecord) -> Result<()> {
        let message = self.formatter.format(details, call);
        self.transport.send(&message).await?;
        info!(call_id = %call.id, "alert sent");
        Ok(())
    }
}

/// Mock transport for testing. Records every message it accepts.
#[derive(Debug, Default)]
pub struct MockAlertTransport {
    should_fail: bool,
    sent: Mutex<Vec<String>>,
    attempts: Mutex<usize>,
}

impl MockAlertTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the mock to reject every message
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Messages delivered successfully.
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Send attempts, successful or not.
    pub fn attempts(&self) -> usize {
        *self.attempts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait::async_trait]
impl AlertTransport for MockAlertTransport {
    async fn send(&self, message: &str) -> Result<()> {
        *self.attempts.lock().unwrap_or_else(|e| e.into_inner()) += 1;
        if self.should_fail {
            return Err(CallSentryError::Alert {
                message: "mock transport failure".to_string(),
            });
        }
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(message.to_string());
        Ok(())
    }
}

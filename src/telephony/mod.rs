//! Call metadata and recordings from the telephony provider.

pub mod telphin;

pub use telphin::TelphinClient;

use crate::error::{CallSentryError, Result};
use chrono::{DateTime, Duration, FixedOffset, Utc};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Call direction as reported by the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
    Unknown,
}

impl Direction {
    /// Map the provider's `flow` field.
    pub fn from_flow(flow: &str) -> Self {
        match flow.trim() {
            "in" => Direction::Inbound,
            "out" => Direction::Outbound,
            _ => Direction::Unknown,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Direction::Inbound => "in",
            Direction::Outbound => "out",
            Direction::Unknown => "unknown",
        })
    }
}

/// One call as reported by the provider.
///
/// `id` is stable across queries and is the only deduplication key.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRecord {
    pub id: String,
    pub direction: Direction,
    pub start_time: DateTime<Utc>,
    pub duration_secs: u64,
    pub bridged_duration_secs: u64,
    pub outcome: String,
    pub caller_party: Option<String>,
    pub called_party: Option<String>,
    pub bridged_party: Option<String>,
}

impl CallRecord {
    /// Minimal record; remaining fields can be set with the `with_*` builders.
    pub fn new(id: impl Into<String>, direction: Direction, start_time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            direction,
            start_time,
            duration_secs: 0,
            bridged_duration_secs: 0,
            outcome: String::new(),
            caller_party: None,
            called_party: None,
            bridged_party: None,
        }
    }

    pub fn with_duration(mut self, secs: u64) -> Self {
        self.duration_secs = secs;
        self
    }

    pub fn with_outcome(mut self, outcome: &str) -> Self {
        self.outcome = outcome.to_string();
        self
    }

    pub fn with_parties(
        mut self,
        caller: Option<&str>,
        called: Option<&str>,
        bridged: Option<&str>,
    ) -> Self {
        self.caller_party = caller.map(str::to_string);
        self.called_party = called.map(str::to_string);
        self.bridged_party = bridged.map(str::to_string);
        self
    }

    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::Inbound
    }

    /// The customer's number with any `@domain` routing suffix removed.
    ///
    /// Inbound: bridged party, else caller. Outbound: called party, else
    /// bridged party.
    pub fn client_number(&self) -> Option<String> {
        let raw = match self.direction {
            Direction::Inbound => first_present(&self.bridged_party, &self.caller_party),
            Direction::Outbound | Direction::Unknown => {
                first_present(&self.called_party, &self.bridged_party)
            }
        }?;
        let number = raw.split('@').next().unwrap_or(raw).trim();
        (!number.is_empty()).then(|| number.to_string())
    }

    /// Start time rendered in the provider's local zone.
    pub fn local_start(&self, offset: FixedOffset) -> String {
        self.start_time
            .with_timezone(&offset)
            .format("%Y-%m-%d %H:%M:%S %:z")
            .to_string()
    }

    pub fn metadata(&self, offset: FixedOffset) -> CallMetadata {
        CallMetadata {
            duration_secs: self.duration_secs,
            local_start: self.local_start(offset),
            direction: self.direction,
        }
    }
}

fn first_present<'a>(a: &'a Option<String>, b: &'a Option<String>) -> Option<&'a str> {
    a.as_deref()
        .filter(|s| !s.trim().is_empty())
        .or_else(|| b.as_deref().filter(|s| !s.trim().is_empty()))
}

/// Call facts handed to the classifier prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct CallMetadata {
    pub duration_secs: u64,
    pub local_start: String,
    pub direction: Direction,
}

/// Trailing interval `[start, end)` queried on a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeWindow {
    pub fn trailing(end: DateTime<Utc>, length: std::time::Duration) -> Self {
        let length = Duration::from_std(length).unwrap_or(Duration::hours(1));
        Self {
            start: end - length,
            end,
        }
    }
}

/// Lists calls for a time window.
#[async_trait::async_trait]
pub trait CallSource: Send + Sync {
    /// Calls in provider order. Any failure aborts the run.
    async fn list_calls(&self, window: &TimeWindow) -> Result<Vec<CallRecord>>;
}

/// Checks for and downloads call recordings.
#[async_trait::async_trait]
pub trait RecordingFetcher: Send + Sync {
    /// Size in bytes when a recording exists, `None` when it does not.
    async fn probe(&self, call_id: &str) -> Result<Option<u64>>;

    /// Recording bytes, `None` when there is no recording.
    async fn fetch(&self, call_id: &str) -> Result<Option<Vec<u8>>>;
}

/// Mock call source for testing
#[derive(Debug, Default)]
pub struct MockCallSource {
    calls: Vec<CallRecord>,
    should_fail: bool,
    requests: AtomicUsize,
}

impl MockCallSource {
    pub fn new(calls: Vec<CallRecord>) -> Self {
        Self {
            calls,
            ..Self::default()
        }
    }

    /// Configure the mock to fail every listing
    pub fn with_failure(mut self) -> Self {
        self.should_fail = true;
        self
    }

    /// Number of `list_calls` invocations so far.
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl CallSource for MockCallSource {
    async fn list_calls(&self, window: &TimeWindow) -> Result<Vec<CallRecord>> {
        self.requests.fetch_add(1, Ordering::SeqCst);
        if self.should_fail {
            return Err(CallSentryError::CallSource {
                message: "mock listing failure".to_string(),
            });
        }
        Ok(self
            .calls
            .iter()
            .filter(|c| c.start_time >= window.start && c.start_time < window.end)
            .cloned()
            .collect())
    }
}

/// Mock recording fetcher for testing.
///
/// Calls without a registered recording have none.
#[derive(Debug, Default)]
pub struct MockRecordingFetcher {
    recordings: HashMap<String, Vec<u8>>,
    probe_failures: HashSet<String>,
    fetch_failures: HashSet<String>,
    probed: Mutex<Vec<String>>,
    fetched: Mutex<Vec<String>>,
}

impl MockRecordingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recording(mut self, call_id: &str, bytes: Vec<u8>) -> Self {
        self.recordings.insert(call_id.to_string(), bytes);
        self
    }

    /// Make `probe` error for this call.
    pub fn with_probe_failure(mut self, call_id: &str) -> Self {
        self.probe_failures.insert(call_id.to_string());
        self
    }

    /// Make `fetch` error for this call even though `probe` reports it.
    pub fn with_fetch_failure(mut self, call_id: &str) -> Self {
        self.fetch_failures.insert(call_id.to_string());
        self
    }

    pub fn probed(&self) -> Vec<String> {
        self.probed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait::async_trait]
impl RecordingFetcher for MockRecordingFetcher {
    async fn probe(&self, call_id: &str) -> Result<Option<u64>> {
        self.probed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call_id.to_string());
        if self.probe_failures.contains(call_id) {
            return Err(CallSentryError::Recording {
                message: "mock probe failure".to_string(),
            });
        }
        let reported = self.recordings.get(call_id).map(|b| b.len() as u64);
        if reported.is_none() && self.fetch_failures.contains(call_id) {
            return Ok(Some(0));
        }
        Ok(reported)
    }

    async fn fetch(&self, call_id: &str) -> Result<Option<Vec<u8>>> {
        self.fetched
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call_id.to_string());
        if self.fetch_failures.contains(call_id) {
            return Err(CallSentryError::Recording {
                message: "mock download failure".to_string(),
            });
        }
        Ok(self.recordings.get(call_id).cloned())
    }
}

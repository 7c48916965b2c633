//! Durable record of which calls have been processed and how.

pub mod store;

pub use store::{FileStateStore, is_storable_call_id};

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

/// Outcome recorded for a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    /// Early commit: the call entered processing.
    Processing,
    NoRecording,
    TranscriptionError,
    AnalysisFailed,
    AnalyzedIgnore,
    CriticalAlertSent,
    AlertFailed,
}

impl ProcessingStatus {
    pub const ALL: [ProcessingStatus; 7] = [
        ProcessingStatus::Processing,
        ProcessingStatus::NoRecording,
        ProcessingStatus::TranscriptionError,
        ProcessingStatus::AnalysisFailed,
        ProcessingStatus::AnalyzedIgnore,
        ProcessingStatus::CriticalAlertSent,
        ProcessingStatus::AlertFailed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::NoRecording => "no_recording",
            ProcessingStatus::TranscriptionError => "transcription_error",
            ProcessingStatus::AnalysisFailed => "analysis_failed",
            ProcessingStatus::AnalyzedIgnore => "analyzed_ignore",
            ProcessingStatus::CriticalAlertSent => "critical_alert_sent",
            ProcessingStatus::AlertFailed => "alert_failed",
        }
    }

    /// A terminal status is never revisited by the orchestrator.
    pub fn is_terminal(self) -> bool {
        self != ProcessingStatus::Processing
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ProcessingStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown status '{s}'"))
    }
}

/// One logical entry of the state store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingEntry {
    pub call_id: String,
    pub status: ProcessingStatus,
    pub recorded_at: DateTime<Utc>,
}

/// Storage seam for processed-call tracking, injected into the orchestrator.
pub trait StateStore: Send + Sync {
    /// Every call id with any entry, processing or terminal.
    fn load_all(&self) -> Result<HashSet<String>>;

    /// Create the entry for `call_id`.
    ///
    /// A no-op when the id already has an entry. Returns whether anything
    /// was written.
    fn record(&self, call_id: &str, status: ProcessingStatus) -> Result<bool>;

    /// Move an existing entry to `status`.
    fn complete(&self, call_id: &str, status: ProcessingStatus) -> Result<()>;

    /// All entries, oldest first.
    fn entries(&self) -> Result<Vec<ProcessingEntry>>;

    /// Rewrite the store if it grew past its ceiling.
    ///
    /// Returns the number of entries evicted, if a compaction ran.
    fn compact_if_needed(&self) -> Result<Option<usize>>;
}

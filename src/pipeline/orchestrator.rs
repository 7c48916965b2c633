//! One pipeline run: list, filter, then drive each call to a terminal status.

use crate::alert::AlertDispatcher;
use crate::classifier::{ClassificationVerdict, Classifier};
use crate::defaults;
use crate::error::Result;
use crate::lock::RunLock;
use crate::pipeline::report::RunReport;
use crate::state::{ProcessingStatus, StateStore};
use crate::stt::{AudioClip, TranscriptionSelector};
use crate::telephony::{CallRecord, CallSource, RecordingFetcher, TimeWindow};
use chrono::{DateTime, FixedOffset, Offset, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-run settings.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub window: Duration,
    pub lock_path: PathBuf,
    /// Provider-local zone for prompts and alerts.
    pub provider_offset: FixedOffset,
    /// Process the most recent calls regardless of history and record nothing.
    pub deployment_check: bool,
    pub deployment_check_limit: usize,
}

impl RunOptions {
    pub fn new(lock_path: impl Into<PathBuf>) -> Self {
        Self {
            window: Duration::from_secs(defaults::WINDOW_HOURS * 3600),
            lock_path: lock_path.into(),
            provider_offset: FixedOffset::east_opt(defaults::PROVIDER_UTC_OFFSET_HOURS * 3600)
                .unwrap_or_else(|| Utc.fix()),
            deployment_check: false,
            deployment_check_limit: defaults::DEPLOYMENT_CHECK_LIMIT,
        }
    }
}

/// External collaborators of a run.
pub struct Collaborators {
    pub calls: Arc<dyn CallSource>,
    pub recordings: Arc<dyn RecordingFetcher>,
    pub transcription: TranscriptionSelector,
    pub classifier: Classifier,
    pub alerts: AlertDispatcher,
    pub state: Arc<dyn StateStore>,
}

pub struct Orchestrator {
    parts: Collaborators,
    options: RunOptions,
}

impl Orchestrator {
    pub fn new(parts: Collaborators, options: RunOptions) -> Self {
        Self { parts, options }
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Run once for the window ending now.
    pub async fn run(&self) -> Result<RunReport> {
        self.run_at(Utc::now()).await
    }

    /// Run once for the window ending at `now`.
    ///
    /// Fails with `AlreadyLocked` without touching anything when another run
    /// holds the lock. The lock is released on every return path.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let lock = RunLock::acquire(&self.options.lock_path)?;
        let result = self.run_locked(now).await;
        lock.release();
        result
    }

    async fn run_locked(&self, now: DateTime<Utc>) -> Result<RunReport> {
        let persist = !self.options.deployment_check;
        let mut report = RunReport {
            deployment_check: self.options.deployment_check,
            ..RunReport::default()
        };

        let processed = if persist {
            self.parts.state.load_all()?
        } else {
            HashSet::new()
        };
        debug!(count = processed.len(), "loaded processed calls");

        let window = TimeWindow::trailing(now, self.options.window);
        let calls = self.parts.calls.list_calls(&window).await?;
        report.retrieved = calls.len();

        let mut seen = HashSet::new();
        let new_calls: Vec<CallRecord> = calls
            .into_iter()
            .filter(|c| !processed.contains(&c.id) && seen.insert(c.id.clone()))
            .collect();
        report.new = new_calls.len();

        let mut eligible = Vec::new();
        for call in new_calls {
            if !call.is_inbound() {
                debug!(call_id = %call.id, direction = %call.direction, "skipping non-inbound call");
                report.skipped_not_inbound += 1;
                continue;
            }
            match self.parts.recordings.probe(&call.id).await {
                Ok(Some(size)) => {
                    debug!(call_id = %call.id, size, "recording available");
                    eligible.push(call);
                }
                Ok(None) => {
                    debug!(call_id = %call.id, "no recording yet");
                    report.awaiting_recording += 1;
                }
                Err(e) => {
                    warn!(call_id = %call.id, "recording probe failed, retrying next run: {e}");
                    report.awaiting_recording += 1;
                }
            }
        }

        if !persist {
            eligible = most_recent(eligible, self.options.deployment_check_limit);
        }
        report.eligible = eligible.len();
        info!(
            retrieved = report.retrieved,
            new = report.new,
            eligible = report.eligible,
            "calls selected"
        );

        for (i, call) in eligible.iter().enumerate() {
            info!(
                call_id = %call.id,
                n = i + 1,
                of = eligible.len(),
                duration_secs = call.duration_secs,
                "processing call"
            );
            if let Some(status) = self.process_call(call, persist).await? {
                report.record(status);
            }
        }

        info!(
            processed = report.processed(),
            alerts = report.alerts_sent(),
            "run complete"
        );
        Ok(report)
    }

    /// Early commit, handle, terminal commit. `None` when the call turned out
    /// to be recorded already.
    async fn process_call(
        &self,
        call: &CallRecord,
        persist: bool,
    ) -> Result<Option<ProcessingStatus>> {
        if persist && !self.parts.state.record(&call.id, ProcessingStatus::Processing)? {
            warn!(call_id = %call.id, "call already has a state entry, skipping");
            return Ok(None);
        }

        let status = self.handle(call).await;
        info!(call_id = %call.id, %status, "call finished");

        if persist {
            self.parts.state.complete(&call.id, status)?;
            if let Some(evicted) = self.parts.state.compact_if_needed()? {
                debug!(evicted, "state store compacted");
            }
        }
        Ok(Some(status))
    }

    /// Drive one call to a terminal status. Per-call failures end here.
    async fn handle(&self, call: &CallRecord) -> ProcessingStatus {
        let bytes = match self.parts.recordings.fetch(&call.id).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                warn!(call_id = %call.id, "recording disappeared after probe");
                return ProcessingStatus::NoRecording;
            }
            Err(e) => {
                warn!(call_id = %call.id, "recording download failed: {e}");
                return ProcessingStatus::NoRecording;
            }
        };

        let clip = AudioClip::new(bytes, call.duration_secs, format!("{}.mp3", call.id));
        let transcript = match self.parts.transcription.transcribe(&clip).await {
            Ok(t) => t,
            Err(e) => {
                warn!(call_id = %call.id, "transcription failed: {e}");
                return ProcessingStatus::TranscriptionError;
            }
        };
        debug!(
            call_id = %call.id,
            provider = %transcript.provider,
            chars = transcript.text.chars().count(),
            "transcribed"
        );

        let metadata = call.metadata(self.options.provider_offset);
        let verdict = match self
            .parts
            .classifier
            .classify(&transcript.text, &metadata)
            .await
        {
            Ok(v) => v,
            Err(e) => {
                warn!(call_id = %call.id, "classification failed: {e}");
                return ProcessingStatus::AnalysisFailed;
            }
        };

        match verdict {
            ClassificationVerdict::Ignore { .. } => ProcessingStatus::AnalyzedIgnore,
            ClassificationVerdict::Alert(details) => {
                match self.parts.alerts.dispatch(&details, call).await {
                    Ok(()) => ProcessingStatus::CriticalAlertSent,
                    Err(e) => {
                        warn!(call_id = %call.id, "alert delivery failed: {e}");
                        ProcessingStatus::AlertFailed
                    }
                }
            }
        }
    }
}

/// Keep the `limit` latest calls by start time, in their original order.
fn most_recent(calls: Vec<CallRecord>, limit: usize) -> Vec<CallRecord> {
    if calls.len() <= limit {
        return calls;
    }
    let mut by_time: Vec<(usize, DateTime<Utc>)> = calls
        .iter()
        .enumerate()
        .map(|(i, c)| (i, c.start_time))
        .collect();
    by_time.sort_by(|a, b| b.1.cmp(&a.1));
    let keep: HashSet<usize> = by_time.into_iter().take(limit).map(|(i, _)| i).collect();
    calls
        .into_iter()
        .enumerate()
        .filter(|(i, _)| keep.contains(i))
        .map(|(_, c)| c)
        .collect()
}

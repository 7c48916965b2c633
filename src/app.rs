//! Composition root: wires configuration into concrete collaborators.

use crate::alert::{AlertDispatcher, AlertFormatter, TelegramTransport};
use crate::classifier::{Classifier, OpenAiChat, PromptTemplates};
use crate::cli::RunArgs;
use crate::config::Config;
use crate::error::Result;
use crate::lock::RunLock;
use crate::pipeline::{Collaborators, Orchestrator, RunOptions, RunReport};
use crate::state::{FileStateStore, ProcessingEntry, ProcessingStatus, StateStore};
use crate::stt::{SpeechToText, TranscriptionSelector, WhisperApi, YandexSpeechKit};
use crate::telephony::TelphinClient;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Run options from config, with command-line overrides applied.
pub fn run_options(config: &Config, args: &RunArgs) -> Result<RunOptions> {
    let mut options = RunOptions::new(config.lock_path());
    options.window = args
        .window
        .unwrap_or(Duration::from_secs(config.pipeline.window_hours * 3600));
    options.provider_offset = config.telephony.provider_offset()?;
    options.deployment_check = args.deployment_check;
    options.deployment_check_limit = args
        .limit
        .unwrap_or(config.pipeline.deployment_check_limit);
    Ok(options)
}

pub fn open_state_store(config: &Config) -> FileStateStore {
    FileStateStore::with_limits(
        config.state_path(),
        config.state.compaction_ceiling,
        config.state.compaction_retain,
    )
}

/// Compact the state file while holding the run lock.
///
/// Fails with `AlreadyLocked` when a run is in progress.
pub fn compact_state(config: &Config) -> Result<Option<usize>> {
    let lock = RunLock::acquire(&config.lock_path())?;
    let evicted = open_state_store(config).compact_if_needed();
    lock.release();
    evicted
}

/// Build a ready-to-run orchestrator against the live services.
pub fn build_orchestrator(config: &Config, args: &RunArgs) -> Result<Orchestrator> {
    config.validate()?;
    let options = run_options(config, args)?;

    let telphin = Arc::new(TelphinClient::new(&config.telephony)?);

    let primary: Arc<dyn SpeechToText> = Arc::new(YandexSpeechKit::new(&config.transcription)?);
    let secondary: Option<Arc<dyn SpeechToText>> = if config.transcription.secondary_enabled() {
        Some(Arc::new(WhisperApi::new(&config.transcription)?))
    } else {
        warn!("no Whisper fallback configured; calls over the primary limit will fail");
        None
    };

    let prompts = PromptTemplates::load(&config.classifier.prompts_dir);
    let alert_template = prompts.alert_template.clone();
    let classifier = Classifier::new(Arc::new(OpenAiChat::new(&config.classifier)?), prompts);

    let alerts = AlertDispatcher::new(
        AlertFormatter::new(alert_template, options.provider_offset),
        Arc::new(TelegramTransport::new(&config.alerts)?),
    );

    let parts = Collaborators {
        calls: telphin.clone(),
        recordings: telphin,
        transcription: TranscriptionSelector::new(primary, secondary),
        classifier,
        alerts,
        state: Arc::new(open_state_store(config)),
    };
    Ok(Orchestrator::new(parts, options))
}

/// Validate, build and run the pipeline once.
pub async fn run_pipeline(config: &Config, args: &RunArgs) -> Result<RunReport> {
    let orchestrator = build_orchestrator(config, args)?;
    info!(
        version = %crate::version_string(),
        window_secs = orchestrator.options().window.as_secs(),
        deployment_check = orchestrator.options().deployment_check,
        "starting run"
    );
    orchestrator.run().await
}

/// Entries matching `status`, keeping only the last `tail`.
pub fn state_list(
    store: &dyn StateStore,
    status: Option<ProcessingStatus>,
    tail: Option<usize>,
) -> Result<Vec<ProcessingEntry>> {
    let mut entries: Vec<ProcessingEntry> = store
        .entries()?
        .into_iter()
        .filter(|e| status.is_none_or(|s| e.status == s))
        .collect();
    if let Some(n) = tail
        && entries.len() > n
    {
        entries.drain(..entries.len() - n);
    }
    Ok(entries)
}

/// Entry count per status. Every status is present, zeros included.
pub fn state_stats(store: &dyn StateStore) -> Result<BTreeMap<ProcessingStatus, usize>> {
    let mut counts: BTreeMap<ProcessingStatus, usize> =
        ProcessingStatus::ALL.into_iter().map(|s| (s, 0)).collect();
    for entry in store.entries()? {
        *counts.entry(entry.status).or_default() += 1;
    }
    Ok(counts)
}

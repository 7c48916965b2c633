//! Local health checks for `callsentry check`.
//!
//! Verifies configuration, credentials, prompt templates, the state store
//! and the run lock without contacting any remote service.

use crate::classifier::PromptTemplates;
use crate::config::Config;
use crate::lock;
use crate::state::{FileStateStore, StateStore};
use owo_colors::OwoColorize;
use std::path::Path;

/// Result of a single check.
#[derive(Debug, PartialEq)]
pub enum CheckResult {
    /// Check passed; the string is an optional detail
    Ok(String),
    /// Something required is missing
    Missing(String),
    /// Usable, but worth a look
    Warning(String),
}

impl CheckResult {
    pub fn is_ok(&self) -> bool {
        !matches!(self, CheckResult::Missing(_))
    }
}

/// Show only the first and last two characters of a secret.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.trim().chars().collect();
    if chars.len() <= 6 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..2].iter().collect();
    let tail: String = chars[chars.len() - 2..].iter().collect();
    format!("{head}...{tail}")
}

fn check_value(value: &str, env: &str) -> CheckResult {
    if value.trim().is_empty() {
        CheckResult::Missing(format!("not set (export {env})"))
    } else {
        CheckResult::Ok(mask_secret(value))
    }
}

/// Every credential a run needs, plus the optional fallback key.
pub fn check_credentials(config: &Config) -> Vec<(&'static str, CheckResult)> {
    let mut results = vec![
        (
            "Telphin host",
            if config.telephony.hostname.trim().is_empty() {
                CheckResult::Missing("not set (export TELFIN_HOSTNAME)".to_string())
            } else {
                CheckResult::Ok(config.telephony.hostname.clone())
            },
        ),
        (
            "Telphin client id",
            check_value(&config.telephony.client_id, "TELFIN_LOGIN"),
        ),
        (
            "Telphin client secret",
            check_value(&config.telephony.client_secret, "TELFIN_PASSWORD"),
        ),
        (
            "Yandex SpeechKit key",
            check_value(&config.transcription.yandex_api_key, "YANDEX_API_KEY"),
        ),
        (
            "Classifier key",
            check_value(&config.classifier.api_key, "OPENAI_API_KEY"),
        ),
        (
            "Telegram bot token",
            check_value(&config.alerts.telegram_bot_token, "TELEGRAM_BOT_TOKEN"),
        ),
        (
            "Telegram chat id",
            check_value(&config.alerts.telegram_chat_id, "TELEGRAM_CHAT_ID"),
        ),
    ];

    let fallback = if config.transcription.secondary_enabled() {
        CheckResult::Ok(format!(
            "{} via {}",
            config.transcription.whisper_model,
            mask_secret(&config.transcription.openai_api_key)
        ))
    } else if !config.transcription.fallback_enabled {
        CheckResult::Warning("disabled; calls over the primary limit will fail".to_string())
    } else {
        CheckResult::Warning(
            "no OpenAI key; calls over the primary limit will fail".to_string(),
        )
    };
    results.push(("Whisper fallback", fallback));
    results
}

/// All prompt sections present in `dir`.
pub fn check_prompts(dir: &Path) -> CheckResult {
    if !dir.is_dir() {
        return CheckResult::Missing(format!("{} is not a directory", dir.display()));
    }
    let prompts = PromptTemplates::load(dir);
    if prompts.missing().is_empty() {
        let template = if prompts.alert_template.is_some() {
            "custom alert template"
        } else {
            "built-in alert template"
        };
        CheckResult::Ok(format!("{} ({template})", dir.display()))
    } else {
        CheckResult::Warning(format!(
            "missing: {}",
            prompts.missing().join(", ")
        ))
    }
}

/// State file readable; reports the entry count.
pub fn check_state(store: &FileStateStore) -> CheckResult {
    if !store.path().exists() {
        return CheckResult::Ok(format!(
            "{} (not created yet)",
            store.path().display()
        ));
    }
    match store.entries() {
        Ok(entries) => CheckResult::Ok(format!(
            "{} ({} entries)",
            store.path().display(),
            entries.len()
        )),
        Err(e) => CheckResult::Missing(e.to_string()),
    }
}

/// Whether a run is in progress right now.
pub fn check_lock(path: &Path) -> CheckResult {
    match lock::is_locked(path) {
        Ok(false) => CheckResult::Ok(format!("{} (free)", path.display())),
        Ok(true) => CheckResult::Warning(format!("{} is held by a running instance", path.display())),
        Err(e) => CheckResult::Warning(e.to_string()),
    }
}

fn print_result(label: &str, result: &CheckResult) {
    print!("{label}: ");
    match result {
        CheckResult::Ok(detail) if detail.is_empty() => println!("{}", "✓ OK".green()),
        CheckResult::Ok(detail) => println!("{} {detail}", "✓ OK".green()),
        CheckResult::Missing(msg) => println!("{} {msg}", "✗ MISSING".red()),
        CheckResult::Warning(msg) => println!("{} {msg}", "⚠ WARNING".yellow()),
    }
}

/// Run all checks and print results. Returns false when a run would fail.
pub fn run_checks(config: &Config, config_path: &Path) -> bool {
    println!("Checking callsentry setup...\n");

    let config_file = if config_path.exists() {
        CheckResult::Ok(config_path.display().to_string())
    } else {
        CheckResult::Warning(format!(
            "{} not found, using defaults and environment",
            config_path.display()
        ))
    };
    print_result("Config file", &config_file);

    let validation = match config.validate() {
        Ok(()) => CheckResult::Ok(String::new()),
        Err(e) => CheckResult::Missing(e.to_string()),
    };
    print_result("Config values", &validation);

    println!();
    println!("Credentials:");
    let credentials = check_credentials(config);
    for (label, result) in &credentials {
        print_result(&format!("  {label}"), result);
    }

    println!();
    let prompts = check_prompts(&config.classifier.prompts_dir);
    print_result("Prompt templates", &prompts);
    let state = check_state(&FileStateStore::new(config.state_path()));
    print_result("State store", &state);
    let run_lock = check_lock(&config.lock_path());
    print_result("Run lock", &run_lock);

    let ready = validation.is_ok()
        && credentials.iter().all(|(_, r)| r.is_ok())
        && prompts.is_ok()
        && state.is_ok();

    println!();
    if ready {
        println!("{}", "✓ Ready to run.".green());
    } else {
        println!("{}", "✗ Fix the items above before scheduling runs.".red());
    }
    ready
}

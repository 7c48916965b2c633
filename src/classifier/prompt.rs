//! Prompt template sections loaded from the prompt directory.

use crate::telephony::CallMetadata;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const SYSTEM_CONTEXT_FILE: &str = "system_context.txt";
pub const CLASSIFICATION_FILE: &str = "step1_classification.txt";
pub const FAULT_CODES_FILE: &str = "manager_fault_codes.txt";
pub const DETAILED_ANALYSIS_FILE: &str = "step2_detailed_analysis.txt";
pub const FINAL_INSTRUCTIONS_FILE: &str = "final_instructions.txt";
pub const ALERT_TEMPLATE_FILE: &str = "alert_template.txt";

/// Section files in prompt order.
pub const SECTION_FILES: [&str; 5] = [
    SYSTEM_CONTEXT_FILE,
    CLASSIFICATION_FILE,
    FAULT_CODES_FILE,
    DETAILED_ANALYSIS_FILE,
    FINAL_INSTRUCTIONS_FILE,
];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PromptTemplates {
    pub system_context: String,
    pub classification: String,
    pub fault_codes: String,
    pub detailed_analysis: String,
    pub final_instructions: String,
    /// Overrides the built-in alert layout when present.
    pub alert_template: Option<String>,
    dir: PathBuf,
    missing: Vec<String>,
}

impl PromptTemplates {
    /// Read every section from `dir`. A missing or unreadable file leaves its
    /// section empty.
    pub fn load(dir: &Path) -> Self {
        let mut missing = Vec::new();
        let mut section = |name: &str| match read_section(dir, name) {
            Some(text) => text,
            None => {
                missing.push(name.to_string());
                String::new()
            }
        };

        let system_context = section(SYSTEM_CONTEXT_FILE);
        let classification = section(CLASSIFICATION_FILE);
        let fault_codes = section(FAULT_CODES_FILE);
        let detailed_analysis = section(DETAILED_ANALYSIS_FILE);
        let final_instructions = section(FINAL_INSTRUCTIONS_FILE);

        let alert_path = dir.join(ALERT_TEMPLATE_FILE);
        let alert_template = fs::read_to_string(&alert_path)
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        if alert_template.is_some() {
            debug!(path = %alert_path.display(), "using custom alert template");
        }

        Self {
            system_context,
            classification,
            fault_codes,
            detailed_analysis,
            final_instructions,
            alert_template,
            dir: dir.to_path_buf(),
            missing,
        }
    }

    /// Directory the templates were read from.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Section files that could not be read.
    pub fn missing(&self) -> &[String] {
        &self.missing
    }

    /// Full prompt: context, call details, fenced transcript, then the
    /// instruction sections.
    pub fn compose(&self, transcript: &str, call: Option<&CallMetadata>) -> String {
        let details = call.map(format_call_details).unwrap_or_default();
        format!(
            "{}\n\n{}\n**Transcript:**\n---\n{}\n---\n\n{}\n\n{}\n\n{}\n\n{}\n",
            self.system_context,
            details,
            transcript.trim(),
            self.classification,
            self.fault_codes,
            self.detailed_analysis,
            self.final_instructions,
        )
    }
}

fn read_section(dir: &Path, name: &str) -> Option<String> {
    let path = dir.join(name);
    match fs::read_to_string(&path) {
        Ok(text) => {
            debug!(path = %path.display(), "loaded prompt section");
            Some(text.trim().to_string())
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            warn!(path = %path.display(), "prompt file not found, section left empty");
            None
        }
        Err(e) => {
            warn!(path = %path.display(), "failed to read prompt file: {e}");
            None
        }
    }
}

fn format_call_details(call: &CallMetadata) -> String {
    let mut parts = Vec::new();
    if call.duration_secs > 0 {
        parts.push(format!("Duration: {} s", call.duration_secs));
    }
    if !call.local_start.is_empty() {
        parts.push(format!("Time: {}", call.local_start));
    }
    parts.push(format!("Direction: {}", call.direction));
    format!("**Call details:**\n{}\n", parts.join(" | "))
}

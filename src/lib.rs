//! callsentry - lost-sale alerts from recorded sales calls
//!
//! Each run lists recent inbound calls, transcribes their recordings,
//! classifies the transcript with a language model and alerts on calls the
//! manager lost.

// Enforce error handling discipline
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]
#![warn(clippy::let_underscore_must_use)]

pub mod alert;
pub mod classifier;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod defaults;
#[cfg(feature = "cli")]
pub mod diagnostics;
pub mod error;
pub mod http;
pub mod lock;
pub mod pipeline;
pub mod state;
pub mod stt;
pub mod sys;
pub mod telephony;

// Composition root - needs everything
#[cfg(feature = "cli")]
pub mod app;

// Collaborator seams
pub use alert::AlertTransport;
pub use classifier::LanguageModel;
pub use state::StateStore;
pub use stt::SpeechToText;
pub use telephony::{CallSource, RecordingFetcher};

// Pipeline
pub use pipeline::{Collaborators, Orchestrator, RunOptions, RunReport};

// Error handling
pub use error::{CallSentryError, Result};

// Config
pub use config::Config;

/// Build version string with optional git commit hash.
///
/// Returns `"0.1.0+abc1234"` when git hash is available, `"0.1.0"` otherwise.
pub fn version_string() -> String {
    let version = env!("CARGO_PKG_VERSION");
    match option_env!("GIT_HASH") {
        Some(hash) if !hash.is_empty() => format!("{}+{}", version, hash),
        _ => version.to_string(),
    }
}

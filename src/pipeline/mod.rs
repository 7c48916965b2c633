//! Call-processing pipeline.
//!
//! A run lists recent calls, keeps new inbound calls with a recording, and
//! takes each one through download, transcription, classification and
//! (when warranted) an alert. Calls are handled strictly one after another;
//! every outcome is committed to the state store before the next call starts.

pub mod orchestrator;
pub mod report;

pub use orchestrator::{Collaborators, Orchestrator, RunOptions};
pub use report::RunReport;

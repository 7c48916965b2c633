//! Default configuration constants for callsentry.
//!
//! Shared constants used by the configuration types and the pipeline
//! components so the two never drift apart.

/// Default trailing window, in hours, queried on every run.
pub const WINDOW_HOURS: u64 = 1;

/// Logical entry count above which the state store is compacted.
pub const COMPACTION_CEILING: usize = 1000;

/// Number of most recent entries kept by a compaction.
pub const COMPACTION_RETAIN: usize = 800;

/// Longest clip, in seconds, the primary (short-form) recognizer accepts.
///
/// Clips strictly longer than this are reported as `LengthExceeded` and are
/// eligible for the secondary provider.
pub const PRIMARY_MAX_AUDIO_SECS: u64 = 30;

/// Largest upload, in bytes, the secondary recognizer accepts (25 MB).
pub const SECONDARY_MAX_AUDIO_BYTES: usize = 25 * 1024 * 1024;

/// Calls requested per listing page.
pub const PAGE_SIZE: u32 = 100;

/// Upper bound on listing pages fetched per run.
pub const MAX_PAGES: u32 = 20;

/// Provider-local UTC offset in hours (Europe/Moscow, no DST).
pub const PROVIDER_UTC_OFFSET_HOURS: i32 = 3;

/// Lexical datetime format expected by the telephony API.
pub const PROVIDER_DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Default HTTP timeout for external calls, in seconds.
pub const HTTP_TIMEOUT_SECS: u64 = 60;

/// Default chat model used by the classifier.
pub const CLASSIFIER_MODEL: &str = "gpt-4o";

/// Low temperature keeps the JSON verdict stable.
pub const CLASSIFIER_TEMPERATURE: f32 = 0.1;

/// The verdict is a small JSON object; a tight token budget is enough.
pub const CLASSIFIER_MAX_TOKENS: u32 = 800;

/// Number of calls processed in deployment-check mode.
pub const DEPLOYMENT_CHECK_LIMIT: usize = 2;

/// Telegram rejects messages longer than this many characters.
pub const ALERT_MAX_CHARS: usize = 4096;

/// Placeholder for absent alert fields.
pub const NOT_AVAILABLE: &str = "N/A";

/// Placeholder for an absent error code.
pub const UNKNOWN_ERROR_CODE: &str = "UNKNOWN";

/// State store file name inside the data directory.
pub const STATE_FILE_NAME: &str = "processed_calls.txt";

/// Run lock file name inside the data directory.
pub const LOCK_FILE_NAME: &str = "callsentry.lock";

/// Default directory holding prompt templates.
pub const PROMPTS_DIR: &str = "prompts";

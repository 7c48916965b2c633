//! Error types for callsentry.

use crate::stt::SttError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CallSentryError {
    // Configuration errors
    #[error("Configuration file not found at {path}")]
    ConfigFileNotFound { path: String },

    #[error("Failed to parse configuration: {message}")]
    ConfigParse { message: String },

    #[error("Invalid configuration value for {key}: {message}")]
    ConfigInvalidValue { key: String, message: String },

    #[error("Configuration error: {0}")]
    Config(#[from] toml::de::Error),

    // Run lock errors
    #[error("Another run holds the lock at {path}")]
    AlreadyLocked { path: String },

    #[error("Run lock error: {message}")]
    Lock { message: String },

    // State store errors
    #[error("State store error: {message}")]
    StateStore { message: String },

    // Telephony errors
    #[error("Telephony authentication failed: {message}")]
    Auth { message: String },

    #[error("Call listing failed: {message}")]
    CallSource { message: String },

    #[error("Recording error: {message}")]
    Recording { message: String },

    // Transcription errors
    #[error("Transcription error: {0}")]
    Transcription(#[from] SttError),

    // Classifier errors
    #[error("Classifier error: {message}")]
    Classifier { message: String },

    // Alert errors
    #[error("Alert dispatch failed: {message}")]
    Alert { message: String },

    // General I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Generic error for cases not covered above
    #[error("{0}")]
    Other(String),
}

// Type alias for convenience
pub type Result<T> = std::result::Result<T, CallSentryError>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_config_invalid_value_display() {
        let error = CallSentryError::ConfigInvalidValue {
            key: "telephony.hostname".to_string(),
            message: "must be set".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid configuration value for telephony.hostname: must be set"
        );
    }

    #[test]
    fn test_already_locked_display() {
        let error = CallSentryError::AlreadyLocked {
            path: "/run/callsentry.lock".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Another run holds the lock at /run/callsentry.lock"
        );
    }

    #[test]
    fn test_auth_display() {
        let error = CallSentryError::Auth {
            message: "401 Unauthorized".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Telephony authentication failed: 401 Unauthorized"
        );
    }

    #[test]
    fn test_state_store_display() {
        let error = CallSentryError::StateStore {
            message: "disk full".to_string(),
        };
        assert_eq!(error.to_string(), "State store error: disk full");
    }

    #[test]
    fn test_from_stt_error() {
        let error: CallSentryError = SttError::NoFallback.into();
        assert!(error.to_string().starts_with("Transcription error:"));
    }

    #[test]
    fn test_from_io_error() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let error: CallSentryError = io_error.into();
        assert!(error.to_string().contains("file not found"));
    }

    #[test]
    fn test_from_toml_error() {
        let toml_error = toml::from_str::<toml::Value>("invalid = toml = syntax").unwrap_err();
        let error: CallSentryError = toml_error.into();
        assert!(error.to_string().contains("Configuration error"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<CallSentryError>();
        assert_sync::<CallSentryError>();
    }
}

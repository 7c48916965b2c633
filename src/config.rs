use crate::defaults;
use crate::error::{CallSentryError, Result};
use chrono::FixedOffset;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub pipeline: PipelineConfig,
    pub state: StateConfig,
    pub telephony: TelephonyConfig,
    pub transcription: TranscriptionConfig,
    pub classifier: ClassifierConfig,
    pub alerts: AlertsConfig,
}

/// Run-level settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Trailing window queried on each run.
    pub window_hours: u64,
    /// Run lock file. Defaults to the data directory.
    pub lock_path: Option<PathBuf>,
    /// Calls processed by `run --deployment-check`.
    pub deployment_check_limit: usize,
}

/// Processed-call store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StateConfig {
    pub path: Option<PathBuf>,
    pub compaction_ceiling: usize,
    pub compaction_retain: usize,
}

/// Telphin API access
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TelephonyConfig {
    pub hostname: String,
    pub client_id: String,
    pub client_secret: String,
    pub auth_url: String,
    pub utc_offset_hours: i32,
    pub page_size: u32,
    pub max_pages: u32,
    pub timeout_secs: u64,
}

/// Speech-to-text providers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TranscriptionConfig {
    pub yandex_api_key: String,
    pub yandex_url: String,
    pub language: String,
    pub audio_format: String,
    pub max_primary_secs: u64,
    /// Empty disables the Whisper fallback.
    pub openai_api_key: String,
    pub whisper_url: String,
    pub whisper_model: String,
    pub whisper_language: String,
    pub fallback_enabled: bool,
    pub timeout_secs: u64,
}

/// Language-model classifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassifierConfig {
    pub api_key: String,
    pub url: String,
    pub model: String,
    pub prompts_dir: PathBuf,
    pub temperature: f32,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

/// Telegram alert delivery
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertsConfig {
    pub telegram_bot_token: String,
    pub telegram_chat_id: String,
    pub api_base: String,
    /// `Markdown`, `MarkdownV2` or `HTML`; plain text when unset.
    pub parse_mode: Option<String>,
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            window_hours: defaults::WINDOW_HOURS,
            lock_path: None,
            deployment_check_limit: defaults::DEPLOYMENT_CHECK_LIMIT,
        }
    }
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: None,
            compaction_ceiling: defaults::COMPACTION_CEILING,
            compaction_retain: defaults::COMPACTION_RETAIN,
        }
    }
}

impl Default for TelephonyConfig {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            client_id: String::new(),
            client_secret: String::new(),
            auth_url: "https://apiproxy.telphin.ru/oauth/token".to_string(),
            utc_offset_hours: defaults::PROVIDER_UTC_OFFSET_HOURS,
            page_size: defaults::PAGE_SIZE,
            max_pages: defaults::MAX_PAGES,
            timeout_secs: defaults::HTTP_TIMEOUT_SECS,
        }
    }
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            yandex_api_key: String::new(),
            yandex_url: "https://stt.api.cloud.yandex.net/speech/v1/stt:recognize".to_string(),
            language: "ru-RU".to_string(),
            audio_format: "mp3".to_string(),
            max_primary_secs: defaults::PRIMARY_MAX_AUDIO_SECS,
            openai_api_key: String::new(),
            whisper_url: "https://api.openai.com/v1/audio/transcriptions".to_string(),
            whisper_model: "whisper-1".to_string(),
            whisper_language: "ru".to_string(),
            fallback_enabled: true,
            timeout_secs: defaults::HTTP_TIMEOUT_SECS * 2,
        }
    }
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            url: "https://api.openai.com/v1/chat/completions".to_string(),
            model: defaults::CLASSIFIER_MODEL.to_string(),
            prompts_dir: PathBuf::from(defaults::PROMPTS_DIR),
            temperature: defaults::CLASSIFIER_TEMPERATURE,
            max_tokens: defaults::CLASSIFIER_MAX_TOKENS,
            timeout_secs: defaults::HTTP_TIMEOUT_SECS,
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: String::new(),
            telegram_chat_id: String::new(),
            api_base: "https://api.telegram.org".to_string(),
            parse_mode: None,
            timeout_secs: 30,
        }
    }
}

impl TranscriptionConfig {
    /// Whisper is used only when a key is present and fallback is on.
    pub fn secondary_enabled(&self) -> bool {
        self.fallback_enabled && !self.openai_api_key.trim().is_empty()
    }
}

impl TelephonyConfig {
    pub fn provider_offset(&self) -> Result<FixedOffset> {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).ok_or_else(|| {
            CallSentryError::ConfigInvalidValue {
                key: "telephony.utc_offset_hours".to_string(),
                message: format!("{} is not a valid UTC offset", self.utc_offset_hours),
            }
        })
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CallSentryError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                CallSentryError::ConfigParse {
                    message: format!("Failed to read {}: {e}", path.display()),
                }
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration from a file, or defaults if the file doesn't exist.
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Ok(config) => Ok(config),
            Err(CallSentryError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            Err(e) => Err(e),
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - TELFIN_HOSTNAME, TELFIN_LOGIN, TELFIN_PASSWORD → telephony
    /// - YANDEX_API_KEY → transcription.yandex_api_key
    /// - OPENAI_API_KEY → transcription.openai_api_key and classifier.api_key
    /// - TELEGRAM_BOT_TOKEN, TELEGRAM_CHAT_ID → alerts
    /// - TIME_WINDOW_HOURS → pipeline.window_hours
    /// - CALLSENTRY_STATE_PATH → state.path
    /// - CALLSENTRY_PROMPTS_DIR → classifier.prompts_dir
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_value("TELFIN_HOSTNAME") {
            self.telephony.hostname = v;
        }
        if let Some(v) = env_value("TELFIN_LOGIN") {
            self.telephony.client_id = v;
        }
        if let Some(v) = env_value("TELFIN_PASSWORD") {
            self.telephony.client_secret = v;
        }
        if let Some(v) = env_value("YANDEX_API_KEY") {
            self.transcription.yandex_api_key = v;
        }
        if let Some(v) = env_value("OPENAI_API_KEY") {
            self.transcription.openai_api_key = v.clone();
            self.classifier.api_key = v;
        }
        if let Some(v) = env_value("TELEGRAM_BOT_TOKEN") {
            self.alerts.telegram_bot_token = v;
        }
        if let Some(v) = env_value("TELEGRAM_CHAT_ID") {
            self.alerts.telegram_chat_id = v;
        }
        if let Some(v) = env_value("TIME_WINDOW_HOURS") {
            match v.parse::<u64>() {
                Ok(hours) if hours > 0 => self.pipeline.window_hours = hours,
                _ => warn!("ignoring TIME_WINDOW_HOURS={v}: expected a positive integer"),
            }
        }
        if let Some(v) = env_value("CALLSENTRY_STATE_PATH") {
            self.state.path = Some(PathBuf::from(v));
        }
        if let Some(v) = env_value("CALLSENTRY_PROMPTS_DIR") {
            self.classifier.prompts_dir = PathBuf::from(v);
        }
        self
    }

    /// Check everything a pipeline run needs.
    ///
    /// Reports the first problem found.
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("telephony.hostname", &self.telephony.hostname, "TELFIN_HOSTNAME"),
            ("telephony.client_id", &self.telephony.client_id, "TELFIN_LOGIN"),
            (
                "telephony.client_secret",
                &self.telephony.client_secret,
                "TELFIN_PASSWORD",
            ),
            (
                "transcription.yandex_api_key",
                &self.transcription.yandex_api_key,
                "YANDEX_API_KEY",
            ),
            ("classifier.api_key", &self.classifier.api_key, "OPENAI_API_KEY"),
            (
                "alerts.telegram_bot_token",
                &self.alerts.telegram_bot_token,
                "TELEGRAM_BOT_TOKEN",
            ),
            (
                "alerts.telegram_chat_id",
                &self.alerts.telegram_chat_id,
                "TELEGRAM_CHAT_ID",
            ),
        ];
        for (key, value, env) in required {
            if value.trim().is_empty() {
                return Err(invalid(key, &format!("must be set (or export {env})")));
            }
        }

        if self.pipeline.window_hours == 0 {
            return Err(invalid("pipeline.window_hours", "must be at least 1"));
        }
        if self.pipeline.deployment_check_limit == 0 {
            return Err(invalid("pipeline.deployment_check_limit", "must be at least 1"));
        }
        if self.state.compaction_ceiling == 0 {
            return Err(invalid("state.compaction_ceiling", "must be at least 1"));
        }
        if self.state.compaction_retain > self.state.compaction_ceiling {
            return Err(invalid(
                "state.compaction_retain",
                "must not exceed state.compaction_ceiling",
            ));
        }
        if self.telephony.page_size == 0 {
            return Err(invalid("telephony.page_size", "must be at least 1"));
        }
        if self.telephony.max_pages == 0 {
            return Err(invalid("telephony.max_pages", "must be at least 1"));
        }
        self.telephony.provider_offset()?;
        if !(0.0..=2.0).contains(&self.classifier.temperature) {
            return Err(invalid("classifier.temperature", "must be between 0 and 2"));
        }
        Ok(())
    }

    /// Resolved state file path.
    pub fn state_path(&self) -> PathBuf {
        self.state
            .path
            .clone()
            .unwrap_or_else(|| data_dir().join(defaults::STATE_FILE_NAME))
    }

    /// Resolved run lock path.
    pub fn lock_path(&self) -> PathBuf {
        self.pipeline
            .lock_path
            .clone()
            .unwrap_or_else(|| data_dir().join(defaults::LOCK_FILE_NAME))
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/callsentry/config.toml on Linux
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("callsentry")
            .join("config.toml")
    }
}

fn data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from(".local/share"))
        .join("callsentry")
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn invalid(key: &str, message: &str) -> CallSentryError {
    CallSentryError::ConfigInvalidValue {
        key: key.to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sys::{remove_env, set_env};
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    const ENV_KEYS: [&str; 10] = [
        "TELFIN_HOSTNAME",
        "TELFIN_LOGIN",
        "TELFIN_PASSWORD",
        "YANDEX_API_KEY",
        "OPENAI_API_KEY",
        "TELEGRAM_BOT_TOKEN",
        "TELEGRAM_CHAT_ID",
        "TIME_WINDOW_HOURS",
        "CALLSENTRY_STATE_PATH",
        "CALLSENTRY_PROMPTS_DIR",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            remove_env(key);
        }
    }

    fn complete_config() -> Config {
        let mut config = Config::default();
        config.telephony.hostname = "apiproxy.telphin.ru".into();
        config.telephony.client_id = "id".into();
        config.telephony.client_secret = "secret".into();
        config.transcription.yandex_api_key = "ya".into();
        config.classifier.api_key = "sk".into();
        config.alerts.telegram_bot_token = "123:abc".into();
        config.alerts.telegram_chat_id = "-100".into();
        config
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.pipeline.window_hours, 1);
        assert_eq!(config.pipeline.deployment_check_limit, 2);
        assert_eq!(config.state.compaction_ceiling, 1000);
        assert_eq!(config.state.compaction_retain, 800);
        assert_eq!(config.telephony.utc_offset_hours, 3);
        assert_eq!(config.telephony.page_size, 100);
        assert_eq!(config.transcription.max_primary_secs, 30);
        assert!(config.transcription.fallback_enabled);
        assert!(!config.transcription.secondary_enabled());
        assert_eq!(config.classifier.model, "gpt-4o");
        assert_eq!(config.classifier.max_tokens, 800);
        assert_eq!(config.classifier.prompts_dir, PathBuf::from("prompts"));
        assert_eq!(config.alerts.parse_mode, None);
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [pipeline]
            window_hours = 3
            lock_path = "/run/callsentry.lock"

            [state]
            path = "/var/lib/callsentry/processed_calls.txt"

            [telephony]
            hostname = "example.telphin.ru"
            client_id = "app"
            client_secret = "s3cret"
            utc_offset_hours = 5

            [transcription]
            yandex_api_key = "AQVN"
            openai_api_key = "sk-test"

            [classifier]
            model = "gpt-4o-mini"
            temperature = 0.0

            [alerts]
            telegram_chat_id = "-1001"
            parse_mode = "Markdown"
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(temp_file.path()).unwrap();

        assert_eq!(config.pipeline.window_hours, 3);
        assert_eq!(config.lock_path(), PathBuf::from("/run/callsentry.lock"));
        assert_eq!(
            config.state_path(),
            PathBuf::from("/var/lib/callsentry/processed_calls.txt")
        );
        assert_eq!(config.telephony.hostname, "example.telphin.ru");
        assert_eq!(config.telephony.utc_offset_hours, 5);
        assert!(config.transcription.secondary_enabled());
        assert_eq!(config.classifier.model, "gpt-4o-mini");
        assert_eq!(config.alerts.parse_mode.as_deref(), Some("Markdown"));

        // Untouched fields keep defaults
        assert_eq!(config.telephony.page_size, 100);
        assert_eq!(config.classifier.max_tokens, 800);
    }

    #[test]
    fn test_env_overrides_credentials() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        set_env("TELFIN_HOSTNAME", "host.example");
        set_env("TELFIN_LOGIN", "login");
        set_env("TELFIN_PASSWORD", "password");
        set_env("OPENAI_API_KEY", "sk-env");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.telephony.hostname, "host.example");
        assert_eq!(config.telephony.client_id, "login");
        assert_eq!(config.telephony.client_secret, "password");
        assert_eq!(config.transcription.openai_api_key, "sk-env");
        assert_eq!(config.classifier.api_key, "sk-env");
        assert!(config.transcription.secondary_enabled());

        clear_env();
    }

    #[test]
    fn test_env_override_window_and_paths() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        set_env("TIME_WINDOW_HOURS", "6");
        set_env("CALLSENTRY_STATE_PATH", "/tmp/state.txt");
        set_env("CALLSENTRY_PROMPTS_DIR", "/etc/callsentry/prompts");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.pipeline.window_hours, 6);
        assert_eq!(config.state_path(), PathBuf::from("/tmp/state.txt"));
        assert_eq!(
            config.classifier.prompts_dir,
            PathBuf::from("/etc/callsentry/prompts")
        );

        clear_env();
    }

    #[test]
    fn test_env_override_invalid_window_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        set_env("TIME_WINDOW_HOURS", "soon");
        assert_eq!(Config::default().with_env_overrides().pipeline.window_hours, 1);

        set_env("TIME_WINDOW_HOURS", "0");
        assert_eq!(Config::default().with_env_overrides().pipeline.window_hours, 1);

        clear_env();
    }

    #[test]
    fn test_env_override_empty_string_ignored() {
        let _lock = ENV_LOCK.lock().unwrap();
        clear_env();

        set_env("TELFIN_HOSTNAME", "");
        set_env("YANDEX_API_KEY", "   ");
        let config = Config::default().with_env_overrides();

        assert_eq!(config.telephony.hostname, "");
        assert_eq!(config.transcription.yandex_api_key, "");

        clear_env();
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        assert!(complete_config().validate().is_ok());
    }

    #[test]
    fn test_validate_reports_missing_credential() {
        let mut config = complete_config();
        config.alerts.telegram_chat_id.clear();

        match config.validate() {
            Err(CallSentryError::ConfigInvalidValue { key, message }) => {
                assert_eq!(key, "alerts.telegram_chat_id");
                assert!(message.contains("TELEGRAM_CHAT_ID"));
            }
            other => panic!("expected ConfigInvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_missing_classifier_key_is_fatal() {
        let mut config = complete_config();
        config.classifier.api_key.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_compaction_limits() {
        let mut config = complete_config();
        config.state.compaction_retain = 2000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_offset() {
        let mut config = complete_config();
        config.telephony.utc_offset_hours = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_secondary_disabled_by_flag() {
        let mut config = complete_config();
        config.transcription.openai_api_key = "sk".into();
        config.transcription.fallback_enabled = false;
        assert!(!config.transcription.secondary_enabled());
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let invalid_toml = r#"
            [telephony
            hostname = "broken
        "#;

        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(invalid_toml.as_bytes()).unwrap();

        let result = Config::load(temp_file.path());

        assert!(matches!(result, Err(CallSentryError::Config(_))));
    }

    #[test]
    fn test_default_path_is_xdg_compliant() {
        let path = Config::default_path();
        let path_str = path.to_string_lossy();

        assert!(path_str.contains("callsentry"));
        assert!(path_str.ends_with("config.toml"));
    }

    #[test]
    fn test_load_or_default_returns_default_for_missing_file() {
        let missing_path = Path::new("/tmp/nonexistent_callsentry_config_12345.toml");
        let config = Config::load_or_default(missing_path).unwrap();

        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_load_or_default_errors_on_invalid_toml() {
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(b"[alerts\nparse_mode = ").unwrap();

        assert!(Config::load_or_default(temp_file.path()).is_err());
    }
}

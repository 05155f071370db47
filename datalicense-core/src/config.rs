//! Run configuration.
//!
//! Settings are read from a TOML file and then overlaid with environment
//! variables, so secrets never have to live in the file. Every component
//! receives the slice of settings it needs through its constructor.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::client::{TerminalIdentity, Trigger};

pub const DEFAULT_HOST: &str = "https://api.bloomberg.com";
pub const DEFAULT_TOKEN_URL: &str = "https://bsso.blpprofessional.com/ext/api/as/token.oauth2";

/// Credentials younger than this trigger an "expiring soon" warning.
const EXPIRY_WARNING_DAYS: i64 = 30;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {reason}")]
    Read { path: PathBuf, reason: String },

    #[error("parse config TOML: {0}")]
    Parse(String),

    #[error("missing required setting: {0}")]
    Missing(&'static str),

    #[error("invalid setting {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// OAuth2 client credentials as issued by the provider.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
    /// Expiry of the credential pair, epoch milliseconds.
    #[serde(default)]
    pub expiration_date: Option<i64>,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("client_id", &self.client_id)
            .field("client_secret", &"***")
            .field("expiration_date", &self.expiration_date)
            .finish()
    }
}

/// How soon the credentials expire relative to `now`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Valid,
    Unknown,
    ExpiringSoon { days_left: i64 },
    Expired { days_ago: i64 },
}

impl Credentials {
    pub fn status_at(&self, now: DateTime<Utc>) -> CredentialStatus {
        let Some(expires) = self.expiration_date.and_then(DateTime::from_timestamp_millis) else {
            return CredentialStatus::Unknown;
        };
        let remaining = expires - now;
        if remaining < Duration::zero() {
            CredentialStatus::Expired {
                days_ago: (-remaining).num_days(),
            }
        } else if remaining < Duration::days(EXPIRY_WARNING_DAYS) {
            CredentialStatus::ExpiringSoon {
                days_left: remaining.num_days(),
            }
        } else {
            CredentialStatus::Valid
        }
    }

    /// Warn about expired or soon-expiring credentials. Never fails.
    pub fn check(&self) -> CredentialStatus {
        let status = self.status_at(Utc::now());
        match status {
            CredentialStatus::Expired { days_ago } => {
                warn!(days_ago, "credentials expired {days_ago} days ago")
            }
            CredentialStatus::ExpiringSoon { days_left } => {
                warn!(days_left, "credentials expiring in {days_left} days")
            }
            CredentialStatus::Valid | CredentialStatus::Unknown => {}
        }
        status
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiSettings {
    pub host: String,
    pub token_url: String,
    pub api_version: String,
    pub http_timeout_secs: u64,
    pub poll_interval_secs: u64,
    /// Wall-clock budget for the poll loop.
    pub reply_timeout_min: u64,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            api_version: "2".to_string(),
            http_timeout_secs: 60,
            poll_interval_secs: 30,
            reply_timeout_min: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RequestSettings {
    pub identifier_type: String,
    pub fields: Vec<String>,
    pub trigger: Trigger,
    pub session_prefix: String,
    pub description: String,
    pub terminal_identity: Option<TerminalIdentity>,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            identifier_type: "ISIN".to_string(),
            fields: Vec::new(),
            trigger: Trigger::ExecuteNow,
            session_prefix: "pa".to_string(),
            description: "DLCLIENT".to_string(),
            terminal_identity: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentSettings {
    pub path: PathBuf,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub table: String,
    pub dir: PathBuf,
    pub ignore_columns: Vec<String>,
    pub delete_prev_records: bool,
    pub max_retries: u32,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            table: String::new(),
            dir: PathBuf::from("output"),
            ignore_columns: Vec::new(),
            delete_prev_records: true,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Complete settings for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub credentials: Credentials,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub request: RequestSettings,
    pub instruments: InstrumentSettings,
    #[serde(default)]
    pub output: OutputSettings,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Settings {
    /// Load from a TOML file, overlay the process environment, and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let mut settings = Self::from_toml(&content)?;
        settings.apply_env(|key| std::env::var(key).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Overlay values from an environment lookup.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(raw) = lookup("DATALICENSE_CREDENTIALS") {
            self.credentials =
                serde_json::from_str(&raw).map_err(|e| ConfigError::Invalid {
                    key: "DATALICENSE_CREDENTIALS",
                    reason: e.to_string(),
                })?;
        }
        if let Some(id) = lookup("DATALICENSE_CLIENT_ID") {
            self.credentials.client_id = id;
        }
        if let Some(secret) = lookup("DATALICENSE_CLIENT_SECRET") {
            self.credentials.client_secret = secret;
        }
        if let Some(level) = lookup("DATALICENSE_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Some(table) = lookup("DATALICENSE_OUTPUT_TABLE") {
            self.output.table = table;
        }
        if let Some(cols) = lookup("DATALICENSE_IGNORE_COLUMNS") {
            self.output.ignore_columns = split_column_list(&cols);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.credentials.client_id.is_empty() {
            return Err(ConfigError::Missing("credentials.client_id"));
        }
        if self.credentials.client_secret.is_empty() {
            return Err(ConfigError::Missing("credentials.client_secret"));
        }
        if self.request.fields.is_empty() {
            return Err(ConfigError::Missing("request.fields"));
        }
        if self.output.table.is_empty() {
            return Err(ConfigError::Missing("output.table"));
        }
        if self.instruments.path.as_os_str().is_empty() {
            return Err(ConfigError::Missing("instruments.path"));
        }
        if self.api.reply_timeout_min == 0 {
            return Err(ConfigError::Invalid {
                key: "api.reply_timeout_min",
                reason: "must be greater than zero".into(),
            });
        }
        if self.api.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "api.poll_interval_secs",
                reason: "must be greater than zero".into(),
            });
        }
        url::Url::parse(&self.api.host).map_err(|e| ConfigError::Invalid {
            key: "api.host",
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

/// Split a comma separated column list, skipping blanks.
pub fn split_column_list(raw: &str) -> Vec<String> {
    raw.trim()
        .split(',')
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(String::from)
        .collect()
}

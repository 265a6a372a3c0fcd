//! Configuration management for the verifier.
//!
//! Values are layered: TOML file, then `ATTEST_*` environment variables,
//! then command-line flags. `validate` runs last and rejects anything the
//! watcher cannot start with.

use crate::logging::LogFormat;
use crate::types::Address;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Backoff applied to failed polls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

/// Complete verifier configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifierConfig {
    /// Ledger gateway endpoint
    #[serde(default)]
    pub rpc_url: Option<String>,
    /// Attestation contract receiving verdicts
    #[serde(default)]
    pub contract_address: Option<Address>,
    /// File holding the verifier's Ed25519 signing key
    #[serde(default)]
    pub signing_key_path: Option<PathBuf>,
    /// Suppress real transactions
    #[serde(default)]
    pub dry_run: bool,
    /// Seconds between polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Block to start from when no cursor has been persisted
    #[serde(default)]
    pub start_block: u64,
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
    #[serde(default = "default_receipt_poll_interval")]
    pub receipt_poll_interval_ms: u64,
    #[serde(default = "default_gas_limit")]
    pub gas_limit: u64,
    /// Total submission attempts per verdict before it is abandoned
    #[serde(default = "default_max_submission_attempts")]
    pub max_submission_attempts: u32,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default = "default_audit_db_path")]
    pub audit_db_path: PathBuf,
    /// Optional directory mirroring each audit entry as one JSON file per id
    #[serde(default)]
    pub export_dir: Option<PathBuf>,
    /// Directory the content resolver reads reasoning documents from
    #[serde(default = "default_content_dir")]
    pub content_dir: PathBuf,
    /// Block explorer base URL for transaction links
    #[serde(default)]
    pub explorer_url: Option<String>,
    #[serde(default)]
    pub log_format: LogFormat,
}

fn default_poll_interval() -> u64 {
    10
}

fn default_confirmation_timeout() -> u64 {
    120
}

fn default_receipt_poll_interval() -> u64 {
    2_000
}

fn default_gas_limit() -> u64 {
    200_000
}

fn default_max_submission_attempts() -> u32 {
    5
}

fn default_initial_delay() -> u64 {
    1_000
}

fn default_max_delay() -> u64 {
    60_000
}

fn default_audit_db_path() -> PathBuf {
    PathBuf::from("logs/verifier-audit.db")
}

fn default_content_dir() -> PathBuf {
    PathBuf::from("reasoning")
}

impl Default for VerifierConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            contract_address: None,
            signing_key_path: None,
            dry_run: false,
            poll_interval_secs: default_poll_interval(),
            start_block: 0,
            confirmation_timeout_secs: default_confirmation_timeout(),
            receipt_poll_interval_ms: default_receipt_poll_interval(),
            gas_limit: default_gas_limit(),
            max_submission_attempts: default_max_submission_attempts(),
            retry: RetryConfig::default(),
            audit_db_path: default_audit_db_path(),
            export_dir: None,
            content_dir: default_content_dir(),
            explorer_url: None,
            log_format: LogFormat::default(),
        }
    }
}

impl VerifierConfig {
    /// Load from a TOML file. Missing keys take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Apply `ATTEST_*` overrides read through `lookup`, normally
    /// `|key| std::env::var(key).ok()`.
    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("ATTEST_RPC_URL") {
            self.rpc_url = Some(url);
        }
        if let Some(raw) = lookup("ATTEST_CONTRACT_ADDRESS") {
            let address = raw.parse().map_err(|e: crate::CoreError| ConfigError::InvalidValue {
                key: "ATTEST_CONTRACT_ADDRESS".to_string(),
                reason: e.to_string(),
            })?;
            self.contract_address = Some(address);
        }
        if let Some(path) = lookup("ATTEST_SIGNING_KEY_PATH") {
            self.signing_key_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = lookup("ATTEST_DRY_RUN") {
            self.dry_run = parse_bool("ATTEST_DRY_RUN", &raw)?;
        }
        if let Some(raw) = lookup("ATTEST_POLL_INTERVAL_SECS") {
            self.poll_interval_secs = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "ATTEST_POLL_INTERVAL_SECS".to_string(),
                reason: format!("not an integer: {raw}"),
            })?;
        }
        if let Some(path) = lookup("ATTEST_AUDIT_DB") {
            self.audit_db_path = PathBuf::from(path);
        }
        if let Some(path) = lookup("ATTEST_CONTENT_DIR") {
            self.content_dir = PathBuf::from(path);
        }
        Ok(())
    }

    /// Reject configurations the verifier cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.rpc_url {
            None => return Err(ConfigError::Missing("rpc_url")),
            Some(url) if url.trim().is_empty() => return Err(ConfigError::Missing("rpc_url")),
            Some(_) => {}
        }
        if self.contract_address.is_none() {
            return Err(ConfigError::Missing("contract_address"));
        }
        if !self.dry_run && self.signing_key_path.is_none() {
            return Err(ConfigError::Missing("signing_key_path"));
        }
        if self.poll_interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "poll_interval_secs must be at least 1".to_string(),
            ));
        }
        if self.confirmation_timeout_secs == 0 || self.receipt_poll_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "confirmation timeouts must be non-zero".to_string(),
            ));
        }
        if self.max_submission_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "max_submission_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry.initial_delay_ms == 0 || self.retry.max_delay_ms < self.retry.initial_delay_ms {
            return Err(ConfigError::ValidationError(
                "retry delays must satisfy 0 < initial_delay_ms <= max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }
}

fn parse_bool(key: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            reason: format!("not a boolean: {other}"),
        }),
    }
}

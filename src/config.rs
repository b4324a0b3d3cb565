// src/config.rs

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::models::Source;
use crate::transfer::TransferOptions;

pub const DEFAULT_MODEL_URL: &str = "https://huggingface.co/TheBloke/Mistral-7B-Instruct-v0.2-GGUF/resolve/main/mistral-7b-instruct-v0.2.Q4_K_M.gguf";

/// 4.08 GiB, the advertised size of the Q4_K_M quantization.
pub const DEFAULT_MODEL_SIZE: u64 = 4_380_866_642;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Everything the manager needs to know about the artifact and the transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloaderConfig {
    pub primary_url: String,
    pub mirror_url: Option<String>,
    pub destination: PathBuf,
    /// Advertised artifact size in bytes.
    pub expected_size: u64,
    /// Free space required as a multiple of `expected_size`.
    pub storage_margin: f64,
    /// A finished file must be larger than this fraction of `expected_size`.
    pub verify_ratio: f64,
    /// Optional hex SHA-256 checked after the size check.
    pub sha256: Option<String>,
    pub stall_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub user_agent: String,
    /// Where a paused session is persisted. `None` keeps it in memory only.
    pub state_db: Option<PathBuf>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        let transfer = TransferOptions::default();
        Self {
            primary_url: DEFAULT_MODEL_URL.to_string(),
            mirror_url: Some(DEFAULT_MODEL_URL.to_string()),
            destination: PathBuf::from("mistral-7b-instruct-q4.gguf"),
            expected_size: DEFAULT_MODEL_SIZE,
            storage_margin: 1.2,
            verify_ratio: 0.95,
            sha256: None,
            stall_timeout_secs: transfer.stall_timeout.as_secs(),
            connect_timeout_secs: transfer.connect_timeout.as_secs(),
            user_agent: transfer.user_agent,
            state_db: None,
        }
    }
}

impl DownloaderConfig {
    /// Reads a JSON config; missing fields take their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.primary_url.is_empty() {
            return Err(ConfigError::Invalid("primary_url is empty".into()));
        }
        if !(self.storage_margin.is_finite() && self.storage_margin >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "storage_margin must be at least 1.0, got {}",
                self.storage_margin
            )));
        }
        if !(self.verify_ratio > 0.0 && self.verify_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "verify_ratio must be in (0, 1], got {}",
                self.verify_ratio
            )));
        }
        if self.stall_timeout_secs == 0 {
            return Err(ConfigError::Invalid("stall_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    /// URL for a source, `None` when no mirror is configured.
    pub fn url_for(&self, source: Source) -> Option<&str> {
        match source {
            Source::Primary => Some(self.primary_url.as_str()),
            Source::Mirror => self.mirror_url.as_deref(),
        }
    }

    pub fn transfer_options(&self) -> TransferOptions {
        TransferOptions {
            stall_timeout: Duration::from_secs(self.stall_timeout_secs),
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            user_agent: self.user_agent.clone(),
        }
    }
}

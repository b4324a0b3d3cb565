// src/models.rs

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::transfer::ResumeData;

/// Lifecycle of a download session.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Active,
    Paused,
    Cancelled,
    Completed,
    Failed,
}

impl SessionState {
    /// `Active` and `Paused` sessions block a new download.
    pub fn is_open(self) -> bool {
        matches!(self, SessionState::Active | SessionState::Paused)
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Cancelled | SessionState::Completed | SessionState::Failed
        )
    }
}

/// Which configured origin a session is pulling from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Source {
    Primary,
    Mirror,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Source::Primary => f.write_str("primary"),
            Source::Mirror => f.write_str("mirror"),
        }
    }
}

/// One in-flight or paused transfer.
/// Serialized as-is when a paused session is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadSession {
    pub source_url: String,
    pub source: Source,
    pub destination: PathBuf,
    pub bytes_written: u64,
    /// Unknown until the server reports a length.
    pub bytes_expected: Option<u64>,
    pub state: SessionState,
    /// Captured at pause time; required to resume.
    pub resume: Option<ResumeData>,
}

impl DownloadSession {
    pub fn new(source_url: String, source: Source, destination: PathBuf) -> Self {
        Self {
            source_url,
            source,
            destination,
            bytes_written: 0,
            bytes_expected: None,
            state: SessionState::Active,
            resume: None,
        }
    }

    /// Download progress as a fraction from 0.0 to 1.0.
    pub fn progress(&self) -> f64 {
        fraction(self.bytes_written, self.bytes_expected)
    }
}

/// Snapshot of free-space sufficiency for the target artifact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageCheckResult {
    pub has_space: bool,
    pub available_bytes: u64,
    pub required_bytes: u64,
}

/// What the caller's progress callback receives on every tick.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ProgressUpdate {
    pub fraction: f64,
    pub bytes_written: u64,
    pub bytes_expected: Option<u64>,
    /// Smoothed rate in bytes per second.
    pub speed: f64,
}

impl ProgressUpdate {
    pub fn new(bytes_written: u64, bytes_expected: Option<u64>, speed: f64) -> Self {
        Self {
            fraction: fraction(bytes_written, bytes_expected),
            bytes_written,
            bytes_expected,
            speed,
        }
    }
}

fn fraction(written: u64, expected: Option<u64>) -> f64 {
    match expected {
        Some(total) if total > 0 => (written as f64 / total as f64).clamp(0.0, 1.0),
        _ => 0.0,
    }
}

/// The `{success, ...}` result every manager operation returns.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub paused: bool,
}

impl DownloadOutcome {
    /// Successful control operation with nothing else to report.
    pub fn success() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn completed(path: PathBuf) -> Self {
        Self {
            success: true,
            path: Some(path),
            ..Self::default()
        }
    }

    pub fn failed(error: impl fmt::Display) -> Self {
        Self {
            error: Some(error.to_string()),
            ..Self::default()
        }
    }

    pub fn cancelled() -> Self {
        Self {
            cancelled: true,
            ..Self::default()
        }
    }

    pub fn paused() -> Self {
        Self {
            paused: true,
            error: Some("Download paused".to_string()),
            ..Self::default()
        }
    }
}

//! Error types for rangefetch core

use reqwest::StatusCode;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that end a single transfer attempt.
///
/// Every variant leaves the partial file resumable and no completion record
/// behind, so running the transfer again is always safe.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Cannot open partial file {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot build request: {0}")]
    RequestBuild(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Transfer timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transfer was cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unexpected status {status} ({reason})")]
    UnexpectedStatus { status: u16, reason: String },

    #[error("Server resumed at byte {actual}, expected {expected}")]
    RangeMismatch { expected: u64, actual: u64 },

    #[error("Cannot commit {path}: {source}")]
    Commit {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    pub(crate) fn unexpected_status(status: StatusCode) -> Self {
        TransferError::UnexpectedStatus {
            status: status.as_u16(),
            reason: status.canonical_reason().unwrap_or("unknown").to_string(),
        }
    }

    /// Whether the failure happened on the wire (connect, read, deadline, cancel)
    pub fn is_network(&self) -> bool {
        matches!(
            self,
            TransferError::Network(_) | TransferError::Timeout(_) | TransferError::Cancelled
        )
    }

    /// Check if this error is worth retrying by the caller
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Network(_) | TransferError::Timeout(_) => true,
            TransferError::UnexpectedStatus { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Errors raised while loading settings or building the shared client
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings file: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("Cannot build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

//! Shared types for rangefetch
//!
//! This crate contains the plain data structures shared between the
//! transfer engine and the CLI: the persisted transfer record and the
//! user-facing settings.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

// ============================================================================
// Transfer Types
// ============================================================================

/// Metadata persisted next to a completed download (`<output>.json`).
///
/// Its presence is the completion marker: a transfer whose record exists is
/// never fetched again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub url: String,
    pub output: PathBuf,
    /// Response headers, lowercase name to values in arrival order
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    /// Bytes received by the invocation that completed the file
    pub bytes_transferred: u64,
    /// Size of the committed file
    pub total_size: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// How a batch member ended, as reported by the CLI summary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    /// Bytes were fetched and committed
    Fetched,
    /// A completion record already existed
    Skipped,
    Failed,
}

// ============================================================================
// Settings
// ============================================================================

/// Settings consumed by the core and the CLI
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Directory that derived output names are placed in
    pub output_dir: PathBuf,
    /// Maximum number of transfers in flight
    pub max_concurrent: u32,
    /// Per-transfer wall-clock limit in seconds (None = no limit)
    pub timeout_secs: Option<u64>,
    /// TCP connect timeout for the shared HTTP client
    pub connect_timeout_secs: u64,
    /// Headers sent with every request unless the transfer overrides them
    pub headers: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("."),
            max_concurrent: 4,
            timeout_secs: Some(120),
            connect_timeout_secs: 30,
            headers: default_headers(),
        }
    }
}

/// The stock header set: identify as wget, accept anything, no compression
pub fn default_headers() -> BTreeMap<String, String> {
    let mut headers = BTreeMap::new();
    headers.insert("user-agent".to_string(), "Wget/1.21.3".to_string());
    headers.insert("accept".to_string(), "*/*".to_string());
    headers.insert("accept-encoding".to_string(), "identity".to_string());
    headers
}

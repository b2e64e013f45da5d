//! Output formatting utilities

use crate::OutputFormat;
use console::style;
use rangefetch_core::{Transfer, TransferOutcome};
use rangefetch_types::TransferStatus;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Print output in the specified format
pub fn print_output<T: Serialize + fmt::Display>(
    value: &T,
    format: OutputFormat,
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(value)?);
        }
        OutputFormat::Human => {
            println!("{}", value);
        }
    }
    Ok(())
}

/// Format bytes as human-readable
pub fn format_bytes(bytes: u64) -> String {
    human_bytes::human_bytes(bytes as f64)
}

/// One finished batch member
#[derive(Debug, Clone, Serialize)]
pub struct Row {
    pub url: String,
    pub output: PathBuf,
    pub status: TransferStatus,
    pub bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Row {
    pub fn new(transfer: &Transfer, outcome: &TransferOutcome) -> Self {
        let (status, bytes, error) = match outcome {
            Ok(result) if result.is_recorded() => (TransferStatus::Skipped, 0, None),
            Ok(result) => (TransferStatus::Fetched, result.bytes_transferred, None),
            Err(e) => (TransferStatus::Failed, 0, Some(e.to_string())),
        };
        Self {
            url: transfer.url().to_string(),
            output: transfer.output().to_path_buf(),
            status,
            bytes,
            error,
        }
    }
}

/// Totals for a whole run
#[derive(Debug, Serialize)]
pub struct Summary {
    pub fetched: usize,
    pub skipped: usize,
    pub failed: usize,
    /// Members never dispatched because the run was cancelled
    pub not_started: usize,
    pub bytes: u64,
    pub transfers: Vec<Row>,
}

impl Summary {
    pub fn new(rows: Vec<Row>, members: usize) -> Self {
        let count = |status: TransferStatus| rows.iter().filter(|row| row.status == status).count();
        Self {
            fetched: count(TransferStatus::Fetched),
            skipped: count(TransferStatus::Skipped),
            failed: count(TransferStatus::Failed),
            not_started: members.saturating_sub(rows.len()),
            bytes: rows.iter().map(|row| row.bytes).sum(),
            transfers: rows,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.failed == 0 && self.not_started == 0
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in self.transfers.iter().filter(|row| row.status == TransferStatus::Failed) {
            writeln!(
                f,
                "{} {}: {}",
                style("✗").red().bold(),
                row.url,
                row.error.as_deref().unwrap_or("unknown error")
            )?;
        }
        write!(
            f,
            "{} fetched, {} skipped, {} failed",
            style(self.fetched).green(),
            style(self.skipped).dim(),
            style(self.failed).red()
        )?;
        if self.not_started > 0 {
            write!(f, ", {} not started", style(self.not_started).yellow())?;
        }
        write!(f, " ({} received)", format_bytes(self.bytes))
    }
}

//! Outcome of one transfer invocation

use crate::error::TransferError;
use crate::{headers, media};
use chrono::{DateTime, Utc};
use rangefetch_types::TransferRecord;
use reqwest::header::HeaderMap;
use std::path::PathBuf;
use std::time::Duration;

/// What `Transfer::run` hands back; the error arm is the failed attempt
pub type TransferOutcome = Result<TransferResult, TransferError>;

/// Where a result came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// This invocation talked to the server and committed the file
    Fetched,
    /// Rebuilt from the completion record, no network I/O
    Recorded,
}

/// A successful or skipped transfer
#[derive(Debug, Clone)]
pub struct TransferResult {
    pub url: String,
    pub output: PathBuf,
    /// Headers of the response that produced the final byte range
    pub response_headers: Option<HeaderMap>,
    /// Bytes received by this invocation only
    pub bytes_transferred: u64,
    /// Partial file size when the request was issued
    pub resumed_from: u64,
    /// Size of the committed file
    pub total_size: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub origin: Origin,
}

impl TransferResult {
    /// Result for a transfer that finished in an earlier invocation
    pub fn from_record(record: &TransferRecord) -> Self {
        Self {
            url: record.url.clone(),
            output: record.output.clone(),
            response_headers: Some(headers::from_record(&record.headers)),
            bytes_transferred: 0,
            resumed_from: record.total_size,
            total_size: record.total_size,
            started_at: record.started_at,
            finished_at: record.finished_at,
            origin: Origin::Recorded,
        }
    }

    /// The record persisted once this result is committed
    pub fn to_record(&self) -> TransferRecord {
        TransferRecord {
            url: self.url.clone(),
            output: self.output.clone(),
            headers: self
                .response_headers
                .as_ref()
                .map(headers::to_record)
                .unwrap_or_default(),
            bytes_transferred: self.bytes_transferred,
            total_size: self.total_size,
            started_at: self.started_at,
            finished_at: self.finished_at,
        }
    }

    pub fn is_recorded(&self) -> bool {
        self.origin == Origin::Recorded
    }

    /// Media type announced by `Content-Type`
    pub fn media_type(&self) -> Option<String> {
        self.response_headers.as_ref().and_then(media::media_type)
    }

    /// Recommended file extension for the announced media type
    pub fn extension(&self) -> Option<String> {
        self.media_type().and_then(|mime| media::extension_for(&mime))
    }

    /// `Last-Modified`, or now
    pub fn modified_time(&self) -> DateTime<Utc> {
        match &self.response_headers {
            Some(headers) => media::modified_time(headers),
            None => Utc::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        (self.finished_at - self.started_at)
            .to_std()
            .unwrap_or_default()
    }
}

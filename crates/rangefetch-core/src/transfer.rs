//! Resume-aware single download
//!
//! A [`Transfer`] moves one URL into one file:
//! - the body is streamed into `<output>.partial`, always a byte prefix of the resource
//! - a later run asks for `Range: bytes=<partial size>-` and appends
//! - success renames the partial file into place, then writes `<output>.json`
//! - once that record exists every further run returns it without network I/O

use crate::config;
use crate::error::TransferError;
use crate::headers::{self, ContentRange};
use crate::media;
use crate::naming;
use crate::result::{Origin, TransferOutcome, TransferResult};
use chrono::{DateTime, Utc};
use futures::StreamExt;
use rangefetch_types::TransferRecord;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, LAST_MODIFIED};
use reqwest::{Client, Response, StatusCode, Url};
use std::future::Future;
use std::io::{ErrorKind, SeekFrom};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const PARTIAL_SUFFIX: &str = ".partial";
const RECORD_SUFFIX: &str = ".json";

/// Timeout applied by [`Transfer::for_url`]
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// One planned download
#[derive(Debug, Clone)]
pub struct Transfer {
    url: String,
    output: PathBuf,
    headers: HeaderMap,
    timeout: Option<Duration>,
}

/// What a finished HTTP exchange left in the partial file
struct Exchange {
    headers: HeaderMap,
    resumed_from: u64,
    bytes: u64,
}

impl Transfer {
    /// A transfer with no extra headers and no timeout
    pub fn new(url: impl Into<String>, output: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            output: output.into(),
            headers: HeaderMap::new(),
            timeout: None,
        }
    }

    /// A transfer into `dir` named after the URL digest, with the stock
    /// headers and the default timeout
    pub fn for_url(dir: impl AsRef<Path>, url: impl Into<String>) -> Self {
        let url = url.into();
        let output = naming::output_path(dir, &url);
        let headers =
            config::header_map(&rangefetch_types::default_headers()).unwrap_or_default();
        Self::new(url, output)
            .with_headers(headers)
            .with_timeout(Some(DEFAULT_TIMEOUT))
    }

    /// Replace the request headers
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set a single request header, replacing earlier values
    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Wall-clock limit for the HTTP exchange; `None` or zero disables it
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn output(&self) -> &Path {
        &self.output
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// In-progress content, resumable across runs
    pub fn partial_path(&self) -> PathBuf {
        self.sibling(PARTIAL_SUFFIX)
    }

    /// Completion record; its presence means "do not fetch again"
    pub fn record_path(&self) -> PathBuf {
        self.sibling(RECORD_SUFFIX)
    }

    fn sibling(&self, suffix: &str) -> PathBuf {
        let mut path = self.output.clone().into_os_string();
        path.push(suffix);
        PathBuf::from(path)
    }

    /// Run with a token that is never cancelled
    pub async fn fetch(&self, client: &Client) -> TransferOutcome {
        self.run(client, &CancellationToken::new()).await
    }

    /// Download the resource, resuming whatever the partial file holds.
    ///
    /// Cancelling `cancel` aborts the exchange with [`TransferError::Cancelled`].
    /// Any error leaves the partial file in place and no record behind.
    pub async fn run(&self, client: &Client, cancel: &CancellationToken) -> TransferOutcome {
        if let Some(record) = self.read_record().await {
            info!("Skipping {}: already complete at {}", self.url, self.output.display());
            return Ok(TransferResult::from_record(&record));
        }

        let url = Url::parse(&self.url)
            .map_err(|e| TransferError::RequestBuild(format!("{}: {}", self.url, e)))?;
        let (mut file, offset) = self.open_partial().await?;

        let scope = Scope::new(cancel.child_token(), self.timeout);
        let started_at = Utc::now();
        info!("Fetching {} -> {} (offset {})", self.url, self.output.display(), offset);

        match self.exchange(client, url, &scope, &mut file, offset).await {
            Ok(exchange) => self.commit(file, exchange, started_at).await,
            Err(e) => {
                warn!("Transfer {} failed: {}", self.url, e);
                Err(e)
            }
        }
    }

    /// Issue the range request and stream the body into the partial file
    async fn exchange(
        &self,
        client: &Client,
        url: Url,
        scope: &Scope,
        file: &mut File,
        mut offset: u64,
    ) -> Result<Exchange, TransferError> {
        loop {
            let headers = headers::request_headers(&self.headers, offset)?;
            let response = scope
                .guard(client.get(url.clone()).headers(headers).send())
                .await??;

            let status = response.status();
            debug!("{} answered {} for offset {}", self.url, status, offset);

            match status {
                StatusCode::PARTIAL_CONTENT => {
                    let start = ContentRange::from_headers(response.headers())
                        .and_then(|range| range.start());
                    if let Some(start) = start.filter(|start| *start != offset) {
                        return Err(TransferError::RangeMismatch {
                            expected: offset,
                            actual: start,
                        });
                    }
                    file.seek(SeekFrom::End(0)).await?;
                }
                StatusCode::OK => {
                    if offset > 0 {
                        debug!("{} ignored the range, restarting from zero", self.url);
                    }
                    truncate(file).await?;
                    offset = 0;
                }
                StatusCode::RANGE_NOT_SATISFIABLE => {
                    let total = ContentRange::from_headers(response.headers())
                        .and_then(|range| range.total);
                    if offset == 0 || total == Some(offset) {
                        // Nothing past the end of what is on disk
                        return Ok(Exchange {
                            headers: response.headers().clone(),
                            resumed_from: offset,
                            bytes: 0,
                        });
                    }
                    warn!(
                        "Partial file for {} holds {} bytes but the server reports {:?}, restarting",
                        self.url, offset, total
                    );
                    truncate(file).await?;
                    offset = 0;
                    continue;
                }
                _ => return Err(TransferError::unexpected_status(status)),
            }

            let headers = response.headers().clone();
            let bytes = stream_body(response, file, scope).await?;
            return Ok(Exchange {
                headers,
                resumed_from: offset,
                bytes,
            });
        }
    }

    /// Move the finished partial file into place and write the record
    async fn commit(
        &self,
        mut file: File,
        exchange: Exchange,
        started_at: DateTime<Utc>,
    ) -> TransferOutcome {
        file.flush().await?;
        file.sync_all().await?;
        let total_size = file.metadata().await?.len();
        drop(file);

        fs::rename(self.partial_path(), &self.output)
            .await
            .map_err(|source| TransferError::Commit {
                path: self.output.clone(),
                source,
            })?;

        let result = TransferResult {
            url: self.url.clone(),
            output: self.output.clone(),
            response_headers: Some(exchange.headers),
            bytes_transferred: exchange.bytes,
            resumed_from: exchange.resumed_from,
            total_size,
            started_at,
            finished_at: Utc::now(),
            origin: Origin::Fetched,
        };
        self.write_record(&result.to_record()).await?;

        if let Some(headers) = &result.response_headers {
            self.stamp_modified(headers).await;
        }

        info!(
            "Completed {} ({} bytes received, {} on disk)",
            self.output.display(),
            result.bytes_transferred,
            result.total_size
        );
        Ok(result)
    }

    async fn open_partial(&self) -> Result<(File, u64), TransferError> {
        let path = self.partial_path();
        let open_error = |source: std::io::Error| TransferError::Open {
            path: path.clone(),
            source,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(open_error)?;
        }

        // An output without a record means the last commit stopped after the
        // rename; its bytes become the partial again
        if !fs::try_exists(&path).await.map_err(open_error)?
            && fs::try_exists(&self.output).await.map_err(open_error)?
        {
            warn!(
                "{} has no completion record, resuming from its contents",
                self.output.display()
            );
            fs::rename(&self.output, &path).await.map_err(open_error)?;
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .await
            .map_err(open_error)?;
        let size = file.metadata().await.map_err(open_error)?.len();
        Ok((file, size))
    }

    async fn read_record(&self) -> Option<TransferRecord> {
        let path = self.record_path();
        let content = match fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Cannot read completion record {}: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_slice(&content) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!("Ignoring unreadable completion record {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Write the record through a temp file so it appears whole or not at all
    async fn write_record(&self, record: &TransferRecord) -> Result<(), TransferError> {
        let path = self.record_path();
        let commit_error = |source: std::io::Error| TransferError::Commit {
            path: path.clone(),
            source,
        };

        let content = serde_json::to_vec_pretty(record)
            .map_err(|e| commit_error(std::io::Error::new(ErrorKind::InvalidData, e)))?;
        let staging = self.sibling(".json.tmp");
        fs::write(&staging, content).await.map_err(commit_error)?;
        fs::rename(&staging, &path).await.map_err(commit_error)?;
        Ok(())
    }

    /// Best effort: failures are logged and dropped
    async fn stamp_modified(&self, headers: &HeaderMap) {
        let Some(modified) = headers
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(media::parse_http_date)
        else {
            return;
        };

        let path = self.output.clone();
        let stamped = tokio::task::spawn_blocking(move || {
            std::fs::File::options()
                .write(true)
                .open(&path)?
                .set_modified(SystemTime::from(modified))
        })
        .await;

        match stamped {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!("Cannot set mtime on {}: {}", self.output.display(), e),
            Err(e) => debug!("mtime task for {} failed: {}", self.output.display(), e),
        }
    }
}

async fn truncate(file: &mut File) -> Result<(), TransferError> {
    file.set_len(0).await?;
    file.seek(SeekFrom::Start(0)).await?;
    Ok(())
}

/// Copy the body into `file`, returning the byte count.
///
/// The file is flushed before returning on every path so the on-disk prefix
/// matches what was received.
async fn stream_body(
    response: Response,
    file: &mut File,
    scope: &Scope,
) -> Result<u64, TransferError> {
    let mut stream = response.bytes_stream();
    let mut written = 0u64;

    let copied: Result<(), TransferError> = async {
        while let Some(chunk) = scope.guard(stream.next()).await? {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        Ok(())
    }
    .await;

    let flushed = file.flush().await;
    copied?;
    flushed?;
    Ok(written)
}

/// Cancellation and deadline bounding one transfer's network waits
struct Scope {
    token: CancellationToken,
    deadline: Option<Instant>,
    timeout: Duration,
}

impl Scope {
    fn new(token: CancellationToken, timeout: Option<Duration>) -> Self {
        Self {
            token,
            deadline: timeout.map(|t| Instant::now() + t),
            timeout: timeout.unwrap_or_default(),
        }
    }

    /// Race `fut` against cancellation and the deadline
    async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, TransferError> {
        let expiry = async {
            match self.deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(TransferError::Cancelled),
            _ = expiry => Err(TransferError::Timeout(self.timeout)),
            output = fut => Ok(output),
        }
    }
}

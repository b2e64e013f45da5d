//! rangefetch core - resumable transfer engine
//!
//! This crate fetches HTTP resources into files, resuming partial downloads
//! and skipping completed ones, and runs batches of them under a fixed
//! concurrency limit.

pub mod batch;
pub mod config;
mod error;
pub mod headers;
pub mod media;
pub mod naming;
mod result;
pub mod transfer;

pub use batch::Batch;
pub use error::*;
pub use result::*;
pub use transfer::{Transfer, DEFAULT_TIMEOUT};

use rangefetch_types::Settings;
use reqwest::header::HeaderMap;
use reqwest::Client;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Settings plus the HTTP client they describe
#[derive(Debug, Clone)]
pub struct RangeFetch {
    settings: Settings,
    headers: HeaderMap,
    client: Client,
}

impl RangeFetch {
    /// Validate the settings and build the shared client
    pub fn new(settings: Settings) -> Result<Self, ConfigError> {
        let headers = config::header_map(&settings.headers)?;
        let client = config::build_client(&settings)?;
        Ok(Self {
            settings,
            headers,
            client,
        })
    }

    /// Load settings from `path` (defaults when it does not exist)
    pub async fn from_config_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let settings = config::load_settings(path).await?;
        Self::new(settings)
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    /// A transfer for `url` named after its digest inside the output directory,
    /// carrying the configured headers and timeout
    pub fn transfer(&self, url: impl Into<String>) -> Transfer {
        let url = url.into();
        let output = naming::output_path(&self.settings.output_dir, &url);
        Transfer::new(url, output)
            .with_headers(self.headers.clone())
            .with_timeout(self.settings.timeout_secs.map(Duration::from_secs))
    }

    /// An empty batch sharing this client
    pub fn batch(&self) -> Batch {
        Batch::new(self.client.clone())
    }

    /// Run `batch` with the configured concurrency limit
    pub async fn run(&self, batch: &Batch, cancel: &CancellationToken) {
        batch
            .run(cancel, self.settings.max_concurrent as usize)
            .await
    }
}

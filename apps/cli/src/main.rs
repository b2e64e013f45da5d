//! rangefetch CLI - resumable batch downloader
//!
//! Fetches every given URL into the output directory, resuming partial files
//! and skipping the ones a previous run already completed.

mod output;
mod progress;

use anyhow::{bail, Context, Result};
use clap::Parser;
use output::Summary;
use progress::BatchProgress;
use rangefetch_core::{config, headers, RangeFetch};
use rangefetch_types::Settings;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// rangefetch - resumable batch downloader
#[derive(Parser)]
#[command(name = "rangefetch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// URLs to fetch
    urls: Vec<String>,

    /// Read more URLs from a file, one per line (`#` starts a comment)
    #[arg(short, long)]
    input: Option<PathBuf>,

    /// Directory downloads are written to
    #[arg(short = 'o', long)]
    output_dir: Option<PathBuf>,

    /// Maximum number of transfers in flight
    #[arg(short, long)]
    jobs: Option<u32>,

    /// Per-transfer timeout in seconds (0 disables it)
    #[arg(short, long)]
    timeout: Option<u64>,

    /// Extra request header, `Name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Settings file
    #[arg(long, env = "RANGEFETCH_CONFIG")]
    config: Option<PathBuf>,

    /// Write the effective settings to the settings file and exit
    #[arg(long)]
    save_config: bool,

    /// Output format
    #[arg(long, default_value = "human")]
    output: OutputFormat,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Human,
    Json,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let mut settings = config::load_settings(&config_path)
        .await
        .with_context(|| format!("loading settings from {}", config_path.display()))?;
    apply_overrides(&mut settings, &cli)?;

    if cli.save_config {
        config::save_settings(&config_path, &settings).await?;
        println!("Saved settings to {}", config_path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let mut urls = cli.urls.clone();
    if let Some(input) = &cli.input {
        urls.extend(read_url_list(input).await?);
    }
    if urls.is_empty() {
        bail!("no URLs given (pass them as arguments or with --input)");
    }

    tokio::fs::create_dir_all(&settings.output_dir)
        .await
        .with_context(|| format!("creating {}", settings.output_dir.display()))?;

    let fetch = RangeFetch::new(settings)?;
    let mut batch = fetch.batch();
    let queued = batch.add(urls.iter().map(|url| fetch.transfer(url.as_str())));
    if queued < urls.len() {
        info!("{} duplicate URLs ignored", urls.len() - queued);
    }

    let progress = BatchProgress::new(cli.output == OutputFormat::Human);
    let rows = progress.attach(&mut batch);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling transfers");
            interrupt.cancel();
        }
    });

    fetch.run(&batch, &cancel).await;
    progress.clear();

    let summary = Summary::new(std::mem::take(&mut *rows.lock()), batch.len());
    output::print_output(&summary, cli.output)?;

    Ok(if summary.succeeded() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .map(|d| d.join("rangefetch"))
        .unwrap_or_else(|| PathBuf::from(".rangefetch"))
        .join("settings.json")
}

/// Command-line flags win over the settings file
fn apply_overrides(settings: &mut Settings, cli: &Cli) -> Result<()> {
    if let Some(dir) = &cli.output_dir {
        settings.output_dir = dir.clone();
    }
    if let Some(jobs) = cli.jobs {
        settings.max_concurrent = jobs;
    }
    if let Some(timeout) = cli.timeout {
        settings.timeout_secs = (timeout > 0).then_some(timeout);
    }
    for line in &cli.headers {
        let (name, value) = headers::parse_header_line(line)?;
        let value = value
            .to_str()
            .with_context(|| format!("header `{}` is not printable ASCII", name))?
            .to_string();
        debug!("Header override {}: {}", name, value);
        settings.headers.insert(name.as_str().to_string(), value);
    }
    Ok(())
}

async fn read_url_list(path: &Path) -> Result<Vec<String>> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading URL list {}", path.display()))?;
    Ok(parse_url_list(&content))
}

fn parse_url_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

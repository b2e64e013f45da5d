//! Spinners for in-flight transfers, driven by the batch hooks

use crate::output::Row;
use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use parking_lot::Mutex;
use rangefetch_core::Batch;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Manages one spinner per running transfer
pub struct BatchProgress {
    multi: MultiProgress,
    bars: Arc<Mutex<HashMap<PathBuf, ProgressBar>>>,
}

impl BatchProgress {
    /// Draws to stderr when `visible`, otherwise renders nothing
    pub fn new(visible: bool) -> Self {
        let target = if visible {
            ProgressDrawTarget::stderr()
        } else {
            ProgressDrawTarget::hidden()
        };
        Self {
            multi: MultiProgress::with_draw_target(target),
            bars: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Install start/stop hooks on `batch`. The returned list fills with one
    /// row per finished member.
    pub fn attach(&self, batch: &mut Batch) -> Arc<Mutex<Vec<Row>>> {
        let rows = Arc::new(Mutex::new(Vec::with_capacity(batch.len())));

        let multi = self.multi.clone();
        let bars = Arc::clone(&self.bars);
        batch.on_start(move |transfer| {
            let pb = multi.add(ProgressBar::new_spinner());
            pb.set_style(spinner_style());
            pb.set_message(short_name(transfer.url()));
            pb.enable_steady_tick(Duration::from_millis(100));
            bars.lock().insert(transfer.output().to_path_buf(), pb);
        });

        let bars = Arc::clone(&self.bars);
        let sink = Arc::clone(&rows);
        batch.on_stop(move |transfer, outcome| {
            let row = Row::new(transfer, outcome);
            if let Some(pb) = bars.lock().remove(transfer.output()) {
                let name = short_name(transfer.url());
                match &row.error {
                    None => pb.finish_with_message(format!(
                        "{} {} ({})",
                        style("✓").green().bold(),
                        name,
                        crate::output::format_bytes(row.bytes)
                    )),
                    Some(error) => pb.abandon_with_message(format!(
                        "{} {}: {}",
                        style("✗").red().bold(),
                        name,
                        error
                    )),
                }
            }
            sink.lock().push(row);
        });

        rows
    }

    /// Clear any spinner still running
    pub fn clear(&self) {
        for (_, pb) in self.bars.lock().drain() {
            pb.finish_and_clear();
        }
    }
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// Last path segment of a URL, or the URL itself
fn short_name(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|name| !name.is_empty())
        .unwrap_or(url)
        .to_string()
}

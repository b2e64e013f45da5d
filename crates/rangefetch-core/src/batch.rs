//! Bounded-concurrency batch runner
//!
//! A [`Batch`] holds transfers keyed by output path and runs them with at most
//! `limit` in flight. Start/stop hooks share one lock, so hook bodies never
//! overlap even though the transfers themselves run in parallel.

use crate::result::TransferOutcome;
use crate::transfer::Transfer;
use parking_lot::Mutex;
use reqwest::Client;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type StartHook = Box<dyn FnMut(&Transfer) + Send>;
type StopHook = Box<dyn FnMut(&Transfer, &TransferOutcome) + Send>;

struct Hooks {
    start: StartHook,
    stop: StopHook,
}

impl Hooks {
    fn started(&mut self, transfer: &Transfer) {
        (self.start)(transfer)
    }

    fn stopped(&mut self, transfer: &Transfer, outcome: &TransferOutcome) {
        (self.stop)(transfer, outcome)
    }
}

impl Default for Hooks {
    fn default() -> Self {
        Self {
            start: Box::new(|_| {}),
            stop: Box::new(|_, _| {}),
        }
    }
}

/// Deduplicated, insertion-ordered set of transfers
pub struct Batch {
    client: Client,
    members: Vec<Arc<Transfer>>,
    keys: HashSet<PathBuf>,
    hooks: Arc<Mutex<Hooks>>,
}

impl Batch {
    /// Empty batch whose transfers share `client`
    pub fn new(client: Client) -> Self {
        Self {
            client,
            members: Vec::new(),
            keys: HashSet::new(),
            hooks: Arc::new(Mutex::new(Hooks::default())),
        }
    }

    /// Append a transfer unless one with the same output path is present.
    /// Returns whether it was added.
    pub fn push(&mut self, transfer: Transfer) -> bool {
        if !self.keys.insert(transfer.output().to_path_buf()) {
            debug!("Dropping duplicate transfer for {}", transfer.output().display());
            return false;
        }
        self.members.push(Arc::new(transfer));
        true
    }

    /// Append several transfers, keeping first-seen order. Returns how many were new.
    pub fn add(&mut self, transfers: impl IntoIterator<Item = Transfer>) -> usize {
        let mut added = 0;
        for transfer in transfers {
            if self.push(transfer) {
                added += 1;
            }
        }
        added
    }

    /// Forget every member
    pub fn reset(&mut self) {
        self.members.clear();
        self.keys.clear();
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Transfer> {
        self.members.iter().map(Arc::as_ref)
    }

    /// Called right before each transfer runs
    pub fn on_start(&mut self, hook: impl FnMut(&Transfer) + Send + 'static) {
        self.hooks.lock().start = Box::new(hook);
    }

    /// Called right after each transfer finishes, with its outcome
    pub fn on_stop(&mut self, hook: impl FnMut(&Transfer, &TransferOutcome) + Send + 'static) {
        self.hooks.lock().stop = Box::new(hook);
    }

    /// Run every member with a token that is never cancelled
    pub async fn run_all(&self, limit: usize) {
        self.run(&CancellationToken::new(), limit).await
    }

    /// Run every member, at most `limit` at a time, and wait for all of them.
    ///
    /// Members are dispatched in insertion order. Cancelling `cancel` stops
    /// dispatch and aborts in-flight exchanges; their failures still reach
    /// the stop hook. A failed member never affects its siblings.
    pub async fn run(&self, cancel: &CancellationToken, limit: usize) {
        if limit < 1 {
            warn!("Concurrency limit {} is invalid, using 1", limit);
        }
        let limit = limit.clamp(1, Semaphore::MAX_PERMITS);
        info!("Running {} transfers, {} at a time", self.members.len(), limit);

        let gate = Arc::new(Semaphore::new(limit));
        let mut tasks = JoinSet::new();

        for transfer in &self.members {
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("Batch cancelled, not dispatching remaining transfers");
                    break;
                }
                permit = Arc::clone(&gate).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let transfer = Arc::clone(transfer);
            let client = self.client.clone();
            let hooks = Arc::clone(&self.hooks);
            let cancel = cancel.clone();
            tasks.spawn(async move {
                // Released when this task ends, however it ends
                let _permit = permit;
                hooks.lock().started(&transfer);
                let outcome = transfer.run(&client, &cancel).await;
                hooks.lock().stopped(&transfer, &outcome);
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!("Transfer task panicked: {}", e);
            }
        }
    }
}

//! Periodic background sync.
//!
//! Runs the engine every `interval` (and whenever `trigger` is called) on
//! the tokio runtime.  A locked vault is skipped, not an error.  Ordering
//! against foreground edits comes from the store lock, not from timing.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

use super::cancel::CancelToken;
use super::engine::{SyncEngine, SyncOutcome};
use crate::errors::CipherSafeError;
use crate::vault::session::Vault;

/// Counters published after every scheduler tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub runs: u64,
    pub skipped_locked: u64,
    pub failures: u64,
    pub last_outcome: Option<SyncOutcome>,
    pub last_error: Option<String>,
}

pub struct BackgroundSync {
    trigger: Arc<Notify>,
    cancel: CancelToken,
    status: watch::Receiver<SchedulerStatus>,
    handle: JoinHandle<()>,
}

impl BackgroundSync {
    pub fn spawn(vault: Arc<Vault>, engine: Arc<SyncEngine>, interval: Duration) -> Self {
        let trigger = Arc::new(Notify::new());
        let cancel = CancelToken::new();
        let (tx, rx) = watch::channel(SchedulerStatus::default());

        let handle = tokio::spawn(run(
            vault,
            engine,
            interval,
            Arc::clone(&trigger),
            cancel.clone(),
            tx,
        ));
        Self {
            trigger,
            cancel,
            status: rx,
            handle,
        }
    }

    /// Sync now instead of waiting for the interval.
    pub fn trigger(&self) {
        self.trigger.notify_one();
    }

    pub fn status(&self) -> SchedulerStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status update.
    pub fn subscribe(&self) -> watch::Receiver<SchedulerStatus> {
        self.status.clone()
    }

    /// Stop the loop, cancelling a sync that has not reached its final phase.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.handle.await {
            tracing::warn!("background sync task ended abnormally: {e}");
        }
    }
}

async fn run(
    vault: Arc<Vault>,
    engine: Arc<SyncEngine>,
    interval: Duration,
    trigger: Arc<Notify>,
    cancel: CancelToken,
    status: watch::Sender<SchedulerStatus>,
) {
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            () = tokio::time::sleep(interval) => {}
            () = trigger.notified() => {}
        }

        vault.lock_if_idle().await;
        if !vault.machine().is_unlocked() {
            tracing::debug!("vault locked, skipping background sync");
            status.send_modify(|s| s.skipped_locked += 1);
            continue;
        }

        match engine.sync(&vault, &cancel).await {
            Ok(report) => status.send_modify(|s| {
                s.runs += 1;
                s.last_outcome = Some(report.outcome);
                s.last_error = None;
            }),
            Err(CipherSafeError::SyncCancelled) => break,
            Err(CipherSafeError::VaultLocked) => {
                status.send_modify(|s| s.skipped_locked += 1);
            }
            Err(e) => {
                tracing::warn!("background sync failed: {e}");
                status.send_modify(|s| {
                    s.runs += 1;
                    s.failures += 1;
                    s.last_error = Some(e.to_string());
                });
            }
        }
    }
    tracing::debug!("background sync stopped");
}

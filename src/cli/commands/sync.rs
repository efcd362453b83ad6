//! `ciphersafe sync`: reconcile the local vault with the remote directory.
//!
//! `--watch` keeps the vault unlocked and hands it to the background
//! scheduler, which syncs every `sync_interval_secs`.

use std::sync::Arc;
use std::time::Duration;

use crate::cli::output;
use crate::cli::{log_audit, Cli, Context};
use crate::errors::Result;
use crate::sync::cancel::CancelToken;
use crate::sync::engine::{SyncEngine, SyncOutcome, SyncReport};
use crate::sync::scheduler::{BackgroundSync, SchedulerStatus};
use crate::vault::session::Vault;

/// How often watch mode checks the idle timeout.
const IDLE_POLL: Duration = Duration::from_millis(500);

/// Execute the `sync` command.
pub async fn execute(cli: &Cli, watch: bool) -> Result<()> {
    let ctx = Context::load(cli)?;
    let engine = ctx.sync_engine()?;
    let vault = ctx.unlock().await?;

    if watch {
        return watch_loop(&ctx, engine, vault).await;
    }

    // Ctrl-C cancels the round unless it already reached its final phase.
    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let result = engine.sync(&vault, &cancel).await;
    watcher.abort();
    vault.lock().await;

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            log_audit(&ctx, "sync-failed", None, Some(&e.to_string()));
            return Err(e);
        }
    };

    let summary = summarize(&report);
    log_audit(&ctx, "sync", None, Some(&summary));
    output::success(&format!("Sync complete: {summary} (version {})", report.version));

    if !report.merge.conflicts.is_empty() {
        output::warning(&format!(
            "{} conflicting edit(s) were kept as copies titled '... (conflict)'",
            report.merge.conflicts.len()
        ));
        output::tip("Run `ciphersafe list --conflicts` to review them.");
    }
    if report.attempts > 1 {
        output::info(&format!("Needed {} attempts", report.attempts));
    }
    Ok(())
}

/// Sync now and then every interval until Ctrl-C or an idle lock.
async fn watch_loop(ctx: &Context, engine: SyncEngine, vault: Vault) -> Result<()> {
    let interval = ctx.settings.sync_interval();
    let vault = Arc::new(vault);
    let scheduler = BackgroundSync::spawn(Arc::clone(&vault), Arc::new(engine), interval);
    let mut updates = scheduler.subscribe();
    scheduler.trigger();
    output::info(&format!(
        "Watching for changes, syncing every {}s. Press Ctrl-C to stop.",
        interval.as_secs()
    ));

    let mut idle = tokio::time::interval(IDLE_POLL);
    let mut seen = SchedulerStatus::default();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let status = updates.borrow_and_update().clone();
                let stop = report_tick(ctx, &seen, &status);
                seen = status;
                if stop {
                    break;
                }
            }
            _ = idle.tick() => {
                if vault.lock_if_idle().await {
                    output::info("Vault locked after the idle timeout; stopping.");
                    break;
                }
            }
        }
    }

    scheduler.shutdown().await;
    vault.lock().await;
    tracing::debug!(runs = seen.runs, failures = seen.failures, "sync watch stopped");
    Ok(())
}

/// Print what changed since `seen`.  Returns true when watching should stop.
fn report_tick(ctx: &Context, seen: &SchedulerStatus, status: &SchedulerStatus) -> bool {
    if status.skipped_locked > seen.skipped_locked {
        output::info("Vault locked; stopping.");
        return true;
    }
    if status.failures > seen.failures {
        let error = status.last_error.as_deref().unwrap_or("unknown error");
        log_audit(ctx, "sync-failed", None, Some(error));
        output::warning(&format!("Sync failed: {error}"));
    } else if status.runs > seen.runs {
        if let Some(outcome) = status.last_outcome {
            let label = outcome_label(outcome);
            if outcome != SyncOutcome::AlreadyInSync {
                log_audit(ctx, "sync", None, Some(label));
            }
            output::success(&format!("Sync complete: {label}"));
        }
    }
    false
}

fn summarize(report: &SyncReport) -> String {
    match report.outcome {
        SyncOutcome::Pulled => format!("pulled {} record(s)", report.merge.pulled),
        SyncOutcome::Pushed => format!(
            "merged: {} pulled, {} pushed",
            report.merge.pulled, report.merge.pushed
        ),
        other => outcome_label(other).to_string(),
    }
}

fn outcome_label(outcome: SyncOutcome) -> &'static str {
    match outcome {
        SyncOutcome::InitialUpload => "uploaded to an empty remote",
        SyncOutcome::AlreadyInSync => "already in sync",
        SyncOutcome::Pulled => "pulled remote changes",
        SyncOutcome::Pushed => "merged and uploaded",
    }
}

//! The sync engine: reconcile the local container with one remote copy.
//!
//! One round:
//! 1. Snapshot the local store and fetch the remote container.
//! 2. No remote: upload the local container (initial snapshot).
//! 3. Otherwise decrypt it with the same master key and merge per record.
//! 4. Final phase, under the store lock: upload the merged container with
//!    the storage version fetched in step 1 as the expected version, then
//!    atomically replace the local container.
//!
//! A storage version clash or a local edit during the round restarts from
//! step 1, up to `max_attempts`.  Any other failure leaves the local
//! container untouched.  Cancellation is honoured until step 4 starts;
//! step 4 runs in its own task, so dropping the caller's future cannot
//! interrupt it halfway.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::cancel::CancelToken;
use super::merge::{forget_purged, merge_purged, merge_records, MergeReport};
use super::remote::{ObjectStore, DEFAULT_REMOTE_KEY};
use crate::errors::{CipherSafeError, Result};
use crate::vault::format::{ContainerHeader, VaultContainer};
use crate::vault::record::CredentialRecord;
use crate::vault::session::Vault;
use crate::vault::store::StoreSnapshot;

/// Sync tuning.
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Object key of the container in the remote store.
    pub remote_key: String,
    /// Timeout applied to every remote call.
    pub call_timeout: Duration,
    /// Full reconciliation attempts before a clash is surfaced.
    pub max_attempts: u32,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            remote_key: DEFAULT_REMOTE_KEY.to_string(),
            call_timeout: Duration::from_secs(30),
            max_attempts: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The remote was empty; the local container was uploaded.
    InitialUpload,
    /// Both sides already held the same records.  Nothing was written.
    AlreadyInSync,
    /// Only the remote had news; the local container was replaced.
    Pulled,
    /// The merged container was uploaded and stored locally.
    Pushed,
}

#[derive(Debug, Clone)]
pub struct SyncReport {
    pub outcome: SyncOutcome,
    /// Local container version after the round.
    pub version: u64,
    /// Rounds run, including retries.
    pub attempts: u32,
    pub merge: MergeReport,
}

pub struct SyncEngine {
    remote: Arc<dyn ObjectStore>,
    options: SyncOptions,
}

/// What the final phase has to do.
struct Plan {
    outcome: SyncOutcome,
    local: VaultContainer,
    /// Container bytes and expected storage version, if uploading.
    upload: Option<(Vec<u8>, Option<u64>)>,
    records: Vec<CredentialRecord>,
    merge: MergeReport,
}

impl SyncEngine {
    pub fn new(remote: Arc<dyn ObjectStore>, options: SyncOptions) -> Self {
        Self { remote, options }
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn remote(&self) -> &Arc<dyn ObjectStore> {
        &self.remote
    }

    /// Run one sync, retrying internal clashes.  Requires `Unlocked`.
    pub async fn sync(&self, vault: &Vault, cancel: &CancelToken) -> Result<SyncReport> {
        let max_attempts = self.options.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            checkpoint(cancel)?;
            match self.sync_once(vault, cancel).await {
                Ok(mut report) => {
                    report.attempts = attempt;
                    tracing::info!(
                        outcome = ?report.outcome,
                        version = report.version,
                        attempts = attempt,
                        conflicts = report.merge.conflicts.len(),
                        "sync finished"
                    );
                    return Ok(report);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    tracing::warn!(attempt, "sync clash, retrying: {e}");
                }
                Err(e) => {
                    tracing::warn!(attempt, "sync failed: {e}");
                    return Err(e);
                }
            }
        }
    }

    async fn sync_once(&self, vault: &Vault, cancel: &CancelToken) -> Result<SyncReport> {
        let store = vault.store();
        let snapshot = store.snapshot().await?;

        let fetched = tokio::select! {
            result = bounded(self.options.call_timeout, self.remote.get(&self.options.remote_key)) => result?,
            () = cancel.cancelled() => return Err(CipherSafeError::SyncCancelled),
        };
        checkpoint(cancel)?;

        let plan = match fetched {
            None => self.plan_initial(vault, &snapshot)?,
            Some(object) => {
                let remote = VaultContainer::from_bytes(&object.bytes)?;
                self.plan_merge(vault, &snapshot, &remote, object.version)?
            }
        };

        if plan.outcome == SyncOutcome::AlreadyInSync {
            return Ok(SyncReport {
                outcome: plan.outcome,
                version: snapshot.header.version,
                attempts: 0,
                merge: plan.merge,
            });
        }

        let commit = store.begin_sync_commit(snapshot.generation).await?;
        // Last point at which cancellation is honoured.
        checkpoint(cancel)?;

        let Plan {
            outcome,
            local,
            upload,
            records,
            merge,
        } = plan;
        let remote = Arc::clone(&self.remote);
        let key = self.options.remote_key.clone();
        let timeout = self.options.call_timeout;

        let final_phase = tokio::spawn(async move {
            if let Some((bytes, expected)) = upload {
                let stored = bounded(timeout, remote.put(&key, bytes, expected)).await?;
                tracing::debug!(storage_version = stored, "uploaded container");
            }
            commit.apply(&local, records).await
        });
        let version = final_phase.await.map_err(|e| {
            CipherSafeError::Io(std::io::Error::other(format!("sync task failed: {e}")))
        })??;

        Ok(SyncReport {
            outcome,
            version,
            attempts: 0,
            merge,
        })
    }

    fn plan_initial(&self, vault: &Vault, snapshot: &StoreSnapshot) -> Result<Plan> {
        let mut header = snapshot.header.clone();
        header.version += 1;
        header.sync.clock.bump(vault.store().replica_id());
        header.sync.sync_round += 1;

        let records = snapshot.records.clone();
        let (local, upload) = seal_pair(vault, header, &records)?;
        Ok(Plan {
            outcome: SyncOutcome::InitialUpload,
            local,
            upload: Some((upload, None)),
            records,
            merge: MergeReport {
                pushed: snapshot.records.len(),
                ..MergeReport::default()
            },
        })
    }

    fn plan_merge(
        &self,
        vault: &Vault,
        snapshot: &StoreSnapshot,
        remote: &VaultContainer,
        storage_version: u64,
    ) -> Result<Plan> {
        if remote.vault_id() != snapshot.header.vault_id {
            return Err(CipherSafeError::RemoteMismatch(format!(
                "remote holds vault {}, local is {}",
                remote.vault_id(),
                snapshot.header.vault_id
            )));
        }
        let remote_records = match vault.machine().with_key(|key| remote.open(key))? {
            Ok(records) => records,
            Err(CipherSafeError::AuthenticationFailure) => {
                return Err(CipherSafeError::RemoteMismatch(
                    "remote container cannot be decrypted with this vault's key".into(),
                ))
            }
            Err(e) => return Err(e),
        };

        let local_header = &snapshot.header;
        let remote_header = remote.header();

        // Tombstones purged on either side stay purged.
        let purged = merge_purged(&local_header.sync.purged, &remote_header.sync.purged);
        let outcome = merge_records(
            &forget_purged(&snapshot.records, &purged),
            &forget_purged(&remote_records, &purged),
        );
        // Differing passphrase slots: the slot from the later passphrase change wins.
        let slot_changed = local_header.passphrase_slot != remote_header.passphrase_slot;
        let adopt_remote_slot = slot_changed
            && remote_header
                .passphrase_slot
                .supersedes(&local_header.passphrase_slot);
        let push_slot = slot_changed && !adopt_remote_slot;
        let matches_remote = outcome.records == remote_records && purged == remote_header.sync.purged;
        let matches_local = outcome.records == snapshot.records && purged == local_header.sync.purged;

        let kind = if matches_remote && matches_local && !slot_changed {
            SyncOutcome::AlreadyInSync
        } else if matches_remote && !push_slot {
            SyncOutcome::Pulled
        } else {
            SyncOutcome::Pushed
        };

        let mut header = local_header.clone();
        if adopt_remote_slot {
            header.passphrase_slot = remote_header.passphrase_slot.clone();
        }
        header.sync.clock.merge(&remote_header.sync.clock);
        header.sync.purged = purged;
        match kind {
            SyncOutcome::Pushed => {
                header.version = local_header.version.max(remote_header.version) + 1;
                header.sync.clock.bump(vault.store().replica_id());
                header.sync.sync_round += 1;
            }
            _ => {
                header.version = (local_header.version + 1).max(remote_header.version);
            }
        }
        track_tombstones(&mut header, &outcome.records, local_header.sync.sync_round);

        let (local, upload) = seal_pair(vault, header, &outcome.records)?;
        Ok(Plan {
            outcome: kind,
            local,
            upload: (kind == SyncOutcome::Pushed).then_some((upload, Some(storage_version))),
            records: outcome.records,
            merge: outcome.report,
        })
    }
}

/// Note the round at which each tombstone was first seen and forget
/// entries for records that are gone or alive again.
fn track_tombstones(header: &mut ContainerHeader, records: &[CredentialRecord], round: u64) {
    let rounds = &mut header.sync.tombstone_rounds;
    rounds.retain(|id, _| records.iter().any(|r| r.id == *id && r.deleted));
    for record in records.iter().filter(|r| r.deleted) {
        rounds.entry(record.id).or_insert(round);
    }
}

/// Seal the local container and the upload copy.  The upload copy never
/// carries this device's biometric slot.
fn seal_pair(
    vault: &Vault,
    header: ContainerHeader,
    records: &[CredentialRecord],
) -> Result<(VaultContainer, Vec<u8>)> {
    let mut shared = header.clone();
    shared.biometric_slot = None;
    vault.machine().with_key(|key| {
        let local = VaultContainer::seal(header, records, key)?;
        let upload = VaultContainer::seal(shared, records, key)?.to_bytes()?;
        Ok((local, upload))
    })?
}

fn checkpoint(cancel: &CancelToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(CipherSafeError::SyncCancelled);
    }
    Ok(())
}

/// Bound a remote call by `timeout`.
pub(crate) async fn bounded<T>(timeout: Duration, call: impl Future<Output = Result<T>>) -> Result<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(CipherSafeError::SyncTimedOut(timeout)),
    }
}

//! The vault store: sole owner of the decrypted record set and sole writer
//! of the persisted container.
//!
//! Every operation takes one `tokio::sync::Mutex`, so CRUD calls and
//! commits are linearized and a reader never observes a half-applied
//! mutation.  The lock is held across the durable write, so at most one
//! commit is in flight per store.
//!
//! Plaintext records live here only while the unlock state machine is
//! `Unlocked`; the first access after the machine leaves that state
//! zeroizes and drops them.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use super::format::{ContainerHeader, VaultContainer};
use super::persistence::ContainerPersistence;
use super::record::{CredentialRecord, NewRecord, RecordFilter, RecordUpdate};
use crate::crypto::wrap::{BiometricSlot, PassphraseSlot};
use crate::errors::{CipherSafeError, Result};
use crate::unlock::machine::{UnlockState, UnlockStateMachine};

pub(crate) struct StoreState {
    pub(crate) header: ContainerHeader,
    pub(crate) records: BTreeMap<Uuid, CredentialRecord>,
    /// In-memory changes not yet committed.
    pub(crate) dirty: bool,
    /// Bumped on every in-memory change; lets sync detect local edits.
    pub(crate) generation: u64,
}

impl StoreState {
    fn touch(&mut self) {
        self.dirty = true;
        self.generation += 1;
    }

    fn evict(&mut self) {
        for record in self.records.values_mut() {
            record.zeroize_secrets();
        }
        self.records.clear();
        self.dirty = false;
    }

    fn install(&mut self, header: ContainerHeader, records: Vec<CredentialRecord>) {
        self.evict();
        self.header = header;
        self.records = records.into_iter().map(|r| (r.id, r)).collect();
        self.generation += 1;
    }
}

/// Point-in-time copy used by the sync engine.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    pub header: ContainerHeader,
    pub records: Vec<CredentialRecord>,
    pub generation: u64,
}

/// Record counts for status output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCounts {
    pub live: usize,
    pub tombstones: usize,
    pub conflicts: usize,
}

pub struct VaultStore {
    state: Arc<Mutex<StoreState>>,
    machine: Arc<UnlockStateMachine>,
    persistence: Arc<dyn ContainerPersistence>,
    replica_id: String,
}

impl VaultStore {
    pub(crate) fn new(
        header: ContainerHeader,
        machine: Arc<UnlockStateMachine>,
        persistence: Arc<dyn ContainerPersistence>,
        replica_id: String,
    ) -> Self {
        Self {
            state: Arc::new(Mutex::new(StoreState {
                header,
                records: BTreeMap::new(),
                dirty: false,
                generation: 0,
            })),
            machine,
            persistence,
            replica_id,
        }
    }

    pub fn replica_id(&self) -> &str {
        &self.replica_id
    }

    pub fn persistence(&self) -> &Arc<dyn ContainerPersistence> {
        &self.persistence
    }

    /// Header of the last committed container.
    pub async fn header(&self) -> ContainerHeader {
        self.state.lock().await.header.clone()
    }

    // ------------------------------------------------------------------
    // Record operations
    // ------------------------------------------------------------------

    /// Add a new record (revision 1).
    pub async fn create(&self, new: NewRecord) -> Result<CredentialRecord> {
        new.validate()?;
        let mut state = self.lock_unlocked().await?;
        let now = self.machine.clock().now();

        let record = CredentialRecord {
            id: Uuid::new_v4(),
            title: new.title,
            fields: new.fields,
            created_at: now,
            updated_at: now,
            deleted: false,
            revision: 1,
            origin: self.replica_id.clone(),
            conflict_of: None,
        };
        state.records.insert(record.id, record.clone());
        state.touch();
        tracing::debug!(id = %record.id, "record created");
        Ok(record)
    }

    /// Apply `update` to a live record.
    pub async fn update(&self, id: Uuid, update: RecordUpdate) -> Result<CredentialRecord> {
        update.validate()?;
        let mut state = self.lock_unlocked().await?;
        let now = self.machine.clock().now();

        let record = live_mut(&mut state, id)?;
        update.apply_to(record);
        record.revision += 1;
        record.updated_at = now;
        record.origin.clone_from(&self.replica_id);
        let updated = record.clone();

        state.touch();
        tracing::debug!(%id, revision = updated.revision, "record updated");
        Ok(updated)
    }

    /// Tombstone a live record.  Its secret fields are erased immediately;
    /// the tombstone itself is kept until `purge_tombstones`.
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let mut state = self.lock_unlocked().await?;
        let now = self.machine.clock().now();

        let record = live_mut(&mut state, id)?;
        record.zeroize_secrets();
        record.deleted = true;
        record.revision += 1;
        record.updated_at = now;
        record.origin.clone_from(&self.replica_id);

        let round = state.header.sync.sync_round;
        state.header.sync.tombstone_rounds.insert(id, round);
        state.touch();
        tracing::debug!(%id, "record tombstoned");
        Ok(())
    }

    /// A live record by id.
    pub async fn get(&self, id: Uuid) -> Result<CredentialRecord> {
        let state = self.lock_unlocked().await?;
        state
            .records
            .get(&id)
            .filter(|r| !r.deleted)
            .cloned()
            .ok_or(CipherSafeError::RecordNotFound(id))
    }

    /// Records matching `filter`, ordered by title.
    pub async fn list(&self, filter: &RecordFilter) -> Result<Vec<CredentialRecord>> {
        let state = self.lock_unlocked().await?;
        let mut out: Vec<CredentialRecord> = state
            .records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            a.title
                .to_lowercase()
                .cmp(&b.title.to_lowercase())
                .then(a.id.cmp(&b.id))
        });
        Ok(out)
    }

    /// The live record whose title equals `title` (case-insensitive).
    pub async fn find_by_title(&self, title: &str) -> Result<Option<CredentialRecord>> {
        let wanted = title.to_lowercase();
        let state = self.lock_unlocked().await?;
        Ok(state
            .records
            .values()
            .filter(|r| !r.deleted && r.title.to_lowercase() == wanted)
            .min_by_key(|r| r.created_at)
            .cloned())
    }

    pub async fn counts(&self) -> Result<RecordCounts> {
        let state = self.lock_unlocked().await?;
        let mut counts = RecordCounts::default();
        for record in state.records.values() {
            if record.deleted {
                counts.tombstones += 1;
            } else {
                counts.live += 1;
                if record.conflict_of.is_some() {
                    counts.conflicts += 1;
                }
            }
        }
        Ok(counts)
    }

    /// Physically remove tombstones recorded before `older_than_round`.
    ///
    /// The bound is clamped to the current sync round, so a tombstone is
    /// only purged after at least one successful sync since its deletion.
    /// Returns the number of records purged.
    pub async fn purge_tombstones(&self, older_than_round: u64) -> Result<usize> {
        let mut state = self.lock_unlocked().await?;
        let bound = older_than_round.min(state.header.sync.sync_round);

        let doomed: Vec<Uuid> = state
            .records
            .values()
            .filter(|r| r.deleted)
            .filter(|r| {
                state
                    .header
                    .sync
                    .tombstone_rounds
                    .get(&r.id)
                    .is_some_and(|round| *round < bound)
            })
            .map(|r| r.id)
            .collect();

        for id in &doomed {
            if let Some(record) = state.records.remove(id) {
                state.header.sync.purged.insert(*id, record.revision);
            }
            state.header.sync.tombstone_rounds.remove(id);
        }
        if !doomed.is_empty() {
            state.touch();
            tracing::info!(count = doomed.len(), "purged tombstones");
        }
        Ok(doomed.len())
    }

    // ------------------------------------------------------------------
    // Key slots
    // ------------------------------------------------------------------

    pub(crate) async fn set_passphrase_slot(&self, slot: PassphraseSlot) -> Result<()> {
        let mut state = self.lock_unlocked().await?;
        state.header.passphrase_slot = slot;
        state.touch();
        Ok(())
    }

    pub(crate) async fn set_biometric_slot(&self, slot: Option<BiometricSlot>) -> Result<()> {
        let mut state = self.lock_unlocked().await?;
        state.header.biometric_slot = slot;
        state.touch();
        Ok(())
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Encrypt and durably persist pending changes.
    ///
    /// Either the new container fully replaces the old one or the old one
    /// stays intact and the in-memory changes remain pending.  Returns the
    /// committed container version.
    pub async fn commit(&self) -> Result<u64> {
        let mut state = self.lock_unlocked().await?;
        if !state.dirty {
            return Ok(state.header.version);
        }

        let mut header = state.header.clone();
        header.version += 1;
        header.sync.clock.bump(&self.replica_id);

        let records: Vec<CredentialRecord> = state.records.values().cloned().collect();
        let container = self
            .machine
            .with_key(|key| VaultContainer::seal(header, &records, key))??;
        persist(&self.persistence, container.to_bytes()?).await?;

        state.header = container.header().clone();
        state.dirty = false;
        tracing::info!(version = state.header.version, "vault committed");
        Ok(state.header.version)
    }

    pub async fn snapshot(&self) -> Result<StoreSnapshot> {
        let state = self.lock_unlocked().await?;
        Ok(StoreSnapshot {
            header: state.header.clone(),
            records: state.records.values().cloned().collect(),
            generation: state.generation,
        })
    }

    pub async fn is_dirty(&self) -> bool {
        self.state.lock().await.dirty
    }

    /// Take the store lock for the final phase of a sync.
    ///
    /// Fails with `LocalChangedDuringSync` if anything changed since the
    /// snapshot at `expected_generation`.
    pub(crate) async fn begin_sync_commit(&self, expected_generation: u64) -> Result<SyncCommit> {
        let mut guard = Arc::clone(&self.state).lock_owned().await;
        self.check_access(&mut guard)?;
        if guard.generation != expected_generation {
            return Err(CipherSafeError::LocalChangedDuringSync);
        }
        Ok(SyncCommit {
            guard,
            persistence: Arc::clone(&self.persistence),
        })
    }

    /// Load decrypted records after a successful unlock.
    pub(crate) async fn install(&self, header: ContainerHeader, records: Vec<CredentialRecord>) {
        let mut state = self.state.lock().await;
        state.install(header, records);
    }

    /// Run `resolve` (the end of an unlock attempt) while holding the store
    /// lock and install `records` only if it left the machine `Unlocked`.
    pub(crate) async fn install_unlocked(
        &self,
        header: ContainerHeader,
        records: Vec<CredentialRecord>,
        resolve: impl FnOnce() -> UnlockState,
    ) -> UnlockState {
        let mut state = self.state.lock().await;
        let outcome = resolve();
        if outcome == UnlockState::Unlocked {
            state.install(header, records);
        } else {
            state.evict();
        }
        outcome
    }

    /// Zeroize and drop the plaintext records (on lock).
    pub(crate) async fn evict(&self) {
        self.state.lock().await.evict();
    }

    /// Delete the persisted container and all in-memory state.
    pub(crate) async fn destroy(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        state.evict();
        let persistence = Arc::clone(&self.persistence);
        run_blocking(move || persistence.destroy()).await
    }

    // ------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------

    async fn lock_unlocked(&self) -> Result<tokio::sync::MutexGuard<'_, StoreState>> {
        let mut state = self.state.lock().await;
        self.check_access(&mut state)?;
        Ok(state)
    }

    fn check_access(&self, state: &mut StoreState) -> Result<()> {
        if let Err(e) = self.machine.ensure_unlocked() {
            // An attempt in flight owns the next install.
            if !state.records.is_empty() && self.machine.state() != UnlockState::Unlocking {
                state.evict();
            }
            return Err(e);
        }
        Ok(())
    }
}

fn live_mut(state: &mut StoreState, id: Uuid) -> Result<&mut CredentialRecord> {
    state
        .records
        .get_mut(&id)
        .filter(|r| !r.deleted)
        .ok_or(CipherSafeError::RecordNotFound(id))
}

/// Exclusive hold on the store for the last step of a sync.
///
/// Owns the lock, so it can be moved into a task that must finish even if
/// the caller goes away.
pub(crate) struct SyncCommit {
    guard: OwnedMutexGuard<StoreState>,
    persistence: Arc<dyn ContainerPersistence>,
}

impl SyncCommit {
    /// Durably replace the local container and install its records.
    pub(crate) async fn apply(
        mut self,
        container: &VaultContainer,
        records: Vec<CredentialRecord>,
    ) -> Result<u64> {
        persist(&self.persistence, container.to_bytes()?).await?;

        let state = &mut *self.guard;
        state.evict();
        state.header = container.header().clone();
        state.records = records.into_iter().map(|r| (r.id, r)).collect();
        state.dirty = false;
        state.generation += 1;
        Ok(state.header.version)
    }
}

async fn persist(persistence: &Arc<dyn ContainerPersistence>, bytes: Vec<u8>) -> Result<()> {
    let persistence = Arc::clone(persistence);
    run_blocking(move || persistence.replace(&bytes)).await
}

/// Run blocking I/O or CPU work off the async workers.
pub(crate) async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CipherSafeError::Io(std::io::Error::other(format!("blocking task failed: {e}"))))?
}

//! `Vault`: one vault identity with its store and unlock state machine.
//!
//! This is the entry point callers use: create or open a container, unlock
//! it with a passphrase or a biometric proof, manage key slots, lock, and
//! wipe.  Record CRUD goes through `Vault::store()`.

use std::sync::Arc;
use std::time::Duration;

use zeroize::Zeroizing;

use super::format::{ContainerHeader, VaultContainer};
use super::persistence::ContainerPersistence;
use super::store::{run_blocking, RecordCounts, VaultStore};
use crate::crypto::biometric::{outcome_error, BiometricAuthenticator, BiometricOutcome};
use crate::crypto::kdf::KdfParams;
use crate::crypto::keys::MasterKey;
use crate::crypto::wrap::{BiometricSlot, PassphraseSlot};
use crate::errors::{CipherSafeError, Result};
use crate::unlock::clock::{Clock, SystemClock};
use crate::unlock::lockout::Lockout;
use crate::unlock::machine::{UnlockAttempt, UnlockState, UnlockStateMachine};

/// Runtime knobs for one vault.
#[derive(Clone)]
pub struct VaultOptions {
    /// Work factor for new passphrase slots.
    pub kdf: KdfParams,
    /// Lock after this long without key use.
    pub idle_timeout: Option<Duration>,
    /// Upper bound on passphrase key derivation.
    pub unlock_timeout: Duration,
    /// This device's identity in version vectors.
    pub replica_id: String,
    pub clock: Arc<dyn Clock>,
}

impl VaultOptions {
    pub fn new(replica_id: impl Into<String>) -> Self {
        Self {
            kdf: KdfParams::default(),
            idle_timeout: None,
            unlock_timeout: Duration::from_secs(60),
            replica_id: replica_id.into(),
            clock: Arc::new(SystemClock),
        }
    }
}

impl std::fmt::Debug for VaultOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultOptions")
            .field("kdf", &self.kdf)
            .field("idle_timeout", &self.idle_timeout)
            .field("unlock_timeout", &self.unlock_timeout)
            .field("replica_id", &self.replica_id)
            .finish_non_exhaustive()
    }
}

/// Snapshot of a vault for status displays.
#[derive(Debug, Clone)]
pub struct VaultStatus {
    pub location: String,
    pub state: UnlockState,
    pub vault_id: uuid::Uuid,
    pub version: u64,
    pub sync_round: u64,
    pub failed_attempts: u32,
    pub biometric_enrolled: bool,
    pub pending_changes: bool,
    /// Only available while unlocked.
    pub counts: Option<RecordCounts>,
}

pub struct Vault {
    store: Arc<VaultStore>,
    machine: Arc<UnlockStateMachine>,
    options: VaultOptions,
}

impl Vault {
    // ------------------------------------------------------------------
    // Construction
    // ------------------------------------------------------------------

    /// Create a new empty vault protected by `passphrase`.
    ///
    /// Generates a fresh master key and salt, persists the empty container,
    /// and returns the vault already unlocked.
    pub async fn create(
        persistence: Arc<dyn ContainerPersistence>,
        lockout: Lockout,
        passphrase: &[u8],
        options: VaultOptions,
    ) -> Result<Self> {
        options.kdf.validate()?;
        if load(&persistence).await?.is_some() {
            return Err(CipherSafeError::VaultAlreadyExists(persistence.describe().into()));
        }

        let master = MasterKey::generate();
        let for_slot = master.duplicate();
        let passphrase = Zeroizing::new(passphrase.to_vec());
        let kdf = options.kdf;
        let slot = run_blocking(move || PassphraseSlot::seal(&for_slot, &passphrase, kdf)).await?;

        let header = ContainerHeader::new(slot);
        let container = VaultContainer::seal(header, &[], &master)?;
        let bytes = container.to_bytes()?;
        {
            let persistence = Arc::clone(&persistence);
            run_blocking(move || persistence.replace(&bytes)).await?;
        }

        let vault = Self::assemble(container.header().clone(), persistence, lockout, options);
        vault.machine.establish(master)?;
        vault.store.install(container.header().clone(), Vec::new()).await;
        tracing::info!(vault_id = %container.vault_id(), "vault created");
        Ok(vault)
    }

    /// Open an existing container.  The vault starts `Locked`.
    pub async fn open(
        persistence: Arc<dyn ContainerPersistence>,
        lockout: Lockout,
        options: VaultOptions,
    ) -> Result<Self> {
        let container = read_container(&persistence).await?;
        tracing::debug!(
            location = %persistence.describe(),
            version = container.version(),
            "vault opened"
        );
        Ok(Self::assemble(container.header().clone(), persistence, lockout, options))
    }

    fn assemble(
        header: ContainerHeader,
        persistence: Arc<dyn ContainerPersistence>,
        lockout: Lockout,
        options: VaultOptions,
    ) -> Self {
        let machine = Arc::new(
            UnlockStateMachine::new(lockout, Arc::clone(&options.clock))
                .with_idle_timeout(options.idle_timeout),
        );
        let store = Arc::new(VaultStore::new(
            header,
            Arc::clone(&machine),
            persistence,
            options.replica_id.clone(),
        ));
        Self {
            store,
            machine,
            options,
        }
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn store(&self) -> &Arc<VaultStore> {
        &self.store
    }

    pub fn machine(&self) -> &Arc<UnlockStateMachine> {
        &self.machine
    }

    pub fn options(&self) -> &VaultOptions {
        &self.options
    }

    pub fn state(&self) -> UnlockState {
        self.machine.state()
    }

    pub fn failed_attempts(&self) -> u32 {
        self.machine.failed_attempts()
    }

    // ------------------------------------------------------------------
    // Unlock
    // ------------------------------------------------------------------

    /// Unlock with the master passphrase.
    ///
    /// A wrong passphrase or a key derivation that exceeds the unlock
    /// timeout counts toward lockout.  While locked out the passphrase is
    /// not even tried.
    pub async fn unlock_with_passphrase(&self, passphrase: &[u8]) -> Result<()> {
        let attempt = self.machine.begin_attempt()?;
        let container = match read_container(self.store.persistence()).await {
            Ok(c) => c,
            Err(e) => {
                attempt.abandon();
                return Err(e);
            }
        };

        let slot = container.header().passphrase_slot.clone();
        let kdf_slot = slot.clone();
        let passphrase = Zeroizing::new(passphrase.to_vec());
        let derive = run_blocking(move || kdf_slot.derive_wrapping_key(&passphrase));

        let wrapping_key = match tokio::time::timeout(self.options.unlock_timeout, derive).await {
            Err(_) => {
                attempt.fail();
                return Err(CipherSafeError::UnlockTimedOut(self.options.unlock_timeout));
            }
            Ok(Err(e)) => {
                attempt.abandon();
                return Err(e);
            }
            Ok(Ok(key)) => key,
        };

        match slot.unwrap_with(&wrapping_key) {
            Ok(master) => self.finish_unlock(attempt, &container, master).await,
            Err(CipherSafeError::AuthenticationFailure) => {
                attempt.fail();
                Err(CipherSafeError::AuthenticationFailure)
            }
            Err(e) => {
                attempt.abandon();
                Err(e)
            }
        }
    }

    /// Unlock with a biometric proof from `auth`.
    ///
    /// The platform prompt runs on the blocking pool and is bounded by the
    /// unlock timeout; a prompt that outlives it counts toward lockout.  A
    /// cancelled prompt or missing hardware is not a failed attempt; a
    /// proof whose hardware key cannot open the slot is.
    pub async fn unlock_with_biometric(&self, auth: Arc<dyn BiometricAuthenticator>) -> Result<()> {
        let attempt = self.machine.begin_attempt()?;
        let container = match read_container(self.store.persistence()).await {
            Ok(c) => c,
            Err(e) => {
                attempt.abandon();
                return Err(e);
            }
        };
        let Some(slot) = container.header().biometric_slot.clone() else {
            attempt.abandon();
            return Err(CipherSafeError::BiometricNotEnrolled);
        };

        let prompt = run_blocking(move || Ok(prompt_and_open(auth.as_ref(), &slot)));
        let step = match tokio::time::timeout(self.options.unlock_timeout, prompt).await {
            Err(_) => {
                attempt.fail();
                return Err(CipherSafeError::UnlockTimedOut(self.options.unlock_timeout));
            }
            Ok(Err(e)) => {
                attempt.abandon();
                return Err(e);
            }
            Ok(Ok(step)) => step,
        };

        match step {
            BiometricStep::Declined(e) => {
                attempt.abandon();
                Err(e)
            }
            BiometricStep::Opened(Ok(master)) => self.finish_unlock(attempt, &container, master).await,
            BiometricStep::Opened(Err(CipherSafeError::AuthenticationFailure)) => {
                attempt.fail();
                Err(CipherSafeError::AuthenticationFailure)
            }
            BiometricStep::Opened(Err(e)) => {
                attempt.abandon();
                Err(e)
            }
        }
    }

    /// Resolve `attempt` and install the decrypted records under one store
    /// lock, so no reader sees records without `Unlocked` or the reverse.
    async fn finish_unlock(
        &self,
        attempt: UnlockAttempt,
        container: &VaultContainer,
        master: MasterKey,
    ) -> Result<()> {
        let records = match container.open(&master) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!("container failed to decrypt after key unwrap: {e}");
                attempt.abandon();
                return Err(e);
            }
        };

        let header = container.header().clone();
        match self
            .store
            .install_unlocked(header, records, move || attempt.succeed(master))
            .await
        {
            UnlockState::Unlocked => Ok(()),
            UnlockState::Wiped => Err(CipherSafeError::VaultWiped),
            _ => Err(CipherSafeError::VaultLocked),
        }
    }

    // ------------------------------------------------------------------
    // Key slots
    // ------------------------------------------------------------------

    /// Add (or replace) the biometric slot.  Requires `Unlocked`.
    pub async fn enroll_biometric(&self, auth: &dyn BiometricAuthenticator) -> Result<()> {
        self.machine.ensure_unlocked()?;
        let outcome = auth.request_proof();
        let proof = match outcome {
            BiometricOutcome::Proof(proof) => proof,
            other => {
                return Err(outcome_error(&other).unwrap_or(CipherSafeError::BiometricUnavailable))
            }
        };
        let handle = auth.key_handle(&proof)?;
        let slot = self
            .machine
            .with_key(|key| BiometricSlot::seal(key, handle.as_ref()))??;

        self.store.set_biometric_slot(Some(slot)).await?;
        self.store.commit().await?;
        tracing::info!("biometric unlock enrolled");
        Ok(())
    }

    /// Drop the biometric slot.  Requires `Unlocked`.
    pub async fn remove_biometric(&self) -> Result<()> {
        self.store.set_biometric_slot(None).await?;
        self.store.commit().await?;
        tracing::info!("biometric unlock removed");
        Ok(())
    }

    /// Re-wrap the same master key under `new_passphrase` with a fresh salt.
    /// Record ciphertext and remote replicas stay compatible; the new slot
    /// carries the next generation so it wins over the old one in sync.
    pub async fn change_passphrase(&self, new_passphrase: &[u8]) -> Result<()> {
        let master = self.machine.with_key(MasterKey::duplicate)?;
        let passphrase = Zeroizing::new(new_passphrase.to_vec());
        let kdf = self.options.kdf;
        kdf.validate()?;
        let current = self.store.header().await.passphrase_slot;
        let slot = run_blocking(move || current.rotate(&master, &passphrase, kdf)).await?;

        self.store.set_passphrase_slot(slot).await?;
        self.store.commit().await?;
        tracing::info!("passphrase changed");
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lock / wipe
    // ------------------------------------------------------------------

    /// `Unlocked → Locked`.  Uncommitted changes are discarded.
    pub async fn lock(&self) -> bool {
        let locked = self.machine.lock();
        self.store.evict().await;
        locked
    }

    /// Lock if the idle timeout elapsed.  Returns whether it locked.
    pub async fn lock_if_idle(&self) -> bool {
        let locked = self.machine.lock_if_idle();
        if locked {
            self.store.evict().await;
        }
        locked
    }

    /// Irreversibly destroy the container, lockout ledger, and keys.
    pub async fn wipe(&self) -> Result<()> {
        self.machine.wipe()?;
        self.store.destroy().await?;
        tracing::warn!(location = %self.store.persistence().describe(), "vault wiped");
        Ok(())
    }

    pub async fn status(&self) -> VaultStatus {
        let header = self.store.header().await;
        let state = self.machine.state();
        let counts = match state {
            UnlockState::Unlocked => self.store.counts().await.ok(),
            _ => None,
        };
        VaultStatus {
            location: self.store.persistence().describe(),
            state,
            vault_id: header.vault_id,
            version: header.version,
            sync_round: header.sync.sync_round,
            failed_attempts: self.machine.failed_attempts(),
            biometric_enrolled: header.biometric_slot.is_some(),
            pending_changes: self.store.is_dirty().await,
            counts,
        }
    }
}

/// Result of the platform prompt, produced off the async runtime.
enum BiometricStep {
    /// No proof or no key handle; not a failed attempt.
    Declined(CipherSafeError),
    Opened(Result<MasterKey>),
}

fn prompt_and_open(auth: &dyn BiometricAuthenticator, slot: &BiometricSlot) -> BiometricStep {
    let proof = match auth.request_proof() {
        BiometricOutcome::Proof(proof) => proof,
        other => {
            return BiometricStep::Declined(
                outcome_error(&other).unwrap_or(CipherSafeError::BiometricUnavailable),
            )
        }
    };
    match auth.key_handle(&proof) {
        Ok(handle) => BiometricStep::Opened(slot.open(handle.as_ref())),
        Err(e) => BiometricStep::Declined(e),
    }
}

async fn load(persistence: &Arc<dyn ContainerPersistence>) -> Result<Option<Vec<u8>>> {
    let persistence = Arc::clone(persistence);
    run_blocking(move || persistence.load()).await
}

async fn read_container(persistence: &Arc<dyn ContainerPersistence>) -> Result<VaultContainer> {
    match load(persistence).await? {
        Some(bytes) => VaultContainer::from_bytes(&bytes),
        None => Err(CipherSafeError::VaultNotFound(persistence.describe().into())),
    }
}

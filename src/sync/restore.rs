//! Restore a vault onto a device that has no local container.

use std::sync::Arc;

use super::engine::{bounded, SyncEngine};
use crate::errors::{CipherSafeError, Result};
use crate::unlock::lockout::Lockout;
use crate::vault::format::VaultContainer;
use crate::vault::persistence::ContainerPersistence;
use crate::vault::session::{Vault, VaultOptions};
use crate::vault::store::run_blocking;

impl SyncEngine {
    /// Download the remote container into `persistence` and open it.
    ///
    /// The returned vault is `Locked`; unlock it with the passphrase the
    /// remote container was last uploaded with.
    pub async fn restore_from_remote(
        &self,
        persistence: Arc<dyn ContainerPersistence>,
        lockout: Lockout,
        options: VaultOptions,
    ) -> Result<Vault> {
        let existing = {
            let persistence = Arc::clone(&persistence);
            run_blocking(move || persistence.load()).await?
        };
        if existing.is_some() {
            return Err(CipherSafeError::VaultAlreadyExists(persistence.describe().into()));
        }

        let key = &self.options().remote_key;
        let object = bounded(self.options().call_timeout, self.remote().get(key))
            .await?
            .ok_or_else(|| CipherSafeError::VaultNotFound(key.into()))?;

        let container = VaultContainer::from_bytes(&object.bytes)?;
        tracing::info!(
            vault_id = %container.vault_id(),
            version = container.version(),
            "restoring vault from remote"
        );

        let bytes = object.bytes;
        {
            let persistence = Arc::clone(&persistence);
            run_blocking(move || persistence.replace(&bytes)).await?;
        }
        Vault::open(persistence, lockout, options).await
    }
}

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// All errors that can occur in CipherSafe.
///
/// None of these are fatal to the process: after any error the vault is
/// either Locked or Unlocked and the on-disk container is intact.
#[derive(Debug, Error)]
pub enum CipherSafeError {
    // --- Crypto errors ---
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Authentication failed: wrong passphrase, wrong key, or tampered data")]
    AuthenticationFailure,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    // --- Container errors ---
    #[error("Vault not found at {0}")]
    VaultNotFound(PathBuf),

    #[error("Vault already exists at {0}")]
    VaultAlreadyExists(PathBuf),

    #[error("Invalid vault format: {0}")]
    FormatError(String),

    // --- Unlock state errors ---
    #[error("Vault is locked")]
    VaultLocked,

    #[error("Too many failed unlock attempts; try again in {}s", remaining.as_secs().max(1))]
    LockoutActive { remaining: Duration },

    #[error("Vault has been wiped")]
    VaultWiped,

    #[error("Another unlock attempt is already in progress")]
    UnlockInProgress,

    #[error("Vault is already unlocked")]
    AlreadyUnlocked,

    #[error("Unlock timed out after {0:?}")]
    UnlockTimedOut(Duration),

    // --- Biometric errors ---
    #[error("Biometric prompt was cancelled")]
    BiometricCancelled,

    #[error("Biometric hardware is unavailable")]
    BiometricUnavailable,

    #[error("Biometric unlock is not enrolled for this vault")]
    BiometricNotEnrolled,

    // --- Record errors ---
    #[error("Record '{0}' not found")]
    RecordNotFound(Uuid),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    // --- Sync errors ---
    #[error("Remote container changed concurrently: {0}")]
    VersionConflict(String),

    #[error("Local vault changed while sync was in progress")]
    LocalChangedDuringSync,

    #[error("Network failure: {0}")]
    NetworkFailure(String),

    #[error("Remote storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Sync call timed out after {0:?}")]
    SyncTimedOut(Duration),

    #[error("Sync was cancelled")]
    SyncCancelled,

    #[error("Remote container belongs to a different vault: {0}")]
    RemoteMismatch(String),

    // --- Config errors ---
    #[error("Config file error: {0}")]
    ConfigError(String),

    // --- IO errors ---
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // --- Serialization errors ---
    #[error("Serialization error: {0}")]
    SerializationError(String),

    // --- Spreadsheet transfer errors ---
    #[error("Transfer error: {0}")]
    TransferError(String),

    // --- Audit errors ---
    #[error("Audit error: {0}")]
    AuditError(String),

    // --- CLI errors ---
    #[error("Command failed: {0}")]
    CommandFailed(String),

    #[error("User cancelled operation")]
    UserCancelled,

    #[error("Passphrase mismatch: passphrases do not match")]
    PasswordMismatch,
}

impl CipherSafeError {
    /// Whether the sync engine may retry the whole reconciliation after
    /// this error instead of surfacing it.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::VersionConflict(_) | Self::LocalChangedDuringSync)
    }
}

/// Convenience type alias for CipherSafe results.
pub type Result<T> = std::result::Result<T, CipherSafeError>;

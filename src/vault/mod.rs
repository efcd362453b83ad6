//! Vault module: records, the encrypted container, and the store that owns them.

pub mod codec;
pub mod format;
pub mod persistence;
pub mod record;
pub mod session;
pub mod store;

pub use format::{ContainerHeader, SyncState, VaultContainer};
pub use persistence::{ContainerPersistence, CrashPoint, FilePersistence};
pub use record::{CredentialRecord, NewRecord, RecordFilter, RecordUpdate};
pub use session::{Vault, VaultOptions, VaultStatus};
pub use store::{RecordCounts, StoreSnapshot, VaultStore};

//! Replica reconciliation against a remote object store.
//!
//! - `version`: version vectors
//! - `merge`: per-record merge and conflict copies
//! - `remote`: the object-storage interface and two implementations
//! - `engine`: one sync round with retries, timeouts, and cancellation
//! - `restore`: bootstrap a device from the remote copy
//! - `scheduler`: periodic background sync

pub mod cancel;
pub mod engine;
pub mod merge;
pub mod remote;
pub mod restore;
pub mod scheduler;
pub mod version;

pub use cancel::CancelToken;
pub use engine::{SyncEngine, SyncOptions, SyncOutcome, SyncReport};
pub use merge::{forget_purged, merge_purged, merge_records, MergeOutcome, MergeReport};
pub use remote::{DirectoryObjectStore, MemoryObjectStore, ObjectStore, RemoteObject, DEFAULT_REMOTE_KEY};
pub use scheduler::{BackgroundSync, SchedulerStatus};
pub use version::{Causality, VersionVector};

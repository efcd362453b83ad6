//! Object-storage collaborator.
//!
//! The sync engine only ever stores encrypted container bytes here.  Every
//! object carries a storage-level version that `put` checks for optimistic
//! concurrency: `expected_version = None` means "must not exist yet".

use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::errors::{CipherSafeError, Result};
use crate::vault::persistence::write_atomic;
use crate::vault::store::run_blocking;

/// Default key of the vault container inside a remote store.
pub const DEFAULT_REMOTE_KEY: &str = "cipherSafe/vault.csafe";

/// Bytes plus the storage version they were read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteObject {
    pub bytes: Vec<u8>,
    pub version: u64,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Fetch an object; `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<RemoteObject>>;

    /// Store `bytes` if the current version equals `expected_version`.
    /// Returns the new version, or `VersionConflict`.
    async fn put(&self, key: &str, bytes: Vec<u8>, expected_version: Option<u64>) -> Result<u64>;

    /// Keys starting with `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    /// Remove an object.  Missing objects are not an error.
    async fn delete(&self, key: &str) -> Result<()>;
}

fn check_expected(key: &str, current: Option<u64>, expected: Option<u64>) -> Result<()> {
    if current == expected {
        return Ok(());
    }
    Err(CipherSafeError::VersionConflict(format!(
        "{key}: expected version {}, found {}",
        fmt_version(expected),
        fmt_version(current)
    )))
}

fn fmt_version(v: Option<u64>) -> String {
    v.map_or_else(|| "none".to_string(), |v| v.to_string())
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Faults {
    failing_gets: u32,
    failing_puts: u32,
    lost_put_acks: u32,
    concurrent_writes: u32,
    unavailable: bool,
    delay: Option<Duration>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    objects: HashMap<String, RemoteObject>,
    faults: Faults,
    puts: u64,
}

/// In-process object store with fault injection.
#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The next `n` gets fail with `NetworkFailure`.
    pub fn fail_next_gets(&self, n: u32) {
        self.lock().faults.failing_gets = n;
    }

    /// The next `n` puts fail with `NetworkFailure` without storing.
    pub fn fail_next_puts(&self, n: u32) {
        self.lock().faults.failing_puts = n;
    }

    /// The next `n` puts store the object but report `NetworkFailure`.
    pub fn lose_next_put_acks(&self, n: u32) {
        self.lock().faults.lost_put_acks = n;
    }

    /// Before each of the next `n` puts, another writer bumps the object.
    pub fn inject_concurrent_writes(&self, n: u32) {
        self.lock().faults.concurrent_writes = n;
    }

    /// Every call fails with `StorageUnavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().faults.unavailable = unavailable;
    }

    /// Sleep this long inside every call.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.lock().faults.delay = delay;
    }

    /// Successful puts so far.
    pub fn put_count(&self) -> u64 {
        self.lock().puts
    }

    /// Direct read, bypassing faults.
    pub fn object(&self, key: &str) -> Option<RemoteObject> {
        self.lock().objects.get(key).cloned()
    }

    /// Direct write, bypassing faults and version checks.
    pub fn insert_raw(&self, key: &str, bytes: Vec<u8>) -> u64 {
        let mut inner = self.lock();
        let version = inner.objects.get(key).map_or(1, |o| o.version + 1);
        inner
            .objects
            .insert(key.to_string(), RemoteObject { bytes, version });
        version
    }

    async fn pause(&self) -> Result<()> {
        let (delay, unavailable) = {
            let inner = self.lock();
            (inner.faults.delay, inner.faults.unavailable)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if unavailable {
            return Err(CipherSafeError::StorageUnavailable("memory store is offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<RemoteObject>> {
        self.pause().await?;
        let mut inner = self.lock();
        if inner.faults.failing_gets > 0 {
            inner.faults.failing_gets -= 1;
            return Err(CipherSafeError::NetworkFailure(format!("get {key}: connection reset")));
        }
        Ok(inner.objects.get(key).cloned())
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, expected_version: Option<u64>) -> Result<u64> {
        self.pause().await?;
        let mut inner = self.lock();
        if inner.faults.failing_puts > 0 {
            inner.faults.failing_puts -= 1;
            return Err(CipherSafeError::NetworkFailure(format!("put {key}: connection reset")));
        }
        if inner.faults.concurrent_writes > 0 {
            inner.faults.concurrent_writes -= 1;
            if let Some(object) = inner.objects.get_mut(key) {
                object.version += 1;
            }
        }

        let current = inner.objects.get(key).map(|o| o.version);
        check_expected(key, current, expected_version)?;
        let version = current.map_or(1, |v| v + 1);
        inner
            .objects
            .insert(key.to_string(), RemoteObject { bytes, version });
        inner.puts += 1;

        if inner.faults.lost_put_acks > 0 {
            inner.faults.lost_put_acks -= 1;
            return Err(CipherSafeError::NetworkFailure(format!(
                "put {key}: response lost"
            )));
        }
        Ok(version)
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.pause().await?;
        let inner = self.lock();
        let mut keys: Vec<String> = inner
            .objects
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.pause().await?;
        self.lock().objects.remove(key);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Directory store
// ---------------------------------------------------------------------------

/// Object store over a local directory, e.g. a folder kept in sync by a
/// cloud drive client.
///
/// Each object is a file; its version lives in a `<name>.version` sidecar.
/// Both are written with temp-then-rename, data first.
#[derive(Debug, Clone)]
pub struct DirectoryObjectStore {
    root: PathBuf,
    /// Serializes check-then-write within this process.
    write_lock: Arc<Mutex<()>>,
}

impl DirectoryObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &str) -> Result<PathBuf> {
        let relative = Path::new(key);
        let valid = !key.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !valid || key.ends_with(".version") {
            return Err(CipherSafeError::StorageUnavailable(format!(
                "invalid object key '{key}'"
            )));
        }
        Ok(self.root.join(relative))
    }
}

fn version_path(object: &Path) -> PathBuf {
    let mut name = object.as_os_str().to_os_string();
    name.push(".version");
    PathBuf::from(name)
}

fn read_version(object: &Path) -> Result<Option<u64>> {
    match std::fs::read_to_string(version_path(object)) {
        Ok(text) => text.trim().parse().map(Some).map_err(|e| {
            CipherSafeError::StorageUnavailable(format!(
                "corrupt version sidecar for {}: {e}",
                object.display()
            ))
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(storage_error(object, e)),
    }
}

fn storage_error(path: &Path, e: std::io::Error) -> CipherSafeError {
    CipherSafeError::StorageUnavailable(format!("{}: {e}", path.display()))
}

fn collect_keys(root: &Path, dir: &Path, out: &mut Vec<String>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        if entry.file_type()?.is_dir() {
            collect_keys(root, &path, out)?;
        } else if !name.ends_with(".version") {
            if let Ok(relative) = path.strip_prefix(root) {
                let key: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(key.join("/"));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl ObjectStore for DirectoryObjectStore {
    async fn get(&self, key: &str) -> Result<Option<RemoteObject>> {
        let path = self.object_path(key)?;
        run_blocking(move || {
            let Some(version) = read_version(&path)? else {
                return Ok(None);
            };
            match std::fs::read(&path) {
                Ok(bytes) => Ok(Some(RemoteObject { bytes, version })),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) => Err(storage_error(&path, e)),
            }
        })
        .await
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, expected_version: Option<u64>) -> Result<u64> {
        let path = self.object_path(key)?;
        let key = key.to_string();
        let write_lock = Arc::clone(&self.write_lock);
        run_blocking(move || {
            let _guard = write_lock.lock().unwrap_or_else(|p| p.into_inner());
            let current = read_version(&path)?;
            check_expected(&key, current, expected_version)?;
            let version = current.map_or(1, |v| v + 1);
            write_atomic(&path, &bytes)?;
            write_atomic(&version_path(&path), version.to_string().as_bytes())?;
            Ok(version)
        })
        .await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();
        run_blocking(move || {
            let mut keys = Vec::new();
            match collect_keys(&root, &root, &mut keys) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(storage_error(&root, e)),
            }
            keys.retain(|k| k.starts_with(&prefix));
            keys.sort();
            Ok(keys)
        })
        .await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.object_path(key)?;
        run_blocking(move || {
            for target in [version_path(&path), path.clone()] {
                match std::fs::remove_file(&target) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(storage_error(&target, e)),
                }
            }
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn memory_put_checks_expected_version() {
        let store = MemoryObjectStore::new();
        assert_eq!(store.put("k", b"a".to_vec(), None).await.unwrap(), 1);
        assert!(matches!(
            store.put("k", b"b".to_vec(), None).await,
            Err(CipherSafeError::VersionConflict(_))
        ));
        assert_eq!(store.put("k", b"b".to_vec(), Some(1)).await.unwrap(), 2);
        assert_eq!(store.get("k").await.unwrap().unwrap().bytes, b"b");
    }

    #[tokio::test]
    async fn memory_faults_are_one_shot() {
        let store = MemoryObjectStore::new();
        store.fail_next_gets(1);
        assert!(matches!(
            store.get("k").await,
            Err(CipherSafeError::NetworkFailure(_))
        ));
        assert!(store.get("k").await.unwrap().is_none());

        store.lose_next_put_acks(1);
        assert!(store.put("k", b"x".to_vec(), None).await.is_err());
        assert_eq!(store.object("k").unwrap().version, 1);
    }

    #[tokio::test]
    async fn directory_store_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryObjectStore::new(dir.path());
        assert!(store.get(DEFAULT_REMOTE_KEY).await.unwrap().is_none());

        let v1 = store.put(DEFAULT_REMOTE_KEY, b"one".to_vec(), None).await.unwrap();
        let v2 = store
            .put(DEFAULT_REMOTE_KEY, b"two".to_vec(), Some(v1))
            .await
            .unwrap();
        assert!(matches!(
            store.put(DEFAULT_REMOTE_KEY, b"x".to_vec(), Some(v1)).await,
            Err(CipherSafeError::VersionConflict(_))
        ));

        let object = store.get(DEFAULT_REMOTE_KEY).await.unwrap().unwrap();
        assert_eq!(object, RemoteObject { bytes: b"two".to_vec(), version: v2 });
        assert_eq!(
            store.list("cipherSafe/").await.unwrap(),
            vec![DEFAULT_REMOTE_KEY.to_string()]
        );

        store.delete(DEFAULT_REMOTE_KEY).await.unwrap();
        assert!(store.get(DEFAULT_REMOTE_KEY).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn directory_store_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = DirectoryObjectStore::new(dir.path());
        assert!(store.get("../outside").await.is_err());
        assert!(store.get("/etc/passwd").await.is_err());
    }
}

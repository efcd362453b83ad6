//! Durable local storage for the container.
//!
//! `FilePersistence` replaces the container with the
//! write-temp → fsync → rename → fsync-directory sequence, so readers
//! either see the complete previous container or the complete new one.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::errors::{CipherSafeError, Result};

/// Atomic replace semantics over some durable medium.
pub trait ContainerPersistence: Send + Sync + 'static {
    /// Current bytes, or `None` when nothing has been written yet.
    fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Durably replace the stored bytes, all or nothing.
    fn replace(&self, bytes: &[u8]) -> Result<()>;

    /// Remove the stored bytes.  Missing data is not an error.
    fn destroy(&self) -> Result<()>;

    /// Human-readable location for logs and status output.
    fn describe(&self) -> String;
}

/// Simulated crash points for `FilePersistence`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashPoint {
    /// Stop after writing half of the temp file.
    MidWrite,
    /// Stop after the temp file is durable but before the rename.
    BeforeRename,
}

/// Container stored as a single file.
#[derive(Debug)]
pub struct FilePersistence {
    path: PathBuf,
    crash: Mutex<Option<CrashPoint>>,
}

impl FilePersistence {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            crash: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Make the next `replace` fail at `point`.
    pub fn inject_crash(&self, point: CrashPoint) {
        if let Ok(mut guard) = self.crash.lock() {
            *guard = Some(point);
        }
    }

    fn take_crash(&self) -> Option<CrashPoint> {
        self.crash.lock().ok().and_then(|mut guard| guard.take())
    }
}

impl ContainerPersistence for FilePersistence {
    fn load(&self) -> Result<Option<Vec<u8>>> {
        match fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn replace(&self, bytes: &[u8]) -> Result<()> {
        match self.take_crash() {
            None => write_atomic(&self.path, bytes),
            Some(point) => {
                let tmp = temp_path(&self.path);
                let written = match point {
                    CrashPoint::MidWrite => &bytes[..bytes.len() / 2],
                    CrashPoint::BeforeRename => bytes,
                };
                fs::write(&tmp, written)?;
                Err(CipherSafeError::Io(std::io::Error::other(format!(
                    "simulated crash ({point:?}) while writing {}",
                    self.path.display()
                ))))
            }
        }
    }

    fn destroy(&self) -> Result<()> {
        let _ = fs::remove_file(temp_path(&self.path));
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Write `bytes` to `path` atomically and durably.
///
/// 1. Write a temp file in the same directory and fsync it.
/// 2. Rename it over the target (atomic on one filesystem).
/// 3. Fsync the directory so the rename itself survives power loss.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let tmp = temp_path(path);
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    sync_dir(&parent)
}

fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "container".into());
    path.with_file_name(format!(".{name}.tmp"))
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

//! Failed-attempt lockout with exponential backoff.
//!
//! Once `threshold` consecutive failures are recorded, each further
//! failure locks the vault out for `base_cooldown * 2^(failures - threshold)`,
//! capped at `max_cooldown`.  The ledger is persisted after every change so
//! restarting the process does not clear an active lockout.

use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{CipherSafeError, Result};
use crate::vault::persistence::write_atomic;

/// Default number of failures before the first lockout.
pub const DEFAULT_THRESHOLD: u32 = 5;

/// Lockout tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub threshold: u32,
    pub base_cooldown: Duration,
    pub max_cooldown: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            base_cooldown: Duration::from_secs(60),
            max_cooldown: Duration::from_secs(60 * 60),
        }
    }
}

impl LockoutPolicy {
    /// Cooldown owed after `failures` consecutive failures, if any.
    pub fn cooldown_for(&self, failures: u32) -> Option<Duration> {
        if self.threshold == 0 || failures < self.threshold {
            return None;
        }
        let excess = (failures - self.threshold).min(20);
        let cooldown = self
            .base_cooldown
            .checked_mul(1u32 << excess)
            .unwrap_or(self.max_cooldown);
        Some(cooldown.min(self.max_cooldown))
    }
}

/// Persisted failure counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutLedger {
    pub failed_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
}

/// Lockout tracker for one vault identity.
#[derive(Debug)]
pub struct Lockout {
    policy: LockoutPolicy,
    ledger: LockoutLedger,
    path: Option<PathBuf>,
}

impl Lockout {
    /// Tracker that lives only in memory.
    pub fn in_memory(policy: LockoutPolicy) -> Self {
        Self {
            policy,
            ledger: LockoutLedger::default(),
            path: None,
        }
    }

    /// Load the ledger at `path`; a missing file means no failures.
    pub fn load(path: &Path, policy: LockoutPolicy) -> Result<Self> {
        let ledger = match std::fs::read(path) {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                CipherSafeError::FormatError(format!("lockout ledger {}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => LockoutLedger::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            policy,
            ledger,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    pub fn ledger(&self) -> &LockoutLedger {
        &self.ledger
    }

    pub fn failed_attempts(&self) -> u32 {
        self.ledger.failed_attempts
    }

    /// Time left on an active lockout.
    pub fn remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let until = self.ledger.locked_until?;
        (until - now).to_std().ok().filter(|d| !d.is_zero())
    }

    /// Count one failure; returns the new lockout deadline, if any.
    pub fn record_failure(&mut self, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        self.ledger.failed_attempts = self.ledger.failed_attempts.saturating_add(1);
        self.ledger.last_failure = Some(now);
        self.ledger.locked_until = self
            .policy
            .cooldown_for(self.ledger.failed_attempts)
            .and_then(|cooldown| chrono::Duration::from_std(cooldown).ok())
            .map(|cooldown| now + cooldown);
        self.persist()?;
        Ok(self.ledger.locked_until)
    }

    /// Clear all counters after a successful unlock.
    pub fn reset(&mut self) -> Result<()> {
        if self.ledger == LockoutLedger::default() {
            return Ok(());
        }
        self.ledger = LockoutLedger::default();
        self.persist()
    }

    /// Remove the persisted ledger (vault wipe).
    pub fn destroy(&mut self) -> Result<()> {
        self.ledger = LockoutLedger::default();
        if let Some(path) = &self.path {
            match std::fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let bytes = serde_json::to_vec_pretty(&self.ledger)
            .map_err(|e| CipherSafeError::SerializationError(format!("lockout ledger: {e}")))?;
        write_atomic(path, &bytes)
    }
}

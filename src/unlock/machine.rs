//! The unlock state machine.
//!
//! ```text
//!            begin_attempt            succeed
//!  Locked ───────────────► Unlocking ─────────► Unlocked
//!    ▲  ▲                     │  │                 │
//!    │  └──── fail / abandon ─┘  │ fail past       │ lock / idle
//!    │                           │ threshold       │
//!    │      cooldown elapsed     ▼                 │
//!    └─────────────────────── LockedOut            │
//!    └─────────────────────────────────────────────┘
//!
//!  wipe: any state ──► Wiped (terminal)
//! ```
//!
//! The machine exclusively owns the `MasterKey` while unlocked.  Leaving
//! `Unlocked` drops the key under the state lock, and `MasterKey` zeroizes
//! itself on drop, so the key is gone before the transition returns.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::clock::Clock;
use super::lockout::Lockout;
use crate::crypto::keys::MasterKey;
use crate::errors::{CipherSafeError, Result};

/// Observable state, without key material.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnlockState {
    Locked,
    Unlocking,
    Unlocked,
    LockedOut { until: DateTime<Utc> },
    Wiped,
}

enum Phase {
    Locked,
    Unlocking,
    Unlocked {
        key: MasterKey,
        last_activity: DateTime<Utc>,
    },
    LockedOut {
        until: DateTime<Utc>,
    },
    Wiped,
}

struct Inner {
    phase: Phase,
    lockout: Lockout,
}

/// Governs access to the master key for one vault.
pub struct UnlockStateMachine {
    inner: Mutex<Inner>,
    clock: Arc<dyn Clock>,
    idle_timeout: Option<Duration>,
}

impl UnlockStateMachine {
    pub fn new(lockout: Lockout, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::Locked,
                lockout,
            }),
            clock,
            idle_timeout: None,
        }
    }

    /// Lock automatically after `timeout` without key use.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout.filter(|t| !t.is_zero());
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn state(&self) -> UnlockState {
        let mut inner = self.lock_inner();
        self.refresh(&mut inner);
        match &inner.phase {
            Phase::Locked => UnlockState::Locked,
            Phase::Unlocking => UnlockState::Unlocking,
            Phase::Unlocked { .. } => UnlockState::Unlocked,
            Phase::LockedOut { until } => UnlockState::LockedOut { until: *until },
            Phase::Wiped => UnlockState::Wiped,
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.state() == UnlockState::Unlocked
    }

    /// Consecutive failures since the last successful unlock.
    pub fn failed_attempts(&self) -> u32 {
        self.lock_inner().lockout.failed_attempts()
    }

    /// Enter `Unlocking`.  The returned guard must be resolved with
    /// `succeed`, `fail`, or `abandon`; dropping it unresolved counts as a
    /// failed attempt (a timed-out or cancelled unlock).
    pub fn begin_attempt(self: &Arc<Self>) -> Result<UnlockAttempt> {
        let mut inner = self.lock_inner();
        self.refresh(&mut inner);
        let now = self.clock.now();

        match &inner.phase {
            Phase::Wiped => return Err(CipherSafeError::VaultWiped),
            Phase::Unlocking => return Err(CipherSafeError::UnlockInProgress),
            Phase::Unlocked { .. } => return Err(CipherSafeError::AlreadyUnlocked),
            Phase::LockedOut { until } => {
                return Err(CipherSafeError::LockoutActive {
                    remaining: remaining_until(*until, now),
                })
            }
            Phase::Locked => {}
        }

        // A persisted lockout from a previous process still applies.
        if let Some(remaining) = inner.lockout.remaining(now) {
            let persisted_until = inner.lockout.ledger().locked_until;
            if let Some(until) = persisted_until {
                inner.phase = Phase::LockedOut { until };
            }
            return Err(CipherSafeError::LockoutActive { remaining });
        }

        inner.phase = Phase::Unlocking;
        Ok(UnlockAttempt {
            machine: Arc::clone(self),
            resolved: false,
        })
    }

    /// Move straight to `Unlocked` with a key the caller just created
    /// (vault setup or restore), bypassing any passphrase check.
    pub fn establish(&self, key: MasterKey) -> Result<()> {
        let mut inner = self.lock_inner();
        if matches!(inner.phase, Phase::Wiped) {
            return Err(CipherSafeError::VaultWiped);
        }
        if matches!(inner.phase, Phase::Unlocking) {
            return Err(CipherSafeError::UnlockInProgress);
        }
        inner.phase = Phase::Unlocked {
            key,
            last_activity: self.clock.now(),
        };
        Ok(())
    }

    /// `Unlocked → Locked`; the key is zeroized before this returns.
    /// Returns whether the vault was unlocked.
    pub fn lock(&self) -> bool {
        let mut inner = self.lock_inner();
        if matches!(inner.phase, Phase::Unlocked { .. }) {
            inner.phase = Phase::Locked;
            tracing::info!("vault locked");
            true
        } else {
            false
        }
    }

    /// Lock if the idle timeout has elapsed.  Returns whether it locked.
    pub fn lock_if_idle(&self) -> bool {
        let mut inner = self.lock_inner();
        let was_unlocked = matches!(inner.phase, Phase::Unlocked { .. });
        self.refresh(&mut inner);
        was_unlocked && !matches!(inner.phase, Phase::Unlocked { .. })
    }

    /// Irreversibly enter `Wiped`, dropping the key and the lockout ledger.
    pub fn wipe(&self) -> Result<()> {
        let mut inner = self.lock_inner();
        inner.phase = Phase::Wiped;
        inner.lockout.destroy()
    }

    /// Run `f` with the master key, refreshing the idle timer.
    pub fn with_key<T>(&self, f: impl FnOnce(&MasterKey) -> T) -> Result<T> {
        let mut inner = self.lock_inner();
        self.refresh(&mut inner);
        let now = self.clock.now();
        match &mut inner.phase {
            Phase::Unlocked { key, last_activity } => {
                *last_activity = now;
                Ok(f(key))
            }
            Phase::Wiped => Err(CipherSafeError::VaultWiped),
            _ => Err(CipherSafeError::VaultLocked),
        }
    }

    /// Check access without touching the key.
    pub fn ensure_unlocked(&self) -> Result<()> {
        self.with_key(|_| ())
    }

    // ------------------------------------------------------------------
    // Internal
    // ------------------------------------------------------------------

    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Apply time-driven transitions: cooldown expiry and idle lock.
    fn refresh(&self, inner: &mut Inner) {
        let now = self.clock.now();
        match &inner.phase {
            Phase::LockedOut { until } if *until <= now => {
                tracing::info!("lockout cooldown elapsed");
                inner.phase = Phase::Locked;
            }
            Phase::Unlocked { last_activity, .. } => {
                if let Some(timeout) = self.idle_timeout {
                    let idle = (now - *last_activity).to_std().unwrap_or_default();
                    if idle >= timeout {
                        tracing::info!(idle_secs = idle.as_secs(), "idle timeout, locking vault");
                        inner.phase = Phase::Locked;
                    }
                }
            }
            _ => {}
        }
    }

    fn resolve(&self, outcome: Resolution) -> UnlockState {
        let mut inner = self.lock_inner();
        if !matches!(inner.phase, Phase::Unlocking) {
            // Wiped (or otherwise moved on) while the attempt was running.
            return if matches!(inner.phase, Phase::Wiped) {
                UnlockState::Wiped
            } else {
                UnlockState::Locked
            };
        }

        let now = self.clock.now();
        match outcome {
            Resolution::Success(key) => {
                if let Err(e) = inner.lockout.reset() {
                    tracing::warn!("could not clear lockout ledger: {e}");
                }
                inner.phase = Phase::Unlocked {
                    key,
                    last_activity: now,
                };
                tracing::info!("vault unlocked");
                UnlockState::Unlocked
            }
            Resolution::Abandon => {
                inner.phase = Phase::Locked;
                UnlockState::Locked
            }
            Resolution::Failure => {
                let deadline = match inner.lockout.record_failure(now) {
                    Ok(deadline) => deadline,
                    Err(e) => {
                        tracing::warn!("could not persist lockout ledger: {e}");
                        inner.lockout.ledger().locked_until
                    }
                };
                let attempts = inner.lockout.failed_attempts();
                match deadline {
                    Some(until) => {
                        tracing::warn!(attempts, %until, "too many failed unlock attempts, locked out");
                        inner.phase = Phase::LockedOut { until };
                        UnlockState::LockedOut { until }
                    }
                    None => {
                        tracing::warn!(attempts, "unlock attempt failed");
                        inner.phase = Phase::Locked;
                        UnlockState::Locked
                    }
                }
            }
        }
    }
}

enum Resolution {
    Success(MasterKey),
    Failure,
    Abandon,
}

fn remaining_until(until: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    (until - now).to_std().unwrap_or_default()
}

// ---------------------------------------------------------------------------
// UnlockAttempt
// ---------------------------------------------------------------------------

/// An in-flight unlock.  See `UnlockStateMachine::begin_attempt`.
pub struct UnlockAttempt {
    machine: Arc<UnlockStateMachine>,
    resolved: bool,
}

impl UnlockAttempt {
    /// The key was recovered: `Unlocking → Unlocked`, counters reset.
    pub fn succeed(mut self, key: MasterKey) -> UnlockState {
        self.resolved = true;
        self.machine.resolve(Resolution::Success(key))
    }

    /// Authentication failed: count it, possibly entering `LockedOut`.
    pub fn fail(mut self) -> UnlockState {
        self.resolved = true;
        self.machine.resolve(Resolution::Failure)
    }

    /// The attempt never reached a credential check (user cancelled the
    /// prompt, hardware missing, unreadable container): back to `Locked`
    /// without counting.
    pub fn abandon(mut self) -> UnlockState {
        self.resolved = true;
        self.machine.resolve(Resolution::Abandon)
    }
}

impl Drop for UnlockAttempt {
    fn drop(&mut self) {
        if !self.resolved {
            tracing::debug!("unlock attempt dropped before completion");
            self.machine.resolve(Resolution::Failure);
        }
    }
}

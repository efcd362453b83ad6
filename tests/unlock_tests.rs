//! Integration tests for lockout, idle locking, and unlock timeouts.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{TimeZone, Utc};
use ciphersafe::crypto::kdf::KdfParams;
use ciphersafe::crypto::{
    BiometricAuthenticator, BiometricOutcome, HardwareKey, ProofToken, SoftwareBiometric,
};
use ciphersafe::errors::CipherSafeError;
use ciphersafe::unlock::{Clock, Lockout, LockoutPolicy, ManualClock, UnlockState};
use ciphersafe::vault::{ContainerPersistence, FilePersistence, NewRecord, RecordFilter, Vault, VaultOptions};
use tempfile::TempDir;

fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()))
}

fn options(clock: &Arc<ManualClock>) -> VaultOptions {
    let clock: Arc<dyn Clock> = clock.clone();
    VaultOptions {
        kdf: KdfParams::minimum(),
        clock,
        ..VaultOptions::new("device-a")
    }
}

fn policy() -> LockoutPolicy {
    LockoutPolicy {
        threshold: 3,
        base_cooldown: Duration::from_secs(60),
        max_cooldown: Duration::from_secs(600),
    }
}

fn persistence(dir: &TempDir) -> Arc<dyn ContainerPersistence> {
    Arc::new(FilePersistence::new(dir.path().join("default.csafe")))
}

#[tokio::test]
async fn three_failures_lock_out_until_cooldown_elapses() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let vault = Vault::create(persistence(&dir), Lockout::in_memory(policy()), b"P1", options(&clock))
        .await
        .unwrap();
    vault.lock().await;

    for expected in 1..=3 {
        assert!(matches!(
            vault.unlock_with_passphrase(b"wrong").await,
            Err(CipherSafeError::AuthenticationFailure)
        ));
        assert_eq!(vault.failed_attempts(), expected);
    }
    assert!(matches!(vault.state(), UnlockState::LockedOut { .. }));

    // Even the right passphrase is refused during the cooldown.
    match vault.unlock_with_passphrase(b"P1").await {
        Err(CipherSafeError::LockoutActive { remaining }) => {
            assert!(remaining <= Duration::from_secs(60));
            assert!(remaining > Duration::ZERO);
        }
        other => panic!("expected lockout, got {other:?}"),
    }
    assert_eq!(vault.failed_attempts(), 3);

    clock.advance(Duration::from_secs(61));
    assert_eq!(vault.state(), UnlockState::Locked);
    vault.unlock_with_passphrase(b"P1").await.unwrap();
    assert_eq!(vault.failed_attempts(), 0);
}

#[tokio::test]
async fn failure_past_threshold_doubles_cooldown() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let vault = Vault::create(persistence(&dir), Lockout::in_memory(policy()), b"P1", options(&clock))
        .await
        .unwrap();
    vault.lock().await;

    for _ in 0..3 {
        let _ = vault.unlock_with_passphrase(b"wrong").await;
    }
    clock.advance(Duration::from_secs(61));
    let _ = vault.unlock_with_passphrase(b"wrong").await;

    let UnlockState::LockedOut { until } = vault.state() else {
        panic!("expected lockout after a fourth failure");
    };
    assert_eq!((until - clock.now()).num_seconds(), 120);
}

#[tokio::test]
async fn lockout_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let ledger = dir.path().join("default.lockout.json");
    let clock = clock();
    {
        let vault = Vault::create(
            persistence(&dir),
            Lockout::load(&ledger, policy()).unwrap(),
            b"P1",
            options(&clock),
        )
        .await
        .unwrap();
        vault.lock().await;
        for _ in 0..3 {
            let _ = vault.unlock_with_passphrase(b"wrong").await;
        }
    }
    assert!(ledger.exists());

    let reopened = Vault::open(
        persistence(&dir),
        Lockout::load(&ledger, policy()).unwrap(),
        options(&clock),
    )
    .await
    .unwrap();
    assert_eq!(reopened.failed_attempts(), 3);
    assert!(matches!(
        reopened.unlock_with_passphrase(b"P1").await,
        Err(CipherSafeError::LockoutActive { .. })
    ));

    clock.advance(Duration::from_secs(61));
    reopened.unlock_with_passphrase(b"P1").await.unwrap();
    assert_eq!(Lockout::load(&ledger, policy()).unwrap().failed_attempts(), 0);
}

#[tokio::test]
async fn idle_vault_locks_and_drops_records() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let opts = VaultOptions {
        idle_timeout: Some(Duration::from_secs(300)),
        ..options(&clock)
    };
    let vault = Vault::create(persistence(&dir), Lockout::in_memory(policy()), b"P1", opts)
        .await
        .unwrap();
    vault.store().create(NewRecord::new("Bank")).await.unwrap();
    vault.store().commit().await.unwrap();

    // Use keeps the vault open.
    clock.advance(Duration::from_secs(240));
    assert_eq!(vault.store().counts().await.unwrap().live, 1);
    clock.advance(Duration::from_secs(240));
    assert!(!vault.lock_if_idle().await);
    assert_eq!(vault.state(), UnlockState::Unlocked);

    clock.advance(Duration::from_secs(301));
    assert!(vault.lock_if_idle().await);
    assert_eq!(vault.state(), UnlockState::Locked);
    assert!(matches!(
        vault.store().list(&RecordFilter::all()).await,
        Err(CipherSafeError::VaultLocked)
    ));
    // Idle locking is not a failed attempt.
    assert_eq!(vault.failed_attempts(), 0);
}

#[tokio::test]
async fn slow_key_derivation_counts_as_failed_attempt() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let slow = VaultOptions {
        kdf: KdfParams {
            memory_kib: 32_768,
            iterations: 2,
            parallelism: 1,
        },
        unlock_timeout: Duration::ZERO,
        ..options(&clock)
    };
    let vault = Vault::create(persistence(&dir), Lockout::in_memory(policy()), b"P1", slow)
        .await
        .unwrap();
    vault.lock().await;

    assert!(matches!(
        vault.unlock_with_passphrase(b"P1").await,
        Err(CipherSafeError::UnlockTimedOut(_))
    ));
    assert_eq!(vault.failed_attempts(), 1);
    assert_eq!(vault.state(), UnlockState::Locked);

    let patient = Vault::open(persistence(&dir), Lockout::in_memory(policy()), options(&clock))
        .await
        .unwrap();
    patient.unlock_with_passphrase(b"P1").await.unwrap();
}

/// Sensor that holds the platform prompt open for `delay_ms`.
struct SlowSensor {
    inner: SoftwareBiometric,
    delay_ms: AtomicU64,
}

impl BiometricAuthenticator for SlowSensor {
    fn request_proof(&self) -> BiometricOutcome {
        std::thread::sleep(Duration::from_millis(self.delay_ms.load(Ordering::SeqCst)));
        self.inner.request_proof()
    }

    fn key_handle(&self, proof: &ProofToken) -> ciphersafe::errors::Result<Box<dyn HardwareKey>> {
        self.inner.key_handle(proof)
    }
}

#[tokio::test]
async fn slow_biometric_prompt_counts_as_failed_attempt() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let opts = VaultOptions {
        unlock_timeout: Duration::from_millis(100),
        ..options(&clock)
    };
    let vault = Vault::create(persistence(&dir), Lockout::in_memory(policy()), b"P1", opts)
        .await
        .unwrap();
    let sensor = Arc::new(SlowSensor {
        inner: SoftwareBiometric::new(),
        delay_ms: AtomicU64::new(0),
    });
    vault.enroll_biometric(sensor.as_ref()).await.unwrap();
    vault.lock().await;

    sensor.delay_ms.store(1_500, Ordering::SeqCst);
    let started = Instant::now();
    assert!(matches!(
        vault.unlock_with_biometric(sensor.clone()).await,
        Err(CipherSafeError::UnlockTimedOut(_))
    ));
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(vault.failed_attempts(), 1);
    assert_eq!(vault.state(), UnlockState::Locked);

    sensor.delay_ms.store(0, Ordering::SeqCst);
    vault.unlock_with_biometric(sensor).await.unwrap();
    assert_eq!(vault.failed_attempts(), 0);
}

#[tokio::test]
async fn one_attempt_at_a_time() {
    let dir = TempDir::new().unwrap();
    let clock = clock();
    let vault = Vault::create(persistence(&dir), Lockout::in_memory(policy()), b"P1", options(&clock))
        .await
        .unwrap();

    assert!(matches!(
        vault.unlock_with_passphrase(b"P1").await,
        Err(CipherSafeError::AlreadyUnlocked)
    ));
    vault.lock().await;

    let pending = vault.machine().begin_attempt().unwrap();
    assert_eq!(vault.state(), UnlockState::Unlocking);
    assert!(matches!(
        vault.unlock_with_passphrase(b"P1").await,
        Err(CipherSafeError::UnlockInProgress)
    ));

    // Dropped without an outcome: an interrupted unlock is a failure.
    drop(pending);
    assert_eq!(vault.failed_attempts(), 1);
    assert_eq!(vault.state(), UnlockState::Locked);

    let abandoned = vault.machine().begin_attempt().unwrap();
    abandoned.abandon();
    assert_eq!(vault.failed_attempts(), 1);

    vault.unlock_with_passphrase(b"P1").await.unwrap();
    assert_eq!(vault.failed_attempts(), 0);
}

#[tokio::test]
async fn wipe_during_lockout_is_allowed() {
    let dir = TempDir::new().unwrap();
    let ledger = dir.path().join("default.lockout.json");
    let clock = clock();
    let vault = Vault::create(
        persistence(&dir),
        Lockout::load(&ledger, policy()).unwrap(),
        b"P1",
        options(&clock),
    )
    .await
    .unwrap();
    vault.lock().await;
    for _ in 0..3 {
        let _ = vault.unlock_with_passphrase(b"wrong").await;
    }

    vault.wipe().await.unwrap();
    assert_eq!(vault.state(), UnlockState::Wiped);
    assert!(!ledger.exists());
    assert!(!dir.path().join("default.csafe").exists());
}

//! Biometric unlock capability.
//!
//! The platform prompt is an external collaborator.  The core only sees
//! the outcome of `request_proof` and, for a valid proof, a handle to a
//! hardware-backed key that can seal/open data.  Raw biometric data and
//! the hardware key itself never reach this crate.

use std::sync::Mutex;

use rand::RngCore;
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::encryption::{decrypt, encrypt};
use super::keys::KEY_LEN;
use crate::errors::{CipherSafeError, Result};

/// Opaque proof that the user passed the platform biometric prompt.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ProofToken(Vec<u8>);

impl ProofToken {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl std::fmt::Debug for ProofToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ProofToken(<opaque>)")
    }
}

/// Result of asking the platform for a biometric proof.
#[derive(Debug)]
pub enum BiometricOutcome {
    Proof(ProofToken),
    UserCancelled,
    HardwareUnavailable,
}

/// A key that lives in secure hardware.
pub trait HardwareKey: Send {
    /// Seal `plaintext` binding `aad`.
    fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>>;

    /// Open data produced by `seal`; fails with `AuthenticationFailure`
    /// on any mismatch.
    fn open(&self, sealed: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>>;
}

/// Platform biometric capability consumed by the unlock path.
pub trait BiometricAuthenticator: Send + Sync {
    /// Show the platform prompt and report its outcome.
    fn request_proof(&self) -> BiometricOutcome;

    /// Exchange a proof for a handle to the hardware-backed key.
    fn key_handle(&self, proof: &ProofToken) -> Result<Box<dyn HardwareKey>>;
}

// ---------------------------------------------------------------------------
// Software implementation
// ---------------------------------------------------------------------------

/// How `SoftwareBiometric` answers the next prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoftwarePromptMode {
    /// Issue a valid proof.
    Approve,
    /// Behave as if the user dismissed the prompt.
    Cancel,
    /// Behave as if no sensor is present.
    Unavailable,
    /// Issue a proof that unlocks a different (wrong) hardware key.
    Mismatch,
}

/// Software stand-in for a secure-element biometric key.
///
/// Intended for desktop builds without biometric hardware and for tests.
/// The "hardware" key lives in process memory and is zeroized on drop.
pub struct SoftwareBiometric {
    hardware_key: Zeroizing<[u8; KEY_LEN]>,
    expected_proof: Zeroizing<Vec<u8>>,
    mode: Mutex<SoftwarePromptMode>,
}

impl SoftwareBiometric {
    pub fn new() -> Self {
        let mut hardware_key = Zeroizing::new([0u8; KEY_LEN]);
        rand::rng().fill_bytes(&mut hardware_key[..]);
        let mut proof = vec![0u8; 32];
        rand::rng().fill_bytes(&mut proof);
        Self {
            hardware_key,
            expected_proof: Zeroizing::new(proof),
            mode: Mutex::new(SoftwarePromptMode::Approve),
        }
    }

    /// Change how subsequent prompts are answered.
    pub fn set_mode(&self, mode: SoftwarePromptMode) {
        if let Ok(mut guard) = self.mode.lock() {
            *guard = mode;
        }
    }

    fn mode(&self) -> SoftwarePromptMode {
        self.mode
            .lock()
            .map(|guard| *guard)
            .unwrap_or(SoftwarePromptMode::Unavailable)
    }
}

impl Default for SoftwareBiometric {
    fn default() -> Self {
        Self::new()
    }
}

impl BiometricAuthenticator for SoftwareBiometric {
    fn request_proof(&self) -> BiometricOutcome {
        match self.mode() {
            SoftwarePromptMode::Approve => {
                BiometricOutcome::Proof(ProofToken::new(self.expected_proof.to_vec()))
            }
            SoftwarePromptMode::Mismatch => {
                let mut other = vec![0u8; 32];
                rand::rng().fill_bytes(&mut other);
                BiometricOutcome::Proof(ProofToken::new(other))
            }
            SoftwarePromptMode::Cancel => BiometricOutcome::UserCancelled,
            SoftwarePromptMode::Unavailable => BiometricOutcome::HardwareUnavailable,
        }
    }

    fn key_handle(&self, proof: &ProofToken) -> Result<Box<dyn HardwareKey>> {
        let valid: bool = proof.as_bytes().ct_eq(&self.expected_proof).into();
        if valid {
            return Ok(Box::new(SoftwareKey {
                key: self.hardware_key.clone(),
            }));
        }
        // An unknown proof still gets a handle, but to a key that cannot
        // open anything sealed by the enrolled one.
        let mut unrelated = Zeroizing::new([0u8; KEY_LEN]);
        rand::rng().fill_bytes(&mut unrelated[..]);
        Ok(Box::new(SoftwareKey { key: unrelated }))
    }
}

struct SoftwareKey {
    key: Zeroizing<[u8; KEY_LEN]>,
}

impl HardwareKey for SoftwareKey {
    fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        encrypt(&self.key[..], plaintext, aad)
    }

    fn open(&self, sealed: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        decrypt(&self.key[..], sealed, aad).map(Zeroizing::new)
    }
}

/// Turn a non-proof outcome into the matching error.
pub fn outcome_error(outcome: &BiometricOutcome) -> Option<CipherSafeError> {
    match outcome {
        BiometricOutcome::Proof(_) => None,
        BiometricOutcome::UserCancelled => Some(CipherSafeError::BiometricCancelled),
        BiometricOutcome::HardwareUnavailable => Some(CipherSafeError::BiometricUnavailable),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proof(auth: &SoftwareBiometric) -> ProofToken {
        match auth.request_proof() {
            BiometricOutcome::Proof(token) => token,
            other => panic!("expected proof, got {other:?}"),
        }
    }

    #[test]
    fn approved_proof_opens_what_it_sealed() {
        let auth = SoftwareBiometric::new();
        let handle = auth.key_handle(&proof(&auth)).unwrap();
        let sealed = handle.seal(b"key", b"aad").unwrap();

        let again = auth.key_handle(&proof(&auth)).unwrap();
        assert_eq!(again.open(&sealed, b"aad").unwrap().as_slice(), b"key");
    }

    #[test]
    fn mismatched_proof_cannot_open() {
        let auth = SoftwareBiometric::new();
        let sealed = auth
            .key_handle(&proof(&auth))
            .unwrap()
            .seal(b"key", b"aad")
            .unwrap();

        auth.set_mode(SoftwarePromptMode::Mismatch);
        let wrong = auth.key_handle(&proof(&auth)).unwrap();
        assert!(matches!(
            wrong.open(&sealed, b"aad"),
            Err(CipherSafeError::AuthenticationFailure)
        ));
    }

    #[test]
    fn cancel_and_unavailable_map_to_errors() {
        let auth = SoftwareBiometric::new();
        auth.set_mode(SoftwarePromptMode::Cancel);
        assert!(matches!(
            outcome_error(&auth.request_proof()),
            Some(CipherSafeError::BiometricCancelled)
        ));
        auth.set_mode(SoftwarePromptMode::Unavailable);
        assert!(matches!(
            outcome_error(&auth.request_proof()),
            Some(CipherSafeError::BiometricUnavailable)
        ));
    }
}

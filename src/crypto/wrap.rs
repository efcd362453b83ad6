//! Master-key wrapping.
//!
//! The random master key is stored only inside key slots.  Each slot
//! independently wraps the same master key:
//!
//! ```text
//! Argon2id(passphrase, salt) ──► wraps ──► master key
//! hardware key (biometric)   ──► wraps ──► master key (same)
//! ```
//!
//! Every slot kind binds a distinct associated-data tag into the AEAD so a
//! passphrase slot can never be unwrapped as a biometric slot.  Unwrap
//! verifies the tag before any key byte is returned: a wrong derivation
//! input yields `AuthenticationFailure`, never a garbage key.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::biometric::HardwareKey;
use super::encryption::{decrypt, encrypt};
use super::kdf::{derive_key, generate_salt, KdfParams, KEY_LEN, SALT_LEN};
use super::keys::MasterKey;
use crate::errors::{CipherSafeError, Result};
use crate::vault::format::{base64_decode, base64_encode};

/// Unlock method a slot belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Passphrase,
    Biometric,
}

impl SlotKind {
    fn aad(self) -> &'static [u8] {
        match self {
            Self::Passphrase => b"ciphersafe-slot:passphrase:v1",
            Self::Biometric => b"ciphersafe-slot:biometric:v1",
        }
    }
}

/// A master key sealed under some wrapping key (nonce || ciphertext || tag).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrappedKey {
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub sealed: Vec<u8>,
}

/// Wrap `master` under a 32-byte `wrapping_key`.
pub(crate) fn wrap(master: &MasterKey, wrapping_key: &[u8; KEY_LEN], kind: SlotKind) -> Result<WrappedKey> {
    let sealed = encrypt(wrapping_key, master.as_bytes(), kind.aad())?;
    Ok(WrappedKey { sealed })
}

/// Unwrap a `WrappedKey`, authenticating before returning key material.
///
/// Only reachable through the unlock paths of `Vault`, which count
/// failures toward lockout.
pub(crate) fn unwrap(wrapped: &WrappedKey, wrapping_key: &[u8; KEY_LEN], kind: SlotKind) -> Result<MasterKey> {
    let plain = Zeroizing::new(decrypt(wrapping_key, &wrapped.sealed, kind.aad())?);
    MasterKey::from_slice(&plain)
}

// ---------------------------------------------------------------------------
// Passphrase slot
// ---------------------------------------------------------------------------

/// Passphrase key slot: salt + KDF work factor + wrapped master key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassphraseSlot {
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub salt: Vec<u8>,
    pub kdf: KdfParams,
    pub wrapped: WrappedKey,
    /// Number of passphrase changes behind this slot.  Replicas that
    /// disagree keep the slot with the higher generation.
    #[serde(default)]
    pub generation: u64,
}

impl PassphraseSlot {
    /// Seal `master` under a key derived from `passphrase` with a fresh salt.
    pub fn seal(master: &MasterKey, passphrase: &[u8], kdf: KdfParams) -> Result<Self> {
        let salt = generate_salt();
        let wrapping_key = derive_key(passphrase, &salt, &kdf)?;
        let wrapped = wrap(master, &wrapping_key, SlotKind::Passphrase)?;
        Ok(Self {
            salt: salt.to_vec(),
            kdf,
            wrapped,
            generation: 0,
        })
    }

    /// Seal a replacement for this slot under a new passphrase.
    pub fn rotate(&self, master: &MasterKey, passphrase: &[u8], kdf: KdfParams) -> Result<Self> {
        let mut next = Self::seal(master, passphrase, kdf)?;
        next.generation = self.generation + 1;
        Ok(next)
    }

    /// Whether this slot should replace `other` when two replicas disagree.
    ///
    /// Higher generation wins; equal generations fall back to the salt so
    /// both sides pick the same slot.
    pub fn supersedes(&self, other: &Self) -> bool {
        (self.generation, &self.salt) > (other.generation, &other.salt)
    }

    /// Run the (expensive) KDF for this slot.
    pub fn derive_wrapping_key(&self, passphrase: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        if self.salt.len() != SALT_LEN {
            return Err(CipherSafeError::FormatError(format!(
                "passphrase slot salt has {} bytes, expected {SALT_LEN}",
                self.salt.len()
            )));
        }
        derive_key(passphrase, &self.salt, &self.kdf)
    }

    /// Unwrap with an already-derived wrapping key.
    pub(crate) fn unwrap_with(&self, wrapping_key: &[u8; KEY_LEN]) -> Result<MasterKey> {
        unwrap(&self.wrapped, wrapping_key, SlotKind::Passphrase)
    }
}

// ---------------------------------------------------------------------------
// Biometric slot
// ---------------------------------------------------------------------------

/// Biometric key slot: master key sealed by a hardware-backed key.
///
/// The hardware key never leaves the secure element; only its opaque
/// output is stored here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BiometricSlot {
    pub wrapped: WrappedKey,
}

impl BiometricSlot {
    /// Seal `master` with a hardware key handle.
    pub fn seal(master: &MasterKey, hardware: &dyn HardwareKey) -> Result<Self> {
        let sealed = hardware.seal(master.as_bytes(), SlotKind::Biometric.aad())?;
        Ok(Self {
            wrapped: WrappedKey { sealed },
        })
    }

    /// Ask the hardware key handle to unwrap the master key.
    pub(crate) fn open(&self, hardware: &dyn HardwareKey) -> Result<MasterKey> {
        let plain = hardware.open(&self.wrapped.sealed, SlotKind::Biometric.aad())?;
        MasterKey::from_slice(&plain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::biometric::{
        BiometricAuthenticator, BiometricOutcome, SoftwareBiometric, SoftwarePromptMode,
    };

    fn open(slot: &PassphraseSlot, passphrase: &[u8]) -> Result<MasterKey> {
        let wrapping_key = slot.derive_wrapping_key(passphrase)?;
        slot.unwrap_with(&wrapping_key)
    }

    #[test]
    fn passphrase_slot_roundtrip() {
        let master = MasterKey::generate();
        let slot = PassphraseSlot::seal(&master, b"P1", KdfParams::minimum()).unwrap();
        let opened = open(&slot, b"P1").unwrap();
        assert_eq!(opened.as_bytes(), master.as_bytes());
        assert_eq!(slot.generation, 0);
    }

    #[test]
    fn wrong_passphrase_is_authentication_failure() {
        let master = MasterKey::generate();
        let slot = PassphraseSlot::seal(&master, b"P1", KdfParams::minimum()).unwrap();
        let err = open(&slot, b"P2").unwrap_err();
        assert!(matches!(err, CipherSafeError::AuthenticationFailure));
    }

    #[test]
    fn wrap_unwrap_with_derived_key() {
        let master = MasterKey::generate();
        let salt = generate_salt();
        let key = derive_key(b"P1", &salt, &KdfParams::minimum()).unwrap();
        let wrapped = wrap(&master, &key, SlotKind::Passphrase).unwrap();
        let back = unwrap(&wrapped, &key, SlotKind::Passphrase).unwrap();
        assert_eq!(back.as_bytes(), master.as_bytes());

        let other = derive_key(b"P2", &salt, &KdfParams::minimum()).unwrap();
        let err = unwrap(&wrapped, &other, SlotKind::Passphrase).unwrap_err();
        assert!(matches!(err, CipherSafeError::AuthenticationFailure));
    }

    #[test]
    fn rotated_slot_supersedes_its_predecessor() {
        let master = MasterKey::generate();
        let first = PassphraseSlot::seal(&master, b"P1", KdfParams::minimum()).unwrap();
        let second = first.rotate(&master, b"P2", KdfParams::minimum()).unwrap();

        assert_eq!(second.generation, 1);
        assert!(second.supersedes(&first));
        assert!(!first.supersedes(&second));
        assert!(!second.supersedes(&second));
        assert_eq!(open(&second, b"P2").unwrap().as_bytes(), master.as_bytes());
        assert!(open(&second, b"P1").is_err());
    }

    #[test]
    fn equal_generations_pick_the_same_winner_on_both_sides() {
        let master = MasterKey::generate();
        let base = PassphraseSlot::seal(&master, b"P1", KdfParams::minimum()).unwrap();
        let a = base.rotate(&master, b"A", KdfParams::minimum()).unwrap();
        let b = base.rotate(&master, b"B", KdfParams::minimum()).unwrap();
        assert_ne!(a.supersedes(&b), b.supersedes(&a));
    }

    #[test]
    fn slots_without_generation_deserialize_as_zero() {
        let master = MasterKey::generate();
        let slot = PassphraseSlot::seal(&master, b"P1", KdfParams::minimum()).unwrap();
        let mut json = serde_json::to_value(&slot).unwrap();
        json.as_object_mut().unwrap().remove("generation");
        let back: PassphraseSlot = serde_json::from_value(json).unwrap();
        assert_eq!(back, slot);
    }

    #[test]
    fn biometric_slot_opens_only_with_enrolled_hardware_key() {
        let master = MasterKey::generate();
        let sensor = SoftwareBiometric::new();
        let BiometricOutcome::Proof(proof) = sensor.request_proof() else {
            panic!("software sensor should grant a proof");
        };
        let handle = sensor.key_handle(&proof).unwrap();
        let slot = BiometricSlot::seal(&master, handle.as_ref()).unwrap();
        assert_eq!(slot.open(handle.as_ref()).unwrap().as_bytes(), master.as_bytes());

        sensor.set_mode(SoftwarePromptMode::Mismatch);
        let BiometricOutcome::Proof(proof) = sensor.request_proof() else {
            panic!("mismatch mode still issues a proof");
        };
        let other = sensor.key_handle(&proof).unwrap();
        assert!(matches!(
            slot.open(other.as_ref()),
            Err(CipherSafeError::AuthenticationFailure)
        ));
    }

    #[test]
    fn slot_kinds_are_not_interchangeable() {
        let master = MasterKey::generate();
        let wrapping = [5u8; KEY_LEN];
        let wrapped = wrap(&master, &wrapping, SlotKind::Passphrase).unwrap();
        let err = unwrap(&wrapped, &wrapping, SlotKind::Biometric).unwrap_err();
        assert!(matches!(err, CipherSafeError::AuthenticationFailure));
    }

    #[test]
    fn each_seal_uses_fresh_salt() {
        let master = MasterKey::generate();
        let a = PassphraseSlot::seal(&master, b"P1", KdfParams::minimum()).unwrap();
        let b = PassphraseSlot::seal(&master, b"P1", KdfParams::minimum()).unwrap();
        assert_ne!(a.salt, b.salt);
        assert_ne!(a.wrapped, b.wrapped);
    }
}

//! Cryptographic primitives for CipherSafe.
//!
//! This module provides:
//! - AES-256-GCM encryption and decryption with associated data (`encryption`)
//! - Argon2id passphrase key derivation (`kdf`)
//! - The master key and its HKDF sub-keys (`keys`)
//! - Passphrase and biometric key slots (`wrap`)
//! - The biometric capability interface (`biometric`)

pub mod biometric;
pub mod encryption;
pub mod kdf;
pub mod keys;
pub mod wrap;

// Re-export the most commonly used items so callers can write:
//   use crate::crypto::{encrypt, decrypt, derive_key, ...};
pub use biometric::{
    BiometricAuthenticator, BiometricOutcome, HardwareKey, ProofToken, SoftwareBiometric,
    SoftwarePromptMode,
};
pub use encryption::{decrypt, encrypt};
pub use kdf::{derive_key, generate_salt, KdfParams};
pub use keys::MasterKey;
pub use wrap::{BiometricSlot, PassphraseSlot, SlotKind, WrappedKey};

//! The vault master key and the sub-keys derived from it.
//!
//! The master key is 256 random bits generated once at vault setup.  It
//! never leaves memory in plaintext: on disk it only exists wrapped inside
//! a key slot.  HKDF-SHA256 derives purpose-bound sub-keys from it:
//! - the **record key** that encrypts the record blob, and
//! - the **content MAC key** used to fingerprint the plaintext record set.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::errors::{CipherSafeError, Result};

/// Length of the master key and derived sub-keys (256 bits).
pub const KEY_LEN: usize = 32;

/// A 32-byte master key that zeroes its memory when dropped.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Create a new `MasterKey` from raw bytes.
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Generate a fresh random master key.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::rng().fill_bytes(&mut bytes);
        let key = Self::new(bytes);
        bytes.zeroize();
        key
    }

    /// Rebuild a key from an unwrapped slice, rejecting wrong lengths.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            CipherSafeError::FormatError(format!(
                "unwrapped key has {} bytes, expected {KEY_LEN}",
                bytes.len()
            ))
        })?;
        Ok(Self::new(array))
    }

    /// Access the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Key used to encrypt the record blob.
    pub fn record_key(&self) -> Result<Zeroizing<[u8; KEY_LEN]>> {
        hkdf_derive(&self.bytes, b"ciphersafe-record-key")
    }

    /// HMAC-SHA256 over `data` with the content MAC sub-key.
    pub fn content_mac(&self, data: &[u8]) -> Result<[u8; 32]> {
        let mac_key = hkdf_derive(&self.bytes, b"ciphersafe-content-mac")?;
        let mut mac = Hmac::<Sha256>::new_from_slice(&mac_key[..])
            .map_err(|e| CipherSafeError::KeyDerivationFailed(format!("HMAC init: {e}")))?;
        mac.update(data);
        let mut out = [0u8; 32];
        out.copy_from_slice(&mac.finalize().into_bytes());
        Ok(out)
    }

    /// Copy the key for handing to another owner (e.g. the state machine
    /// after a fresh setup).
    pub fn duplicate(&self) -> Self {
        Self::new(self.bytes)
    }
}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// Run HKDF-SHA256 expand with the given `info`.
///
/// The master key already has full entropy, so no salt is used.
fn hkdf_derive(ikm: &[u8], info: &[u8]) -> Result<Zeroizing<[u8; KEY_LEN]>> {
    let hk = Hkdf::<Sha256>::new(None, ikm);

    let mut okm = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(info, &mut okm[..])
        .map_err(|e| CipherSafeError::KeyDerivationFailed(format!("HKDF expand failed: {e}")))?;

    Ok(okm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        assert_ne!(MasterKey::generate().as_bytes(), MasterKey::generate().as_bytes());
    }

    #[test]
    fn sub_keys_are_domain_separated() {
        let key = MasterKey::new([9u8; KEY_LEN]);
        let record = key.record_key().unwrap();
        assert_ne!(&record[..], &key.as_bytes()[..]);
        assert_ne!(key.content_mac(b"a").unwrap(), key.content_mac(b"b").unwrap());
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        assert!(MasterKey::from_slice(&[0u8; 16]).is_err());
        assert!(MasterKey::from_slice(&[0u8; 32]).is_ok());
    }

    #[test]
    fn debug_does_not_print_bytes() {
        let key = MasterKey::new([0xAB; KEY_LEN]);
        assert_eq!(format!("{key:?}"), "MasterKey(<redacted>)");
    }
}

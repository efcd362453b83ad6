//! Record codec: the full record set ⇄ one authenticated-encrypted blob.
//!
//! Blob layout:
//!
//! ```text
//! [codec version: 1 byte][nonce: 12 bytes][ciphertext + GCM tag]
//! ```
//!
//! The plaintext is the canonical JSON encoding of the record set (records
//! sorted by id).  The codec version byte is appended to the caller's
//! associated data, so it cannot be swapped without failing authentication.
//! A fresh nonce is drawn on every `encode`.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::record::CredentialRecord;
use crate::crypto::encryption::{decrypt, encrypt, NONCE_LEN, TAG_LEN};
use crate::crypto::keys::MasterKey;
use crate::errors::{CipherSafeError, Result};

/// Current record-set encoding.
pub const CODEC_VERSION: u8 = 1;

#[derive(Serialize)]
struct RecordSetRef<'a> {
    records: Vec<&'a CredentialRecord>,
}

#[derive(Deserialize)]
struct RecordSetV1 {
    records: Vec<CredentialRecord>,
}

/// Canonical plaintext for a record set, independent of input order.
pub fn canonical_bytes(records: &[CredentialRecord]) -> Result<Zeroizing<Vec<u8>>> {
    let mut sorted: Vec<&CredentialRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.id);
    serde_json::to_vec(&RecordSetRef { records: sorted })
        .map(Zeroizing::new)
        .map_err(|e| CipherSafeError::SerializationError(format!("record set: {e}")))
}

/// Encrypt a record set under the master key's record sub-key.
pub fn encode(records: &[CredentialRecord], key: &MasterKey, aad: &[u8]) -> Result<Vec<u8>> {
    let plaintext = canonical_bytes(records)?;
    seal_plaintext(&plaintext, key, aad)
}

/// Encrypt already-canonical plaintext.
pub(crate) fn seal_plaintext(plaintext: &[u8], key: &MasterKey, aad: &[u8]) -> Result<Vec<u8>> {
    let record_key = key.record_key()?;
    let sealed = encrypt(&record_key[..], plaintext, &bound_aad(aad, CODEC_VERSION))?;

    let mut blob = Vec::with_capacity(1 + sealed.len());
    blob.push(CODEC_VERSION);
    blob.extend_from_slice(&sealed);
    Ok(blob)
}

/// Decrypt a blob to its canonical plaintext.
pub(crate) fn open_plaintext(blob: &[u8], key: &MasterKey, aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    let (&version, sealed) = blob
        .split_first()
        .ok_or_else(|| CipherSafeError::FormatError("record blob is empty".into()))?;
    if version != CODEC_VERSION {
        return Err(CipherSafeError::FormatError(format!(
            "unsupported record codec version {version}, expected {CODEC_VERSION}"
        )));
    }
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CipherSafeError::FormatError("record blob is truncated".into()));
    }

    let record_key = key.record_key()?;
    decrypt(&record_key[..], sealed, &bound_aad(aad, version)).map(Zeroizing::new)
}

/// Parse canonical plaintext back into records.
pub(crate) fn parse_plaintext(plaintext: &[u8]) -> Result<Vec<CredentialRecord>> {
    let set: RecordSetV1 = serde_json::from_slice(plaintext)
        .map_err(|e| CipherSafeError::FormatError(format!("record set JSON: {e}")))?;
    Ok(set.records)
}

/// Decrypt and parse a blob produced by `encode`.
pub fn decode(blob: &[u8], key: &MasterKey, aad: &[u8]) -> Result<Vec<CredentialRecord>> {
    let plaintext = open_plaintext(blob, key, aad)?;
    parse_plaintext(&plaintext)
}

fn bound_aad(aad: &[u8], version: u8) -> Vec<u8> {
    let mut bound = Vec::with_capacity(aad.len() + 1);
    bound.extend_from_slice(aad);
    bound.push(version);
    bound
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::vault::record::FIELD_PASSWORD;

    fn records() -> Vec<CredentialRecord> {
        let now = Utc::now();
        (0..3)
            .map(|i| CredentialRecord {
                id: Uuid::new_v4(),
                title: format!("Site {i}"),
                fields: BTreeMap::from([(FIELD_PASSWORD.to_string(), format!("pw{i}"))]),
                created_at: now,
                updated_at: now,
                deleted: false,
                revision: 1,
                origin: "test".into(),
                conflict_of: None,
            })
            .collect()
    }

    fn sorted(mut r: Vec<CredentialRecord>) -> Vec<CredentialRecord> {
        r.sort_by_key(|r| r.id);
        r
    }

    #[test]
    fn decode_returns_what_was_encoded() {
        let key = MasterKey::generate();
        let set = records();
        let blob = encode(&set, &key, b"hdr").unwrap();
        assert_eq!(decode(&blob, &key, b"hdr").unwrap(), sorted(set));
    }

    #[test]
    fn wrong_key_is_authentication_failure() {
        let blob = encode(&records(), &MasterKey::generate(), b"hdr").unwrap();
        let err = decode(&blob, &MasterKey::generate(), b"hdr").unwrap_err();
        assert!(matches!(err, CipherSafeError::AuthenticationFailure));
    }

    #[test]
    fn same_input_never_yields_same_blob() {
        let key = MasterKey::generate();
        let set = records();
        let a = encode(&set, &key, b"hdr").unwrap();
        let b = encode(&set, &key, b"hdr").unwrap();
        assert_ne!(a, b);
        assert_ne!(a[1..1 + NONCE_LEN], b[1..1 + NONCE_LEN]);
    }

    #[test]
    fn aad_mismatch_is_authentication_failure() {
        let key = MasterKey::generate();
        let blob = encode(&records(), &key, b"hdr").unwrap();
        assert!(matches!(
            decode(&blob, &key, b"other"),
            Err(CipherSafeError::AuthenticationFailure)
        ));
    }

    #[test]
    fn unknown_version_is_format_error() {
        let key = MasterKey::generate();
        let mut blob = encode(&records(), &key, b"hdr").unwrap();
        blob[0] = 9;
        assert!(matches!(
            decode(&blob, &key, b"hdr"),
            Err(CipherSafeError::FormatError(_))
        ));
        assert!(matches!(
            decode(&[CODEC_VERSION, 1, 2], &key, b"hdr"),
            Err(CipherSafeError::FormatError(_))
        ));
    }

    #[test]
    fn canonical_bytes_ignore_order() {
        let set = records();
        let mut reversed = set.clone();
        reversed.reverse();
        assert_eq!(
            *canonical_bytes(&set).unwrap(),
            *canonical_bytes(&reversed).unwrap()
        );
    }
}

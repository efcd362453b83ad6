//! Binary container format.
//!
//! A `.csafe` container has this layout:
//!
//! ```text
//! [CSAF: 4 bytes][format version: 1 byte][header_len: 4 bytes LE][header JSON][record blob]
//! ```
//!
//! - **Magic** (`CSAF`): identifies the file as a CipherSafe container.
//! - **Format version**: currently `1`.
//! - **Header length**: little-endian u32 telling us where the header
//!   JSON ends and the record blob begins.
//! - **Header JSON**: serialized `ContainerHeader`: vault identity,
//!   container version, key slots (salt + KDF params + wrapped master key),
//!   sync state, and the content MAC.
//! - **Record blob**: output of `codec::encode`.
//!
//! The header is stored in the clear but is bound as associated data into
//! the record blob's AEAD, so any header edit fails authentication on open.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::codec;
use super::record::CredentialRecord;
use crate::crypto::keys::MasterKey;
use crate::crypto::wrap::{BiometricSlot, PassphraseSlot};
use crate::errors::{CipherSafeError, Result};
use crate::sync::version::VersionVector;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic bytes at the start of every container.
const MAGIC: &[u8; 4] = b"CSAF";

/// Current binary format version.
pub const FORMAT_VERSION: u8 = 1;

/// Fixed-size prefix: 4 (magic) + 1 (version) + 4 (header_len).
const PREFIX_LEN: usize = 9;

/// Upper bound on header size; anything larger is corrupt.
const MAX_HEADER_LEN: usize = 1 << 20;

// ---------------------------------------------------------------------------
// Header
// ---------------------------------------------------------------------------

/// Sync bookkeeping carried with the container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Commits per replica that this container has absorbed.
    pub clock: VersionVector,
    /// Successful uploads completed by this replica.
    pub sync_round: u64,
    /// Local sync round at which each tombstone was first seen.
    #[serde(default)]
    pub tombstone_rounds: std::collections::BTreeMap<Uuid, u64>,
    /// Tombstones dropped by a purge, with the revision they had.  Merges
    /// discard copies at or below that revision so a purge cannot be undone
    /// by a replica that still holds the tombstone.
    #[serde(default)]
    pub purged: std::collections::BTreeMap<Uuid, u64>,
}

/// Metadata stored at the beginning of a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerHeader {
    /// Stable identity shared by every replica of one vault.
    pub vault_id: Uuid,

    pub created_at: DateTime<Utc>,

    /// Strictly increases on every committed change.
    pub version: u64,

    pub passphrase_slot: PassphraseSlot,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub biometric_slot: Option<BiometricSlot>,

    #[serde(default)]
    pub sync: SyncState,

    /// HMAC-SHA256 over the canonical plaintext record set (base64 in JSON).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub content_mac: Vec<u8>,
}

impl ContainerHeader {
    /// Header for a brand-new, empty vault.
    pub fn new(passphrase_slot: PassphraseSlot) -> Self {
        Self {
            vault_id: Uuid::new_v4(),
            created_at: Utc::now(),
            version: 0,
            passphrase_slot,
            biometric_slot: None,
            sync: SyncState::default(),
            content_mac: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// VaultContainer
// ---------------------------------------------------------------------------

/// The persisted unit: header + encrypted record blob.
///
/// Keeps the exact header bytes so the AEAD associated data is checked
/// against what was stored, never against a re-serialization.
#[derive(Debug, Clone)]
pub struct VaultContainer {
    header: ContainerHeader,
    header_bytes: Vec<u8>,
    blob: Vec<u8>,
}

impl VaultContainer {
    /// Encrypt `records` under `key` and stamp `header` with their content MAC.
    pub fn seal(mut header: ContainerHeader, records: &[CredentialRecord], key: &MasterKey) -> Result<Self> {
        let plaintext = codec::canonical_bytes(records)?;
        header.content_mac = key.content_mac(&plaintext)?.to_vec();

        let header_bytes = serde_json::to_vec(&header)
            .map_err(|e| CipherSafeError::SerializationError(format!("header: {e}")))?;
        let aad = associated_data(&header_bytes)?;
        let blob = codec::seal_plaintext(&plaintext, key, &aad)?;

        Ok(Self {
            header,
            header_bytes,
            blob,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn version(&self) -> u64 {
        self.header.version
    }

    pub fn vault_id(&self) -> Uuid {
        self.header.vault_id
    }

    /// Decrypt the record set, verifying the blob tag and the content MAC.
    pub fn open(&self, key: &MasterKey) -> Result<Vec<CredentialRecord>> {
        let aad = associated_data(&self.header_bytes)?;
        let plaintext = codec::open_plaintext(&self.blob, key, &aad)?;

        let mac = key.content_mac(&plaintext)?;
        if !bool::from(mac.as_slice().ct_eq(&self.header.content_mac)) {
            return Err(CipherSafeError::FormatError(
                "content MAC does not match record set".into(),
            ));
        }
        codec::parse_plaintext(&plaintext)
    }

    /// Equal version and equal content MAC: identical for sync purposes.
    pub fn is_same_as(&self, other: &Self) -> bool {
        self.header.vault_id == other.header.vault_id
            && self.header.version == other.header.version
            && bool::from(self.header.content_mac.ct_eq(&other.header.content_mac))
    }

    /// Serialize to the on-disk byte layout.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let header_len = u32::try_from(self.header_bytes.len()).map_err(|_| {
            CipherSafeError::SerializationError(format!(
                "header length {} exceeds u32::MAX",
                self.header_bytes.len()
            ))
        })?;

        let mut buf = Vec::with_capacity(PREFIX_LEN + self.header_bytes.len() + self.blob.len());
        buf.extend_from_slice(MAGIC); // 4 bytes
        buf.push(FORMAT_VERSION); // 1 byte
        buf.extend_from_slice(&header_len.to_le_bytes()); // 4 bytes LE
        buf.extend_from_slice(&self.header_bytes);
        buf.extend_from_slice(&self.blob);
        Ok(buf)
    }

    /// Parse the byte layout.  Only the header is interpreted here; the
    /// blob is authenticated later by `open`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < PREFIX_LEN {
            return Err(CipherSafeError::FormatError(
                "file too small to be a valid container".into(),
            ));
        }

        if &data[0..4] != MAGIC {
            return Err(CipherSafeError::FormatError("missing CSAF magic bytes".into()));
        }

        let version = data[4];
        if version != FORMAT_VERSION {
            return Err(CipherSafeError::FormatError(format!(
                "unsupported format version {version}, expected {FORMAT_VERSION}"
            )));
        }

        let header_len_u32 = u32::from_le_bytes(
            data[5..9]
                .try_into()
                .map_err(|_| CipherSafeError::FormatError("bad header length".into()))?,
        );
        let header_len = usize::try_from(header_len_u32)
            .ok()
            .filter(|len| *len <= MAX_HEADER_LEN)
            .ok_or_else(|| {
                CipherSafeError::FormatError(format!("header length {header_len_u32} is implausible"))
            })?;

        let header_end = PREFIX_LEN + header_len;
        if header_end >= data.len() {
            return Err(CipherSafeError::FormatError(
                "header length exceeds file size".into(),
            ));
        }

        let header_bytes = data[PREFIX_LEN..header_end].to_vec();
        let header: ContainerHeader = serde_json::from_slice(&header_bytes)
            .map_err(|e| CipherSafeError::FormatError(format!("header JSON: {e}")))?;

        Ok(Self {
            header,
            header_bytes,
            blob: data[header_end..].to_vec(),
        })
    }
}

/// Associated data for the record blob: the fixed prefix plus header bytes.
fn associated_data(header_bytes: &[u8]) -> Result<Vec<u8>> {
    let header_len = u32::try_from(header_bytes.len())
        .map_err(|_| CipherSafeError::SerializationError("header too large".into()))?;
    let mut aad = Vec::with_capacity(PREFIX_LEN + header_bytes.len());
    aad.extend_from_slice(MAGIC);
    aad.push(FORMAT_VERSION);
    aad.extend_from_slice(&header_len.to_le_bytes());
    aad.extend_from_slice(header_bytes);
    Ok(aad)
}

// ---------------------------------------------------------------------------
// Serde helpers for base64-encoded Vec<u8> fields
// ---------------------------------------------------------------------------

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

pub(crate) fn base64_encode<S>(data: &[u8], serializer: S) -> std::result::Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(&BASE64.encode(data))
}

pub(crate) fn base64_decode<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    BASE64.decode(&s).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::kdf::KdfParams;
    use crate::vault::record::NewRecord;

    fn sample(key: &MasterKey) -> (ContainerHeader, Vec<CredentialRecord>) {
        let slot = PassphraseSlot::seal(key, b"P1", KdfParams::minimum()).unwrap();
        let now = Utc::now();
        let new = NewRecord::new("Bank").field("password", "s3cr3t");
        let record = CredentialRecord {
            id: Uuid::new_v4(),
            title: new.title,
            fields: new.fields,
            created_at: now,
            updated_at: now,
            deleted: false,
            revision: 1,
            origin: "a".into(),
            conflict_of: None,
        };
        (ContainerHeader::new(slot), vec![record])
    }

    #[test]
    fn bytes_roundtrip_and_open() {
        let key = MasterKey::generate();
        let (header, records) = sample(&key);
        let sealed = VaultContainer::seal(header, &records, &key).unwrap();
        let parsed = VaultContainer::from_bytes(&sealed.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed.header(), sealed.header());
        assert_eq!(parsed.open(&key).unwrap(), records);
        assert!(parsed.is_same_as(&sealed));
    }

    #[test]
    fn header_tamper_fails_authentication() {
        let key = MasterKey::generate();
        let (header, records) = sample(&key);
        let mut bytes = VaultContainer::seal(header, &records, &key)
            .unwrap()
            .to_bytes()
            .unwrap();
        // Flip `"version":0` to `"version":1` inside the header JSON.
        let pos = bytes
            .windows(11)
            .position(|w| w == b"\"version\":0")
            .unwrap();
        bytes[pos + 10] = b'1';
        let parsed = VaultContainer::from_bytes(&bytes).unwrap();
        assert!(matches!(
            parsed.open(&key),
            Err(CipherSafeError::AuthenticationFailure)
        ));
    }

    #[test]
    fn garbage_is_format_error() {
        assert!(matches!(
            VaultContainer::from_bytes(b"nope"),
            Err(CipherSafeError::FormatError(_))
        ));
        let mut bad = b"CSAF".to_vec();
        bad.push(7);
        bad.extend_from_slice(&[0, 0, 0, 0]);
        assert!(matches!(
            VaultContainer::from_bytes(&bad),
            Err(CipherSafeError::FormatError(_))
        ));
    }

    #[test]
    fn same_records_reseal_to_same_content_mac() {
        let key = MasterKey::generate();
        let (header, records) = sample(&key);
        let a = VaultContainer::seal(header.clone(), &records, &key).unwrap();
        let b = VaultContainer::seal(header, &records, &key).unwrap();
        assert!(a.is_same_as(&b));
        assert_ne!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
    }
}

//! Password-protected export files.
//!
//! ```text
//! [magic "CSXP": 4][version: 1][salt: 32]
//! [memory_kib: u32 LE][iterations: u32 LE][parallelism: u32 LE]
//! [nonce || ciphertext || tag]
//! ```
//!
//! The serialized table is sealed with AES-256-GCM under an Argon2id key
//! derived from the export password.  Everything before the ciphertext is
//! bound as associated data, so a tampered work factor or salt fails to
//! open like a wrong password does.

use zeroize::Zeroizing;

use crate::crypto::encryption::{decrypt, encrypt};
use crate::crypto::kdf::{derive_key, generate_salt, KdfParams, SALT_LEN};
use crate::errors::{CipherSafeError, Result};

const MAGIC: &[u8; 4] = b"CSXP";
const VERSION: u8 = 1;
const HEADER_LEN: usize = MAGIC.len() + 1 + SALT_LEN + 12;

/// Whether `data` starts like a protected export.
pub fn is_protected(data: &[u8]) -> bool {
    data.starts_with(MAGIC)
}

/// Seal an exported table under `password`.
pub fn protect(plain: &[u8], password: &[u8], kdf: KdfParams) -> Result<Vec<u8>> {
    kdf.validate()?;
    let salt = generate_salt();

    let mut out = Vec::with_capacity(HEADER_LEN + plain.len() + 28);
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&kdf.memory_kib.to_le_bytes());
    out.extend_from_slice(&kdf.iterations.to_le_bytes());
    out.extend_from_slice(&kdf.parallelism.to_le_bytes());

    let key = derive_key(password, &salt, &kdf)?;
    let sealed = encrypt(&key[..], plain, &out)?;
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Open a protected export.  A wrong password is `AuthenticationFailure`.
pub fn unprotect(data: &[u8], password: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if data.len() < HEADER_LEN || !is_protected(data) {
        return Err(CipherSafeError::TransferError(
            "not a protected export file".into(),
        ));
    }
    let version = data[MAGIC.len()];
    if version != VERSION {
        return Err(CipherSafeError::TransferError(format!(
            "unsupported protected export version {version}"
        )));
    }

    let (header, sealed) = data.split_at(HEADER_LEN);
    let salt = &header[MAGIC.len() + 1..MAGIC.len() + 1 + SALT_LEN];
    let params = &header[MAGIC.len() + 1 + SALT_LEN..];
    let kdf = KdfParams {
        memory_kib: read_u32(&params[0..4]),
        iterations: read_u32(&params[4..8]),
        parallelism: read_u32(&params[8..12]),
    };

    let key = derive_key(password, salt, &kdf)?;
    decrypt(&key[..], sealed, header).map(Zeroizing::new)
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(bytes);
    u32::from_le_bytes(buf)
}

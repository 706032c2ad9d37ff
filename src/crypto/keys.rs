//! Key derivation helpers using HKDF-SHA256.
//!
//! From a single master key we derive:
//! - A unique **per-record** encryption key for each credential id.
//! - A dedicated **verification key** for the passphrase check token.
//!
//! HKDF (RFC 5869) uses the master key as input keying material (IKM)
//! and a context string (`info`) to produce independent sub-keys.

use std::fmt;

use hkdf::Hkdf;
use sha2::Sha256;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::errors::{Result, VaultError};

/// Length of derived sub-keys (256 bits).
const KEY_LEN: usize = 32;

/// Derive a per-record encryption key from the master key.
///
/// Each credential id produces a different key so that a nonce collision
/// on one record can never interact with another record's ciphertext.
///
/// `info` is set to `"credvault-record:<uuid>"` to bind the derived key
/// to a specific credential.
pub fn derive_record_key(master_key: &[u8], record_id: Uuid) -> Result<[u8; KEY_LEN]> {
    let info = format!("credvault-record:{record_id}");
    hkdf_derive(master_key, info.as_bytes())
}

/// Derive the verification-token key from the master key.
///
/// This key encrypts the fixed verification marker so a candidate
/// passphrase can be checked without touching any credential data.
pub fn derive_verification_key(master_key: &[u8]) -> Result<[u8; KEY_LEN]> {
    hkdf_derive(master_key, b"credvault-verification")
}

/// Internal helper: run HKDF-SHA256 expand with the given `info`.
///
/// We skip the `extract` step and use the master key directly as the
/// pseudo-random key (PRK), because the master key already has high
/// entropy (it came from Argon2id).
fn hkdf_derive(ikm: &[u8], info: &[u8]) -> Result<[u8; KEY_LEN]> {
    // `salt` is None - HKDF will use a zero-filled salt internally.
    let hk = Hkdf::<Sha256>::new(None, ikm);

    let mut okm = [0u8; KEY_LEN];
    hk.expand(info, &mut okm)
        .map_err(|e| VaultError::KeyDerivationFailed(format!("HKDF expand failed: {e}")))?;

    Ok(okm)
}

/// A wrapper around a 32-byte master key that automatically zeroes
/// its memory when dropped.
///
/// Use this to hold the master key in memory so it cannot linger
/// after it is no longer needed.
#[derive(Zeroize)]
#[zeroize(drop)]
pub struct MasterKey {
    bytes: [u8; KEY_LEN],
}

impl MasterKey {
    /// Create a new `MasterKey` from raw bytes.
    pub fn new(bytes: [u8; KEY_LEN]) -> Self {
        Self { bytes }
    }

    /// Access the raw key bytes (e.g. to pass to HKDF or encryption).
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.bytes
    }

    /// Derive a per-record encryption key from this master key.
    pub fn derive_record_key(&self, record_id: Uuid) -> Result<[u8; KEY_LEN]> {
        derive_record_key(&self.bytes, record_id)
    }

    /// Derive the verification-token key from this master key.
    pub fn derive_verification_key(&self) -> Result<[u8; KEY_LEN]> {
        derive_verification_key(&self.bytes)
    }
}

// Key material must never leak through debug output.
impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

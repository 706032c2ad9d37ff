//! Passphrase verification tokens.
//!
//! A verification token is the fixed, public marker string encrypted
//! under the verification sub-key of a master key.  Checking a candidate
//! passphrase means deriving the candidate key, decrypting the token,
//! and comparing the plaintext against the marker:
//!
//! - decryption succeeds and the plaintext matches  -> correct passphrase
//! - anything else                                  -> wrong passphrase
//!
//! The zero-knowledge property holds because the token reveals nothing
//! about any credential; it only proves key possession.  `verify` never
//! returns an error for a wrong passphrase, only `false`.

use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use crate::crypto::envelope;
use crate::crypto::kdf::{self, Argon2Params};
use crate::crypto::keys::MasterKey;
use crate::errors::Result;

// Re-use the base64 serde helpers from the record model (no duplication).
use crate::vault::record::{base64_decode, base64_encode};

/// The fixed marker encrypted into every verification token.
///
/// Its value is public; secrecy lives entirely in the key.
pub const VERIFICATION_MARKER: &[u8] = b"CREDVAULT_VERIFICATION_V1";

/// An encrypted verification marker, stored in the user profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationToken {
    /// AES-256-GCM ciphertext of the marker (base64 in JSON).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub ciphertext: Vec<u8>,

    /// The nonce used for that encryption (base64 in JSON).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub nonce: Vec<u8>,
}

/// Encrypt the marker under `master_key`'s verification sub-key.
///
/// Called at enrollment and again during master-password rotation.
pub fn create_token(master_key: &MasterKey) -> Result<VerificationToken> {
    let mut verification_key = master_key.derive_verification_key()?;
    let sealed = envelope::encrypt(&verification_key, VERIFICATION_MARKER);
    verification_key.zeroize();
    let (ciphertext, nonce) = sealed?;

    Ok(VerificationToken {
        ciphertext,
        nonce: nonce.to_vec(),
    })
}

/// Check a candidate master key against a stored token.
///
/// Returns `true` only when the token decrypts and the plaintext equals
/// the marker (compared in constant time).  A wrong key, a tampered
/// token, or a malformed token all return `false`; this function has no
/// error path for a bad passphrase.
pub fn verify_token(master_key: &MasterKey, token: &VerificationToken) -> bool {
    let Ok(mut verification_key) = master_key.derive_verification_key() else {
        return false;
    };

    let outcome = envelope::decrypt(&verification_key, &token.ciphertext, &token.nonce);
    verification_key.zeroize();
    match outcome {
        Ok(plaintext) => plaintext.ct_eq(VERIFICATION_MARKER).into(),
        Err(_) => false,
    }
}

/// Derive a key from `(passphrase, salt, params)` and verify it.
///
/// Convenience for callers that hold a raw passphrase rather than an
/// already-derived key.  Derivation failure on malformed input (for
/// example an undersized salt) is a real error; a merely wrong
/// passphrase still comes back as `Ok(false)`.
pub fn verify_passphrase(
    passphrase: &str,
    salt: &[u8],
    params: &Argon2Params,
    token: &VerificationToken,
) -> Result<bool> {
    let key = MasterKey::new(kdf::derive_master_key_with_params(
        passphrase.as_bytes(),
        salt,
        params,
    )?);
    Ok(verify_token(&key, token))
}

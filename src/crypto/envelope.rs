//! AES-256-GCM authenticated encryption.
//!
//! Each call to `encrypt` generates a fresh random 12-byte nonce and
//! returns it alongside the ciphertext.  The caller persists both; the
//! nonce is public data but must be presented unmodified to `decrypt`.
//!
//! Nonce reuse under the same key would be catastrophic for GCM, which
//! is why callers never supply their own.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Nonce};

use crate::errors::{Result, VaultError};

/// Size of the AES-256-GCM nonce in bytes.
pub const NONCE_LEN: usize = 12;

/// Size of the GCM authentication tag appended to every ciphertext.
pub const TAG_LEN: usize = 16;

/// Encrypt `plaintext` with a 32-byte `key`.
///
/// Returns `(ciphertext_with_tag, nonce)`.  Two calls with identical
/// inputs produce different nonces and therefore different ciphertexts.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<(Vec<u8>, [u8; NONCE_LEN])> {
    // Build the cipher from the raw key bytes.
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| VaultError::EncryptionFailed(format!("invalid key length: {e}")))?;

    // Generate a random 12-byte nonce.
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    // Encrypt and authenticate the plaintext.
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| VaultError::EncryptionFailed(format!("encryption error: {e}")))?;

    Ok((ciphertext, nonce.into()))
}

/// Decrypt a `(ciphertext, nonce)` pair produced by `encrypt`.
///
/// Fails with the same uniform error for a wrong key, a tampered
/// ciphertext, a tampered nonce, or a malformed input; callers cannot
/// tell those cases apart.
pub fn decrypt(key: &[u8], ciphertext: &[u8], nonce: &[u8]) -> Result<Vec<u8>> {
    if nonce.len() != NONCE_LEN {
        return Err(VaultError::DecryptionFailed);
    }

    // Ciphertext must at least hold the auth tag.
    if ciphertext.len() < TAG_LEN {
        return Err(VaultError::DecryptionFailed);
    }

    // Build the cipher from the raw key bytes.
    let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| VaultError::DecryptionFailed)?;

    // Decrypt and verify the auth tag.
    let plaintext = cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| VaultError::DecryptionFailed)?;

    Ok(plaintext)
}

//! Cryptographic primitives for CredVault.
//!
//! This module provides:
//! - AES-256-GCM authenticated encryption (`envelope`)
//! - Argon2id passphrase-based key derivation (`kdf`)
//! - HKDF-based per-record and verification key derivation (`keys`)
//! - Passphrase verification tokens (`verifier`)

pub mod envelope;
pub mod kdf;
pub mod keys;
pub mod verifier;

// Re-export the most commonly used items so callers can write:
//   use crate::crypto::{encrypt, decrypt, derive_master_key, ...};
pub use envelope::{decrypt, encrypt, NONCE_LEN};
pub use kdf::{derive_master_key, derive_master_key_with_params, generate_salt, Argon2Params};
pub use keys::{derive_record_key, derive_verification_key, MasterKey};
pub use verifier::{create_token, verify_passphrase, verify_token, VerificationToken};

use thiserror::Error;
use uuid::Uuid;

use crate::rotation::RotationPhase;
use crate::store::StoreError;

/// All errors that can occur in CredVault.
#[derive(Debug, Error)]
pub enum VaultError {
    // --- Crypto errors ---
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed - wrong passphrase or corrupted data")]
    DecryptionFailed,

    #[error("Key derivation failed: {0}")]
    KeyDerivationFailed(String),

    #[error("Invalid passphrase")]
    InvalidPassphrase,

    // --- Profile errors ---
    #[error("No vault profile found for user {0}")]
    ProfileNotFound(Uuid),

    #[error("A vault profile already exists for user {0}")]
    ProfileAlreadyExists(Uuid),

    // --- Credential errors ---
    #[error("Credential {0} not found")]
    CredentialNotFound(Uuid),

    #[error("Version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    #[error("Validation failed for '{field}': {reason}")]
    ValidationFailed { field: &'static str, reason: String },

    // --- Codec errors ---
    #[error("Credential codec error: {0}")]
    CodecFailed(String),

    // --- Storage errors ---
    #[error(transparent)]
    Storage(#[from] StoreError),

    // --- Rotation errors ---
    #[error("Master password rotation failed during {phase} phase: {reason}")]
    RotationFailed { phase: RotationPhase, reason: String },

    #[error(
        "Rotation rollback incomplete after failure in {phase} phase: \
         {count} credential(s) left encrypted under the new key",
        count = .unrestored.len()
    )]
    RollbackFailed {
        phase: RotationPhase,
        unrestored: Vec<Uuid>,
    },

    // --- Config errors ---
    #[error("Config file error: {0}")]
    ConfigError(String),
}

/// Convenience type alias for CredVault results.
pub type Result<T> = std::result::Result<T, VaultError>;

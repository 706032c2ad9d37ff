//! Storage boundary for CredVault.
//!
//! The engine never talks to a database directly.  It goes through
//! three injected async traits:
//! - `CredentialRepository` for encrypted credential records
//! - `ProfileStore` for the per-user salt + verification token
//! - `HistoryStore` for append-only password history
//!
//! Implementations wrap whatever backend they like; every method
//! returns `StoreError` and the engine lifts that into `VaultError`.
//! In-memory reference implementations live in `memory`.

pub mod memory;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use uuid::Uuid;

use crate::crypto::kdf::Argon2Params;
use crate::crypto::verifier::VerificationToken;
use crate::vault::record::{base64_decode, base64_encode, CredentialRecord, ExpiryStatus};

/// A failure inside a storage implementation.
///
/// Backends stringify their native errors into this; the engine does
/// not inspect the contents.
#[derive(Debug, Clone, Error)]
#[error("Storage error: {0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Convenience alias for storage results.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

// ---------------------------------------------------------------------------
// Profile types
// ---------------------------------------------------------------------------

/// Argon2 parameters as persisted in a user profile, so unlocking uses
/// exactly the settings that were active at enrollment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArgon2Params {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl StoredArgon2Params {
    /// Convert back into crypto-layer params.
    pub fn params(&self) -> Argon2Params {
        Argon2Params {
            memory_kib: self.memory_kib,
            iterations: self.iterations,
            parallelism: self.parallelism,
        }
    }
}

impl From<Argon2Params> for StoredArgon2Params {
    fn from(p: Argon2Params) -> Self {
        Self {
            memory_kib: p.memory_kib,
            iterations: p.iterations,
            parallelism: p.parallelism,
        }
    }
}

/// Whether an account has a verification token.
///
/// Accounts enrolled before verification tokens existed are
/// `Unverified` until their first successful unlock lazily upgrades
/// them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "token", rename_all = "snake_case")]
pub enum AccountVerification {
    /// A token exists; every unlock checks against it.
    Verified(VerificationToken),
    /// Legacy account; unlock falls back to decrypting a credential.
    Unverified,
}

impl AccountVerification {
    pub fn is_verified(&self) -> bool {
        matches!(self, AccountVerification::Verified(_))
    }
}

/// Per-user vault metadata: everything needed to derive and check the
/// master key.  Holds no secrets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    /// The user this profile belongs to.
    pub user_id: Uuid,

    /// KDF salt (base64 in JSON).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub salt: Vec<u8>,

    /// Argon2 params in force for this user's key.
    pub kdf: StoredArgon2Params,

    /// Verification state, with token when present.
    pub verification: AccountVerification,

    /// When the profile was created.
    pub created_at: DateTime<Utc>,

    /// When the profile was last written (rotation or upgrade).
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Password history
// ---------------------------------------------------------------------------

/// One append-only history entry: a fingerprint of a password a
/// credential used to have.  Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordHistoryEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub credential_id: Uuid,
    /// Base64-encoded SHA-256 of the prior password.
    pub password_hash: String,
    pub changed_at: DateTime<Utc>,
    /// Why the password changed (e.g. "password-changed").
    pub reason: String,
}

impl PasswordHistoryEntry {
    /// The fingerprint stored and compared for reuse detection:
    /// base64(SHA-256(password)).
    pub fn fingerprint(password: &str) -> String {
        let hash = Sha256::digest(password.as_bytes());
        BASE64.encode(hash)
    }
}

// ---------------------------------------------------------------------------
// Query and update shapes
// ---------------------------------------------------------------------------

/// Filters for `find_by_user`.  Default is "all live records".
#[derive(Debug, Clone, Default)]
pub struct CredentialFilter {
    /// Only records in this category.
    pub category: Option<String>,
    /// Only records with (or without) the favorite flag.
    pub favorite: Option<bool>,
    /// Only records carrying this tag.
    pub tag: Option<String>,
    /// Include soft-deleted records.
    pub include_deleted: bool,
}

impl CredentialFilter {
    /// Whether `record` passes this filter.
    pub fn matches(&self, record: &CredentialRecord) -> bool {
        if record.deleted && !self.include_deleted {
            return false;
        }
        if let Some(category) = &self.category {
            if &record.category != category {
                return false;
            }
        }
        if let Some(favorite) = self.favorite {
            if record.favorite != favorite {
                return false;
            }
        }
        if let Some(tag) = &self.tag {
            if !record.tags.iter().any(|t| t == tag) {
                return false;
            }
        }
        true
    }
}

/// A partial update to a stored record.
///
/// Every field is optional; absent fields must be left untouched by
/// the implementation.  `apply` is the canonical merge.
#[derive(Debug, Clone, Default)]
pub struct CredentialPatch {
    pub ciphertext: Option<Vec<u8>>,
    pub nonce: Option<Vec<u8>>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub favorite: Option<bool>,
    pub expires_at: Option<DateTime<Utc>>,
    pub expiry_status: Option<ExpiryStatus>,
    pub password_changed_at: Option<DateTime<Utc>>,
    pub access_count: Option<u64>,
    pub version: Option<u64>,
    pub deleted: Option<bool>,
    pub deleted_at: Option<Option<DateTime<Utc>>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl CredentialPatch {
    /// Merge this patch into `record`, field by field.
    pub fn apply(&self, record: &mut CredentialRecord) {
        if let Some(ciphertext) = &self.ciphertext {
            record.ciphertext = ciphertext.clone();
        }
        if let Some(nonce) = &self.nonce {
            record.nonce = nonce.clone();
        }
        if let Some(category) = &self.category {
            record.category = category.clone();
        }
        if let Some(tags) = &self.tags {
            record.tags = tags.clone();
        }
        if let Some(favorite) = self.favorite {
            record.favorite = favorite;
        }
        if let Some(expires_at) = self.expires_at {
            record.expires_at = expires_at;
        }
        if let Some(expiry_status) = self.expiry_status {
            record.expiry_status = expiry_status;
        }
        if let Some(password_changed_at) = self.password_changed_at {
            record.password_changed_at = password_changed_at;
        }
        if let Some(access_count) = self.access_count {
            record.access_count = access_count;
        }
        if let Some(version) = self.version {
            record.version = version;
        }
        if let Some(deleted) = self.deleted {
            record.deleted = deleted;
        }
        if let Some(deleted_at) = self.deleted_at {
            record.deleted_at = deleted_at;
        }
        if let Some(updated_at) = self.updated_at {
            record.updated_at = updated_at;
        }
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Storage for encrypted credential records.
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Fetch one record by id, scoped to its owner.  Soft-deleted
    /// records are returned; callers decide their visibility.
    async fn find_by_id(&self, user_id: Uuid, id: Uuid) -> StoreResult<Option<CredentialRecord>>;

    /// Fetch a user's records matching `filter`.
    async fn find_by_user(
        &self,
        user_id: Uuid,
        filter: &CredentialFilter,
    ) -> StoreResult<Vec<CredentialRecord>>;

    /// Fetch ALL of a user's records, soft-deleted included.  Used by
    /// rotation, which must re-encrypt everything.
    async fn find_all_by_user(&self, user_id: Uuid) -> StoreResult<Vec<CredentialRecord>>;

    /// Persist a new record.  Fails if the id already exists.
    async fn create(&self, record: &CredentialRecord) -> StoreResult<()>;

    /// Apply a partial update to an existing record.  Fails if the
    /// record does not exist.
    async fn update(&self, user_id: Uuid, id: Uuid, patch: &CredentialPatch) -> StoreResult<()>;

    /// Remove a record permanently.
    async fn delete(&self, user_id: Uuid, id: Uuid) -> StoreResult<()>;

    /// Number of live (not soft-deleted) records for a user.
    async fn count(&self, user_id: Uuid) -> StoreResult<usize>;

    /// Bump the access counter by one.
    async fn increment_access_count(&self, user_id: Uuid, id: Uuid) -> StoreResult<()>;
}

/// Storage for user profiles.
#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn load(&self, user_id: Uuid) -> StoreResult<Option<UserProfile>>;

    /// Insert or replace the profile for `profile.user_id`.
    async fn save(&self, profile: &UserProfile) -> StoreResult<()>;
}

/// Append-only storage for password history.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn add_entry(&self, entry: &PasswordHistoryEntry) -> StoreResult<()>;

    /// Whether `password_hash` appears in the user's history,
    /// excluding entries for `exclude` when given.
    async fn check_reuse(
        &self,
        user_id: Uuid,
        password_hash: &str,
        exclude: Option<Uuid>,
    ) -> StoreResult<bool>;
}

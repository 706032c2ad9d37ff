//! Credential record types stored in (and around) the vault.
//!
//! A `CredentialRecord` is what the storage layer sees: ciphertext,
//! nonce, and searchable metadata.  The decrypted payload lives in
//! `CredentialData`, which only ever exists in memory.  The
//! `ciphertext` and `nonce` fields use custom serde helpers so they
//! serialize as base64 strings in JSON rather than raw byte arrays.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use zeroize::Zeroize;

/// How a credential's expiration currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryStatus {
    /// Not yet inside the warning window.
    Active,
    /// Inside the warning window but not yet expired.
    ExpiringSoon,
    /// Past the expiration timestamp.
    Expired,
}

impl ExpiryStatus {
    /// Classify `expires_at` relative to `now` with a warning window of
    /// `warning_days` days.
    pub fn compute(expires_at: DateTime<Utc>, now: DateTime<Utc>, warning_days: u32) -> Self {
        if now >= expires_at {
            ExpiryStatus::Expired
        } else if now + Duration::days(i64::from(warning_days)) >= expires_at {
            ExpiryStatus::ExpiringSoon
        } else {
            ExpiryStatus::Active
        }
    }
}

/// A single encrypted credential as persisted by the repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialRecord {
    /// Stable identity of this credential.
    pub id: Uuid,

    /// The owning user.
    pub user_id: Uuid,

    /// AES-256-GCM ciphertext of the encoded `CredentialData`
    /// (base64 in JSON).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub ciphertext: Vec<u8>,

    /// The nonce used for that encryption (base64 in JSON).
    #[serde(serialize_with = "base64_encode", deserialize_with = "base64_decode")]
    pub nonce: Vec<u8>,

    /// Unencrypted grouping label (e.g. "general", "banking").
    pub category: String,

    /// Unencrypted free-form labels for filtering.
    pub tags: Vec<String>,

    /// Pinned by the user.
    pub favorite: bool,

    /// When the stored password expires.
    pub expires_at: DateTime<Utc>,

    /// Expiry classification as of the last write.  Readers that need a
    /// current view recompute from `expires_at`.
    pub expiry_status: ExpiryStatus,

    /// When the stored password last changed.
    pub password_changed_at: DateTime<Utc>,

    /// How many times the credential has been read through `get`.
    pub access_count: u64,

    /// Optimistic-lock version; bumped by exactly one on every
    /// re-encryption.
    pub version: u64,

    /// Soft-delete flag; soft-deleted records are hidden from normal
    /// reads but stay decryptable.
    pub deleted: bool,

    /// When the record was soft-deleted, if it was.
    pub deleted_at: Option<DateTime<Utc>>,

    /// When this record was first created.
    pub created_at: DateTime<Utc>,

    /// When this record was last written.
    pub updated_at: DateTime<Utc>,
}

impl CredentialRecord {
    /// Expiry classification as of `now` (the persisted
    /// `expiry_status` may be stale).
    pub fn expiry_status_at(&self, now: DateTime<Utc>, warning_days: u32) -> ExpiryStatus {
        ExpiryStatus::compute(self.expires_at, now, warning_days)
    }
}

/// A label/value pair riding inside the encrypted payload.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
pub struct CustomField {
    /// Display label (e.g. "PIN", "security question").
    pub label: String,

    /// The value; treated as sensitive regardless of `concealed`.
    pub value: String,

    /// Whether a UI should mask the value by default.
    #[serde(default)]
    pub concealed: bool,
}

impl fmt::Debug for CustomField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomField")
            .field("label", &self.label)
            .field("value", &"[REDACTED]")
            .field("concealed", &self.concealed)
            .finish()
    }
}

/// The sensitive fields of a credential, in plaintext.
///
/// Exists only in memory; the codec turns it into the byte blob that
/// gets encrypted.  Zeroed on drop.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize)]
#[zeroize(drop)]
pub struct CredentialData {
    /// Site or service name (e.g. "github.com").
    pub site: String,

    /// Login name at that site; may be empty.
    #[serde(default)]
    pub username: String,

    /// The stored password.
    pub password: String,

    /// Login page URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Free-form notes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,

    /// Additional label/value pairs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub custom_fields: Vec<CustomField>,
}

// The password must never leak through debug output.
impl fmt::Debug for CredentialData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialData")
            .field("site", &self.site)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("url", &self.url)
            .field("notes", &self.notes.as_deref().map(|_| "[REDACTED]"))
            .field("custom_fields", &self.custom_fields)
            .finish()
    }
}

/// Everything needed to create a credential.
#[derive(Debug, Clone, Default)]
pub struct CreateCredentialInput {
    pub site: String,
    pub username: String,
    pub password: String,
    pub url: Option<String>,
    pub notes: Option<String>,
    pub custom_fields: Vec<CustomField>,
    /// Defaults to "general" when absent.
    pub category: Option<String>,
    pub tags: Vec<String>,
    pub favorite: bool,
}

impl CreateCredentialInput {
    pub(crate) fn into_data(self) -> (CredentialData, Option<String>, Vec<String>, bool) {
        let data = CredentialData {
            site: self.site,
            username: self.username,
            password: self.password,
            url: self.url,
            notes: self.notes,
            custom_fields: self.custom_fields,
        };
        (data, self.category, self.tags, self.favorite)
    }
}

/// A partial update to a credential.
///
/// `None` always means "leave as is".  For the clearable fields (`url`,
/// `notes`) the inner option distinguishes "set to this" from "clear":
/// `Some(Some(v))` sets, `Some(None)` clears, `None` keeps.
#[derive(Debug, Clone, Default)]
pub struct UpdateCredentialInput {
    pub site: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub url: Option<Option<String>>,
    pub notes: Option<Option<String>>,
    pub custom_fields: Option<Vec<CustomField>>,
    pub category: Option<String>,
    pub tags: Option<Vec<String>>,
    pub favorite: Option<bool>,
}

impl UpdateCredentialInput {
    /// True when the update carries no field at all.
    pub fn is_empty(&self) -> bool {
        self.site.is_none()
            && self.username.is_none()
            && self.password.is_none()
            && self.url.is_none()
            && self.notes.is_none()
            && self.custom_fields.is_none()
            && self.category.is_none()
            && self.tags.is_none()
            && self.favorite.is_none()
    }
}

/// A decrypted view of one credential, as returned by `get` and
/// `search`.
#[derive(Debug, Clone)]
pub struct CredentialDetail {
    /// The record as stored (ciphertext included).
    pub record: CredentialRecord,
    /// The decrypted payload.
    pub data: CredentialData,
    /// Password strength score, 0 (worst) to 4 (best).
    pub strength: u8,
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
    let encoded = BASE64.encode(data);
    serializer.serialize_str(&encoded)
}

pub(crate) fn base64_decode<'de, D>(deserializer: D) -> std::result::Result<Vec<u8>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    BASE64.decode(&s).map_err(serde::de::Error::custom)
}

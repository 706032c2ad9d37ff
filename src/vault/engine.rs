//! High-level vault engine: unlock, CRUD, search, and reuse checks
//! over encrypted credential records.
//!
//! The engine owns no storage.  It drives the injected repository,
//! profile store, and history store, and it is the only place where
//! plaintext credential data and key material meet.  All plaintext and
//! derived sub-keys are zeroed as soon as they are no longer needed.

use std::cmp::Reverse;
use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use crate::config::Settings;
use crate::crypto::envelope::{self, NONCE_LEN};
use crate::crypto::kdf::{self, Argon2Params};
use crate::crypto::keys::MasterKey;
use crate::crypto::verifier;
use crate::errors::{Result, VaultError};
use crate::session::{AuthenticatedUser, VaultSession};
use crate::store::{
    AccountVerification, CredentialFilter, CredentialPatch, CredentialRepository, HistoryStore,
    PasswordHistoryEntry, ProfileStore, StoredArgon2Params, UserProfile,
};
use crate::vault::codec;
use crate::vault::record::{
    CreateCredentialInput, CredentialData, CredentialDetail, CredentialRecord, ExpiryStatus,
    UpdateCredentialInput,
};
use crate::vault::strength::score_password;

/// Category assigned when the caller does not pick one.
const DEFAULT_CATEGORY: &str = "general";

/// Maximum length for the category and each tag.
const MAX_LABEL_LEN: usize = 64;

/// Maximum number of tags per record.
const MAX_TAGS: usize = 20;

/// History reason recorded when an update replaces the password.
const REASON_PASSWORD_CHANGED: &str = "password-changed";

/// The vault engine.  Cheap to share: `&self` methods only, safe to
/// call from concurrent tasks.
pub struct VaultEngine {
    pub(crate) credentials: Arc<dyn CredentialRepository>,
    pub(crate) profiles: Arc<dyn ProfileStore>,
    pub(crate) history: Arc<dyn HistoryStore>,
    pub(crate) settings: Settings,
}

impl VaultEngine {
    pub fn new(
        credentials: Arc<dyn CredentialRepository>,
        profiles: Arc<dyn ProfileStore>,
        history: Arc<dyn HistoryStore>,
        settings: Settings,
    ) -> Self {
        Self {
            credentials,
            profiles,
            history,
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    // ── Enrollment and unlock ────────────────────────────────────────

    /// First-time enrollment for a user.
    ///
    /// 1. Generate a fresh salt.
    /// 2. Derive the master key on a blocking worker.
    /// 3. Encrypt the verification marker into a token.
    /// 4. Persist the profile (salt, KDF params, token).
    ///
    /// Returns an unlocked session.  Fails if the user already has a
    /// profile.
    pub async fn setup(
        &self,
        user: &AuthenticatedUser,
        passphrase: &str,
    ) -> Result<VaultSession> {
        if self.profiles.load(user.id).await?.is_some() {
            return Err(VaultError::ProfileAlreadyExists(user.id));
        }

        let salt = kdf::generate_salt().to_vec();
        let params = self.settings.argon2_params();
        let key = self.derive_key_blocking(passphrase, &salt, params).await?;
        let token = verifier::create_token(&key)?;

        let now = Utc::now();
        let profile = UserProfile {
            user_id: user.id,
            salt: salt.clone(),
            kdf: StoredArgon2Params::from(params),
            verification: AccountVerification::Verified(token),
            created_at: now,
            updated_at: now,
        };
        self.profiles.save(&profile).await?;

        info!(user_id = %user.id, "vault profile created");
        Ok(VaultSession::new(*user, key, salt))
    }

    /// Unlock a user's vault with their passphrase.
    ///
    /// Verified profiles are checked against the stored token.  Legacy
    /// (unverified) profiles fall back to decrypting the most recently
    /// updated credential, and are lazily upgraded on success; a user
    /// with no credentials at all is accepted outright.
    pub async fn unlock(
        &self,
        user: &AuthenticatedUser,
        passphrase: &str,
    ) -> Result<VaultSession> {
        let profile = self
            .profiles
            .load(user.id)
            .await?
            .ok_or(VaultError::ProfileNotFound(user.id))?;

        let key = self
            .derive_key_blocking(passphrase, &profile.salt, profile.kdf.params())
            .await?;

        match &profile.verification {
            AccountVerification::Verified(token) => {
                if !verifier::verify_token(&key, token) {
                    return Err(VaultError::InvalidPassphrase);
                }
            }
            AccountVerification::Unverified => {
                if !self.legacy_key_check(user, &key).await? {
                    return Err(VaultError::InvalidPassphrase);
                }
                // Lazy upgrade; the unlock itself must not fail on it.
                if let Err(e) = self.persist_verification(&profile, &key).await {
                    warn!(user_id = %user.id, error = %e, "verification upgrade failed");
                } else {
                    info!(user_id = %user.id, "legacy account upgraded to verified");
                }
            }
        }

        debug!(user_id = %user.id, "vault unlocked");
        Ok(VaultSession::new(*user, key, profile.salt))
    }

    /// Explicitly upgrade a legacy account to verified.
    ///
    /// Idempotent: returns `Ok(false)` when a token already exists,
    /// `Ok(true)` when one was created and persisted.
    pub async fn upgrade_verification(&self, session: &VaultSession) -> Result<bool> {
        let profile = self
            .profiles
            .load(session.user_id())
            .await?
            .ok_or(VaultError::ProfileNotFound(session.user_id()))?;

        if profile.verification.is_verified() {
            return Ok(false);
        }
        self.persist_verification(&profile, session.key()).await?;
        info!(user_id = %session.user_id(), "legacy account upgraded to verified");
        Ok(true)
    }

    /// Accept a candidate key for a legacy profile.
    ///
    /// Policy: the key must decrypt the most recently updated live
    /// credential; an empty vault accepts any passphrase (there is
    /// nothing the key could be wrong about yet).
    pub(crate) async fn legacy_key_check(
        &self,
        user: &AuthenticatedUser,
        key: &MasterKey,
    ) -> Result<bool> {
        let mut records = self
            .credentials
            .find_by_user(user.id, &CredentialFilter::default())
            .await?;
        records.sort_by_key(|r| Reverse(r.updated_at));

        let Some(record) = records.first() else {
            return Ok(true);
        };

        let mut record_key = key.derive_record_key(record.id)?;
        let outcome = envelope::decrypt(&record_key, &record.ciphertext, &record.nonce);
        record_key.zeroize();
        match outcome {
            Ok(mut plaintext) => {
                plaintext.zeroize();
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }

    /// Write a verification token into the profile.
    async fn persist_verification(&self, profile: &UserProfile, key: &MasterKey) -> Result<()> {
        let token = verifier::create_token(key)?;
        let mut updated = profile.clone();
        updated.verification = AccountVerification::Verified(token);
        updated.updated_at = Utc::now();
        self.profiles.save(&updated).await?;
        Ok(())
    }

    // ── CRUD ─────────────────────────────────────────────────────────

    /// Create a new credential.
    ///
    /// 1. Sanitize and validate the payload and metadata.
    /// 2. Encode to the plaintext blob and encrypt it under the
    ///    record's sub-key with a fresh nonce.
    /// 3. Persist with version 1 and a zero access count.
    pub async fn create(
        &self,
        session: &VaultSession,
        input: CreateCredentialInput,
    ) -> Result<CredentialRecord> {
        let (mut data, category, tags, favorite) = input.into_data();
        codec::sanitize(&mut data);
        codec::validate(&data)?;

        let category = category.unwrap_or_else(|| DEFAULT_CATEGORY.to_string());
        let tags = normalize_tags(tags)?;
        validate_category(&category)?;

        let id = Uuid::new_v4();
        let now = Utc::now();
        let expires_at = now + Duration::days(i64::from(self.settings.password_expiry_days));

        let (ciphertext, nonce) = self.encrypt_data(session.key(), id, &data)?;

        let record = CredentialRecord {
            id,
            user_id: session.user_id(),
            ciphertext,
            nonce: nonce.to_vec(),
            category,
            tags,
            favorite,
            expires_at,
            expiry_status: ExpiryStatus::compute(expires_at, now, self.settings.expiry_warning_days),
            password_changed_at: now,
            access_count: 0,
            version: 1,
            deleted: false,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.credentials.create(&record).await?;

        debug!(credential_id = %id, user_id = %session.user_id(), "credential created");
        Ok(record)
    }

    /// Fetch and decrypt one credential.
    ///
    /// Soft-deleted records are treated as absent.  The access counter
    /// is bumped best-effort: a counter failure is logged and never
    /// fails the read.
    pub async fn get(&self, session: &VaultSession, id: Uuid) -> Result<CredentialDetail> {
        let mut record = self.fetch_live(session, id).await?;
        let data = self.decrypt_data(session.key(), &record)?;
        let strength = score_password(&data.password);

        match self
            .credentials
            .increment_access_count(session.user_id(), id)
            .await
        {
            Ok(()) => record.access_count += 1,
            Err(e) => warn!(credential_id = %id, error = %e, "access count not recorded"),
        }

        Ok(CredentialDetail {
            record,
            data,
            strength,
        })
    }

    /// Update a credential with optimistic locking.
    ///
    /// 1. Reject when the stored version differs from
    ///    `expected_version`.
    /// 2. Decrypt the current payload and merge only the fields the
    ///    caller supplied; absent fields keep their value.
    /// 3. Validate the merged payload and re-encrypt it with a fresh
    ///    nonce.  A rejected update writes nothing, history included.
    /// 4. When the password actually changed, append the OLD
    ///    password's fingerprint to the history store, then persist
    ///    with the version bumped by exactly one.
    pub async fn update(
        &self,
        session: &VaultSession,
        id: Uuid,
        changes: UpdateCredentialInput,
        expected_version: u64,
    ) -> Result<CredentialRecord> {
        if changes.is_empty() {
            return Err(VaultError::ValidationFailed {
                field: "changes",
                reason: "no fields to update".into(),
            });
        }

        let mut record = self.fetch_live(session, id).await?;
        if record.version != expected_version {
            return Err(VaultError::VersionConflict {
                expected: expected_version,
                actual: record.version,
            });
        }

        let mut data = self.decrypt_data(session.key(), &record)?;
        let now = Utc::now();

        // Fingerprint the old password before the merge wipes it.  The
        // entry itself is written only once the merged payload has
        // passed validation, and always ahead of the overwrite.
        let password_changing = changes
            .password
            .as_deref()
            .is_some_and(|p| p != data.password);
        let old_fingerprint =
            password_changing.then(|| PasswordHistoryEntry::fingerprint(&data.password));

        merge_changes(&mut data, &changes);
        codec::sanitize(&mut data);
        codec::validate(&data)?;

        if let Some(category) = &changes.category {
            validate_category(category)?;
        }
        let tags = match changes.tags.clone() {
            Some(tags) => Some(normalize_tags(tags)?),
            None => None,
        };

        let (ciphertext, nonce) = self.encrypt_data(session.key(), id, &data)?;

        if let Some(password_hash) = old_fingerprint {
            let entry = PasswordHistoryEntry {
                id: Uuid::new_v4(),
                user_id: session.user_id(),
                credential_id: id,
                password_hash,
                changed_at: now,
                reason: REASON_PASSWORD_CHANGED.to_string(),
            };
            self.history.add_entry(&entry).await?;
        }

        let mut patch = CredentialPatch {
            ciphertext: Some(ciphertext),
            nonce: Some(nonce.to_vec()),
            category: changes.category.clone(),
            tags,
            favorite: changes.favorite,
            version: Some(record.version + 1),
            updated_at: Some(now),
            ..CredentialPatch::default()
        };
        if password_changing {
            let expires_at =
                now + Duration::days(i64::from(self.settings.password_expiry_days));
            patch.password_changed_at = Some(now);
            patch.expires_at = Some(expires_at);
            patch.expiry_status = Some(ExpiryStatus::compute(
                expires_at,
                now,
                self.settings.expiry_warning_days,
            ));
        }

        self.credentials
            .update(session.user_id(), id, &patch)
            .await?;

        debug!(
            credential_id = %id,
            version = record.version + 1,
            password_changed = password_changing,
            "credential updated"
        );

        patch.apply(&mut record);
        Ok(record)
    }

    /// Delete a credential.
    ///
    /// Soft by default: the record is flagged and hidden but stays
    /// decryptable (and is still carried through rotations).  A hard
    /// delete removes the row outright, soft-deleted or not.
    pub async fn delete(&self, session: &VaultSession, id: Uuid, hard: bool) -> Result<()> {
        if hard {
            self.credentials
                .find_by_id(session.user_id(), id)
                .await?
                .ok_or(VaultError::CredentialNotFound(id))?;
            self.credentials.delete(session.user_id(), id).await?;
            debug!(credential_id = %id, "credential hard-deleted");
            return Ok(());
        }

        self.fetch_live(session, id).await?;
        let now = Utc::now();
        let patch = CredentialPatch {
            deleted: Some(true),
            deleted_at: Some(Some(now)),
            updated_at: Some(now),
            ..CredentialPatch::default()
        };
        self.credentials
            .update(session.user_id(), id, &patch)
            .await?;
        debug!(credential_id = %id, "credential soft-deleted");
        Ok(())
    }

    /// List encrypted records matching `filter`.  Never decrypts.
    pub async fn list(
        &self,
        session: &VaultSession,
        filter: &CredentialFilter,
    ) -> Result<Vec<CredentialRecord>> {
        Ok(self
            .credentials
            .find_by_user(session.user_id(), filter)
            .await?)
    }

    /// Number of live credentials for the session user.
    pub async fn count(&self, session: &VaultSession) -> Result<usize> {
        Ok(self.credentials.count(session.user_id()).await?)
    }

    // ── Search and reuse ─────────────────────────────────────────────

    /// Case-insensitive substring search over site, username, url, and
    /// notes.
    ///
    /// Decrypts every live record.  A record that fails to decrypt is
    /// skipped with a warning; one bad record never aborts the search.
    pub async fn search(
        &self,
        session: &VaultSession,
        query: &str,
    ) -> Result<Vec<CredentialDetail>> {
        let records = self
            .credentials
            .find_by_user(session.user_id(), &CredentialFilter::default())
            .await?;
        let needle = query.to_lowercase();

        let mut hits = Vec::new();
        for record in records {
            let data = match self.decrypt_data(session.key(), &record) {
                Ok(data) => data,
                Err(e) => {
                    warn!(credential_id = %record.id, error = %e, "record skipped in search");
                    continue;
                }
            };
            if matches_query(&data, &needle) {
                let strength = score_password(&data.password);
                hits.push(CredentialDetail {
                    record,
                    data,
                    strength,
                });
            }
        }
        Ok(hits)
    }

    /// Whether `candidate` was ever used before by this user.
    ///
    /// Checks the password history first, then the current passwords
    /// of live records (excluding `exclude`, typically the credential
    /// being edited).
    pub async fn check_password_reuse(
        &self,
        session: &VaultSession,
        candidate: &str,
        exclude: Option<Uuid>,
    ) -> Result<bool> {
        let fingerprint = PasswordHistoryEntry::fingerprint(candidate);
        if self
            .history
            .check_reuse(session.user_id(), &fingerprint, exclude)
            .await?
        {
            return Ok(true);
        }

        let records = self
            .credentials
            .find_by_user(session.user_id(), &CredentialFilter::default())
            .await?;
        for record in records {
            if Some(record.id) == exclude {
                continue;
            }
            match self.decrypt_data(session.key(), &record) {
                Ok(data) => {
                    if data.password == candidate {
                        return Ok(true);
                    }
                }
                Err(e) => {
                    warn!(credential_id = %record.id, error = %e, "record skipped in reuse check");
                }
            }
        }
        Ok(false)
    }

    // ── Shared crypto plumbing ───────────────────────────────────────

    /// Run Argon2id on a blocking worker so async callers never stall
    /// their executor.
    pub(crate) async fn derive_key_blocking(
        &self,
        passphrase: &str,
        salt: &[u8],
        params: Argon2Params,
    ) -> Result<MasterKey> {
        let passphrase = Zeroizing::new(passphrase.to_owned());
        let salt = salt.to_vec();
        let mut bytes = tokio::task::spawn_blocking(move || {
            kdf::derive_master_key_with_params(passphrase.as_bytes(), &salt, &params)
        })
        .await
        .map_err(|e| VaultError::KeyDerivationFailed(format!("derivation task failed: {e}")))??;
        let key = MasterKey::new(bytes);
        bytes.zeroize();
        Ok(key)
    }

    /// Encode and encrypt a payload under the record's sub-key.
    pub(crate) fn encrypt_data(
        &self,
        key: &MasterKey,
        record_id: Uuid,
        data: &CredentialData,
    ) -> Result<(Vec<u8>, [u8; NONCE_LEN])> {
        let mut plaintext = codec::encode(data)?;
        let mut record_key = key.derive_record_key(record_id)?;
        let sealed = envelope::encrypt(&record_key, &plaintext);
        record_key.zeroize();
        plaintext.zeroize();
        sealed
    }

    /// Decrypt and decode one record's payload.
    pub(crate) fn decrypt_data(
        &self,
        key: &MasterKey,
        record: &CredentialRecord,
    ) -> Result<CredentialData> {
        let mut record_key = key.derive_record_key(record.id)?;
        let outcome = envelope::decrypt(&record_key, &record.ciphertext, &record.nonce);
        record_key.zeroize();
        let mut plaintext = outcome?;
        let data = codec::decode(&plaintext);
        plaintext.zeroize();
        data
    }

    /// Fetch a record, treating soft-deleted ones as absent.
    async fn fetch_live(&self, session: &VaultSession, id: Uuid) -> Result<CredentialRecord> {
        let record = self
            .credentials
            .find_by_id(session.user_id(), id)
            .await?
            .ok_or(VaultError::CredentialNotFound(id))?;
        if record.deleted {
            return Err(VaultError::CredentialNotFound(id));
        }
        Ok(record)
    }
}

// ── Free helpers ─────────────────────────────────────────────────────

/// Merge the supplied fields of `changes` into `data`, leaving absent
/// fields untouched.  Replaced secrets are zeroed.
fn merge_changes(data: &mut CredentialData, changes: &UpdateCredentialInput) {
    if let Some(site) = &changes.site {
        data.site = site.clone();
    }
    if let Some(username) = &changes.username {
        data.username = username.clone();
    }
    if let Some(password) = &changes.password {
        let mut old = std::mem::replace(&mut data.password, password.clone());
        old.zeroize();
    }
    if let Some(url) = &changes.url {
        data.url = url.clone();
    }
    if let Some(notes) = &changes.notes {
        data.notes = notes.clone();
    }
    if let Some(custom_fields) = &changes.custom_fields {
        let mut old = std::mem::replace(&mut data.custom_fields, custom_fields.clone());
        old.zeroize();
    }
}

fn matches_query(data: &CredentialData, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    data.site.to_lowercase().contains(needle)
        || data.username.to_lowercase().contains(needle)
        || data
            .url
            .as_deref()
            .is_some_and(|u| u.to_lowercase().contains(needle))
        || data
            .notes
            .as_deref()
            .is_some_and(|n| n.to_lowercase().contains(needle))
}

fn validate_category(category: &str) -> Result<()> {
    if category.trim().is_empty() {
        return Err(VaultError::ValidationFailed {
            field: "category",
            reason: "must not be empty".into(),
        });
    }
    if category.chars().count() > MAX_LABEL_LEN {
        return Err(VaultError::ValidationFailed {
            field: "category",
            reason: format!("exceeds {MAX_LABEL_LEN} characters"),
        });
    }
    Ok(())
}

/// Trim tags, enforce the per-tag and count limits.
fn normalize_tags(tags: Vec<String>) -> Result<Vec<String>> {
    if tags.len() > MAX_TAGS {
        return Err(VaultError::ValidationFailed {
            field: "tags",
            reason: format!("at most {MAX_TAGS} tags allowed"),
        });
    }
    let mut out = Vec::with_capacity(tags.len());
    for tag in tags {
        let tag = tag.trim().to_string();
        if tag.is_empty() {
            return Err(VaultError::ValidationFailed {
                field: "tags",
                reason: "tags must not be empty".into(),
            });
        }
        if tag.chars().count() > MAX_LABEL_LEN {
            return Err(VaultError::ValidationFailed {
                field: "tags",
                reason: format!("exceeds {MAX_LABEL_LEN} characters"),
            });
        }
        out.push(tag);
    }
    Ok(out)
}

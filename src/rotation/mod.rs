//! Master password rotation.
//!
//! Rotation re-encrypts every credential a user owns (soft-deleted
//! ones included) under a key derived from a new passphrase, then
//! swaps the profile's salt and verification token.  The phases run
//! strictly in order:
//!
//! `verifying -> fetching -> decrypting -> re-encrypting -> updating
//! -> finalizing -> done`
//!
//! Nothing is written until the updating phase, so any failure before
//! it leaves the vault untouched and safe to retry.  The updating and
//! finalizing phases keep every record's original ciphertext, nonce,
//! and version in memory; if a write fails partway, the records
//! already updated are restored from those originals.  A rollback
//! that itself fails is reported as a distinct error carrying the ids
//! left encrypted under the new key.

use std::fmt;

use chrono::{DateTime, Utc};
use tracing::{info, warn};
use uuid::Uuid;
use zeroize::{Zeroize, Zeroizing};

use crate::crypto::envelope::{self, NONCE_LEN};
use crate::crypto::kdf;
use crate::crypto::verifier;
use crate::errors::{Result, VaultError};
use crate::session::{AuthenticatedUser, VaultSession};
use crate::store::{AccountVerification, CredentialPatch, StoredArgon2Params};
use crate::vault::engine::VaultEngine;

/// Where in the rotation protocol an event or failure occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RotationPhase {
    Verifying,
    Fetching,
    Decrypting,
    Reencrypting,
    Updating,
    Finalizing,
    Done,
}

impl fmt::Display for RotationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RotationPhase::Verifying => "verifying",
            RotationPhase::Fetching => "fetching",
            RotationPhase::Decrypting => "decrypting",
            RotationPhase::Reencrypting => "re-encrypting",
            RotationPhase::Updating => "updating",
            RotationPhase::Finalizing => "finalizing",
            RotationPhase::Done => "done",
        };
        f.write_str(name)
    }
}

/// One progress event.  `total` is 0 until the records are fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationProgress {
    pub phase: RotationPhase,
    pub processed: usize,
    pub total: usize,
    pub message: String,
}

/// Receiver for progress events during a rotation.
pub trait ProgressSink: Send + Sync {
    fn report(&self, progress: &RotationProgress);
}

/// Sink that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _progress: &RotationProgress) {}
}

/// Adapter turning a closure into a [`ProgressSink`].
pub struct ProgressFn<F>(pub F);

impl<F> ProgressSink for ProgressFn<F>
where
    F: Fn(&RotationProgress) + Send + Sync,
{
    fn report(&self, progress: &RotationProgress) {
        (self.0)(progress)
    }
}

/// Caller choices for a rotation.
#[derive(Debug, Clone, Copy, Default)]
pub struct RotationOptions {
    /// Keep the existing salt instead of generating a fresh one.
    /// Rotating the salt is the stronger default; keeping it is for
    /// callers that need salt stability.
    pub keep_salt: bool,
}

/// What a successful rotation accomplished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationOutcome {
    /// Records re-encrypted and persisted, soft-deleted included.
    pub credentials_updated: usize,
    /// The profile now carries a token under the new key.
    pub verification_replaced: bool,
    /// The live session key was swapped in place.
    pub session_updated: bool,
    /// Salt now in effect, new or kept.
    pub salt: Vec<u8>,
    pub salt_rotated: bool,
}

/// Snapshot of one record taken before any write, sufficient to put
/// the record back exactly as it was.
struct RotationItem {
    id: Uuid,
    version: u64,
    original_ciphertext: Vec<u8>,
    original_nonce: Vec<u8>,
    original_updated_at: DateTime<Utc>,
    plaintext: Zeroizing<Vec<u8>>,
}

impl VaultEngine {
    /// Rotate a user's master password.
    ///
    /// The current passphrase is confirmed against the stored
    /// verification token, never against an in-memory session key.
    /// Pass the live session to have its key swapped on success;
    /// a failure to do so is non-fatal since the user can simply
    /// unlock again.
    ///
    /// Failures before the updating phase leave the vault untouched.
    /// A write failure in updating or finalizing triggers a rollback
    /// of every record written so far; see [`VaultError::RotationFailed`]
    /// and [`VaultError::RollbackFailed`] for how the two outcomes are
    /// reported.
    pub async fn rotate_master_password(
        &self,
        user: &AuthenticatedUser,
        current_passphrase: &str,
        new_passphrase: &str,
        options: &RotationOptions,
        session: Option<&mut VaultSession>,
        progress: &dyn ProgressSink,
    ) -> Result<RotationOutcome> {
        // 1. Verify the current passphrase against the stored token.
        report(progress, RotationPhase::Verifying, 0, 0, "verifying current passphrase");
        let profile = self
            .profiles
            .load(user.id)
            .await?
            .ok_or(VaultError::ProfileNotFound(user.id))?;
        let old_key = self
            .derive_key_blocking(current_passphrase, &profile.salt, profile.kdf.params())
            .await?;
        match &profile.verification {
            AccountVerification::Verified(token) => {
                if !verifier::verify_token(&old_key, token) {
                    return Err(VaultError::InvalidPassphrase);
                }
            }
            AccountVerification::Unverified => {
                if !self.legacy_key_check(user, &old_key).await? {
                    return Err(VaultError::InvalidPassphrase);
                }
            }
        }

        // 2. Fetch every record, soft-deleted included.  A record left
        //    out here would be stranded under the old key.
        report(progress, RotationPhase::Fetching, 0, 0, "loading credential records");
        let records = self.credentials.find_all_by_user(user.id).await?;
        let total = records.len();

        // 3. Decrypt everything under the current key, keeping each
        //    original ciphertext for rollback.  Any failure aborts
        //    before a single write.
        report(
            progress,
            RotationPhase::Decrypting,
            0,
            total,
            format!("decrypting {total} record(s)"),
        );
        let mut items = Vec::with_capacity(total);
        for (i, record) in records.iter().enumerate() {
            let mut record_key = old_key.derive_record_key(record.id)?;
            let outcome = envelope::decrypt(&record_key, &record.ciphertext, &record.nonce);
            record_key.zeroize();
            items.push(RotationItem {
                id: record.id,
                version: record.version,
                original_ciphertext: record.ciphertext.clone(),
                original_nonce: record.nonce.clone(),
                original_updated_at: record.updated_at,
                plaintext: Zeroizing::new(outcome?),
            });
            report(
                progress,
                RotationPhase::Decrypting,
                i + 1,
                total,
                format!("decrypted {} of {total}", i + 1),
            );
        }
        drop(old_key);

        // 4. Derive the new key and verification token.  KDF params
        //    come from the current settings, so rotation doubles as a
        //    parameter upgrade for old profiles.
        let new_salt = if options.keep_salt {
            profile.salt.clone()
        } else {
            kdf::generate_salt().to_vec()
        };
        let salt_rotated = !options.keep_salt;
        let params = self.settings.argon2_params();
        let new_key = self
            .derive_key_blocking(new_passphrase, &new_salt, params)
            .await?;
        let new_token = verifier::create_token(&new_key)?;

        // 5. Re-encrypt each plaintext under the new key.  Still no
        //    writes; a failure here leaves the vault untouched.
        report(
            progress,
            RotationPhase::Reencrypting,
            0,
            total,
            "re-encrypting under the new key",
        );
        let mut reencrypted: Vec<(Vec<u8>, [u8; NONCE_LEN])> = Vec::with_capacity(total);
        for (i, item) in items.iter().enumerate() {
            let mut record_key = new_key.derive_record_key(item.id)?;
            let sealed = envelope::encrypt(&record_key, &item.plaintext);
            record_key.zeroize();
            reencrypted.push(sealed?);
            report(
                progress,
                RotationPhase::Reencrypting,
                i + 1,
                total,
                format!("re-encrypted {} of {total}", i + 1),
            );
        }

        // 6. Persist the new ciphertexts one at a time.  On a failure
        //    partway through, restore every record already written.
        report(
            progress,
            RotationPhase::Updating,
            0,
            total,
            "persisting re-encrypted records",
        );
        let now = Utc::now();
        for (i, item) in items.iter().enumerate() {
            let (ciphertext, nonce) = &reencrypted[i];
            let patch = CredentialPatch {
                ciphertext: Some(ciphertext.clone()),
                nonce: Some(nonce.to_vec()),
                version: Some(item.version + 1),
                updated_at: Some(now),
                ..CredentialPatch::default()
            };
            if let Err(e) = self.credentials.update(user.id, item.id, &patch).await {
                warn!(
                    credential_id = %item.id,
                    error = %e,
                    "rotation write failed, rolling back"
                );
                let unrestored = self.restore_originals(user.id, &items[..i]).await;
                if unrestored.is_empty() {
                    return Err(VaultError::RotationFailed {
                        phase: RotationPhase::Updating,
                        reason: format!("could not persist record {}: {e}", item.id),
                    });
                }
                return Err(VaultError::RollbackFailed {
                    phase: RotationPhase::Updating,
                    unrestored,
                });
            }
            report(
                progress,
                RotationPhase::Updating,
                i + 1,
                total,
                format!("updated {} of {total}", i + 1),
            );
        }

        // 7. Swap the profile to the new salt, params, and token.  If
        //    this fails the records are already under the new key, so
        //    they must all be rolled back.
        report(
            progress,
            RotationPhase::Finalizing,
            total,
            total,
            "updating profile verification data",
        );
        let mut updated_profile = profile.clone();
        updated_profile.salt = new_salt.clone();
        updated_profile.kdf = StoredArgon2Params::from(params);
        updated_profile.verification = AccountVerification::Verified(new_token);
        updated_profile.updated_at = now;
        if let Err(e) = self.profiles.save(&updated_profile).await {
            warn!(user_id = %user.id, error = %e, "profile write failed, rolling back");
            let unrestored = self.restore_originals(user.id, &items).await;
            if unrestored.is_empty() {
                return Err(VaultError::RotationFailed {
                    phase: RotationPhase::Finalizing,
                    reason: format!("could not persist profile: {e}"),
                });
            }
            return Err(VaultError::RollbackFailed {
                phase: RotationPhase::Finalizing,
                unrestored,
            });
        }

        // 8. Swap the live session key.  Non-fatal: the user can
        //    always unlock again with the new passphrase.
        let mut session_updated = false;
        match session {
            Some(session) if session.user_id() == user.id => {
                session.install_key(new_key, new_salt.clone());
                session_updated = true;
            }
            Some(session) => {
                warn!(
                    expected = %user.id,
                    actual = %session.user_id(),
                    "session belongs to another user, key not installed"
                );
            }
            None => {}
        }

        // 9. Done.
        report(progress, RotationPhase::Done, total, total, "rotation complete");
        info!(
            user_id = %user.id,
            credentials = total,
            salt_rotated,
            session_updated,
            "master password rotated"
        );
        Ok(RotationOutcome {
            credentials_updated: total,
            verification_replaced: true,
            session_updated,
            salt: new_salt,
            salt_rotated,
        })
    }

    /// Put each record back exactly as snapshotted.  Returns the ids
    /// that could not be restored; those are left encrypted under the
    /// new key and need manual remediation.
    async fn restore_originals(&self, user_id: Uuid, items: &[RotationItem]) -> Vec<Uuid> {
        let mut unrestored = Vec::new();
        for item in items {
            let patch = CredentialPatch {
                ciphertext: Some(item.original_ciphertext.clone()),
                nonce: Some(item.original_nonce.clone()),
                version: Some(item.version),
                updated_at: Some(item.original_updated_at),
                ..CredentialPatch::default()
            };
            if let Err(e) = self.credentials.update(user_id, item.id, &patch).await {
                warn!(credential_id = %item.id, error = %e, "record could not be restored");
                unrestored.push(item.id);
            }
        }
        unrestored
    }
}

fn report(
    sink: &dyn ProgressSink,
    phase: RotationPhase,
    processed: usize,
    total: usize,
    message: impl Into<String>,
) {
    sink.report(&RotationProgress {
        phase,
        processed,
        total,
        message: message.into(),
    });
}

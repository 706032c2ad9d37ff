//! Vault statistics and the health score.
//!
//! Statistics are computed over the caller's live records in one pass.
//! Records that fail to decrypt are counted separately and excluded
//! from every quality ratio, so one corrupted row lowers coverage but
//! never skews the score.

use std::collections::HashMap;

use chrono::Utc;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::errors::Result;
use crate::session::VaultSession;
use crate::store::{CredentialFilter, PasswordHistoryEntry};
use crate::vault::engine::VaultEngine;
use crate::vault::record::ExpiryStatus;
use crate::vault::strength::score_password;

/// Snapshot of vault health for one user.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VaultStats {
    /// Live (not soft-deleted) records.
    pub total: usize,
    /// Records whose payload decrypted and decoded.
    pub analyzed: usize,
    /// Records skipped because decryption failed.
    pub failed_decrypts: usize,
    pub weak_count: usize,
    pub reused_count: usize,
    pub expired_count: usize,
    pub expiring_soon_count: usize,
    pub active_count: usize,
    /// Mean strength score of analyzed records, 0.0 when none.
    pub average_strength: f64,
    /// Live record count per category.
    pub by_category: HashMap<String, usize>,
    pub most_accessed: Option<MostAccessedCredential>,
    /// 0..=100, higher is healthier.
    pub health_score: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MostAccessedCredential {
    pub id: Uuid,
    pub site: String,
    pub access_count: u64,
}

impl VaultEngine {
    /// Compute statistics over the session user's live records.
    ///
    /// Expiry is re-evaluated against the current clock rather than
    /// trusting the persisted status, so a record that lapsed since
    /// its last write is still counted as expired.
    pub async fn stats(&self, session: &VaultSession) -> Result<VaultStats> {
        let records = self
            .credentials
            .find_by_user(session.user_id(), &CredentialFilter::default())
            .await?;
        let now = Utc::now();
        let warning_days = self.settings.expiry_warning_days;
        let weak_threshold = self.settings.weak_strength_threshold;

        let total = records.len();
        let mut analyzed = 0usize;
        let mut failed_decrypts = 0usize;
        let mut weak_count = 0usize;
        let mut expired_count = 0usize;
        let mut expiring_soon_count = 0usize;
        let mut active_count = 0usize;
        let mut strength_sum = 0u64;
        let mut by_category: HashMap<String, usize> = HashMap::new();
        let mut fingerprints: Vec<String> = Vec::new();
        let mut most_accessed: Option<MostAccessedCredential> = None;

        for record in &records {
            *by_category.entry(record.category.clone()).or_insert(0) += 1;

            let data = match self.decrypt_data(session.key(), record) {
                Ok(data) => data,
                Err(e) => {
                    failed_decrypts += 1;
                    warn!(credential_id = %record.id, error = %e, "record skipped in stats");
                    continue;
                }
            };
            analyzed += 1;

            let strength = score_password(&data.password);
            strength_sum += u64::from(strength);
            if strength < weak_threshold {
                weak_count += 1;
            }
            fingerprints.push(PasswordHistoryEntry::fingerprint(&data.password));

            match record.expiry_status_at(now, warning_days) {
                ExpiryStatus::Expired => expired_count += 1,
                ExpiryStatus::ExpiringSoon => expiring_soon_count += 1,
                ExpiryStatus::Active => active_count += 1,
            }

            let leads = most_accessed
                .as_ref()
                .map_or(true, |top| record.access_count > top.access_count);
            if leads {
                most_accessed = Some(MostAccessedCredential {
                    id: record.id,
                    site: data.site.clone(),
                    access_count: record.access_count,
                });
            }
        }

        // A password is reused when its fingerprint appears on more
        // than one analyzed record; every such record counts.
        let mut seen: HashMap<&str, usize> = HashMap::new();
        for fp in &fingerprints {
            *seen.entry(fp.as_str()).or_insert(0) += 1;
        }
        let reused_count = fingerprints
            .iter()
            .filter(|fp| seen[fp.as_str()] > 1)
            .count();

        let average_strength = if analyzed == 0 {
            0.0
        } else {
            strength_sum as f64 / analyzed as f64
        };
        let health_score = health_score(
            analyzed,
            weak_count,
            reused_count,
            expired_count,
            average_strength,
        );

        Ok(VaultStats {
            total,
            analyzed,
            failed_decrypts,
            weak_count,
            reused_count,
            expired_count,
            expiring_soon_count,
            active_count,
            average_strength,
            by_category,
            most_accessed,
            health_score,
        })
    }
}

/// Health score over the analyzed records.
///
/// Starts at 100, loses up to 30 points each for the weak and reused
/// ratios, up to 20 for the expired ratio, and earns back up to 20 for
/// average strength.  An empty (or fully unreadable) vault has nothing
/// wrong with it and scores 100.
fn health_score(
    analyzed: usize,
    weak: usize,
    reused: usize,
    expired: usize,
    average_strength: f64,
) -> u8 {
    if analyzed == 0 {
        return 100;
    }
    let n = analyzed as f64;
    let score = 100.0 - 30.0 * (weak as f64 / n) - 30.0 * (reused as f64 / n)
        - 20.0 * (expired as f64 / n)
        + 20.0 * (average_strength / 4.0);
    score.clamp(0.0, 100.0).round() as u8
}

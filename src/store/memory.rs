//! In-memory store implementations.
//!
//! Reference backends over `tokio::sync::RwLock`-guarded maps.  They
//! power the test suite and are useful for embedding or prototyping;
//! production deployments implement the traits over a real database.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::store::{
    CredentialFilter, CredentialPatch, CredentialRepository, HistoryStore, PasswordHistoryEntry,
    ProfileStore, StoreError, StoreResult, UserProfile,
};
use crate::vault::record::CredentialRecord;

/// Credential records held in a hash map, keyed by record id.
#[derive(Default)]
pub struct MemoryCredentialRepository {
    records: RwLock<HashMap<Uuid, CredentialRecord>>,
}

impl MemoryCredentialRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialRepository for MemoryCredentialRepository {
    async fn find_by_id(&self, user_id: Uuid, id: Uuid) -> StoreResult<Option<CredentialRecord>> {
        let records = self.records.read().await;
        Ok(records
            .get(&id)
            .filter(|r| r.user_id == user_id)
            .cloned())
    }

    async fn find_by_user(
        &self,
        user_id: Uuid,
        filter: &CredentialFilter,
    ) -> StoreResult<Vec<CredentialRecord>> {
        let records = self.records.read().await;
        let mut out: Vec<CredentialRecord> = records
            .values()
            .filter(|r| r.user_id == user_id && filter.matches(r))
            .cloned()
            .collect();
        // Deterministic order for callers and tests.
        out.sort_by_key(|r| (r.created_at, r.id));
        Ok(out)
    }

    async fn find_all_by_user(&self, user_id: Uuid) -> StoreResult<Vec<CredentialRecord>> {
        let records = self.records.read().await;
        let mut out: Vec<CredentialRecord> = records
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect();
        out.sort_by_key(|r| (r.created_at, r.id));
        Ok(out)
    }

    async fn create(&self, record: &CredentialRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::new(format!(
                "credential {} already exists",
                record.id
            )));
        }
        records.insert(record.id, record.clone());
        Ok(())
    }

    async fn update(&self, user_id: Uuid, id: Uuid, patch: &CredentialPatch) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .filter(|r| r.user_id == user_id)
            .ok_or_else(|| StoreError::new(format!("credential {id} not found")))?;
        patch.apply(record);
        Ok(())
    }

    async fn delete(&self, user_id: Uuid, id: Uuid) -> StoreResult<()> {
        let mut records = self.records.write().await;
        match records.get(&id) {
            Some(r) if r.user_id == user_id => {
                records.remove(&id);
                Ok(())
            }
            _ => Err(StoreError::new(format!("credential {id} not found"))),
        }
    }

    async fn count(&self, user_id: Uuid) -> StoreResult<usize> {
        let records = self.records.read().await;
        Ok(records
            .values()
            .filter(|r| r.user_id == user_id && !r.deleted)
            .count())
    }

    async fn increment_access_count(&self, user_id: Uuid, id: Uuid) -> StoreResult<()> {
        let mut records = self.records.write().await;
        let record = records
            .get_mut(&id)
            .filter(|r| r.user_id == user_id)
            .ok_or_else(|| StoreError::new(format!("credential {id} not found")))?;
        record.access_count += 1;
        Ok(())
    }
}

/// User profiles held in a hash map, keyed by user id.
#[derive(Default)]
pub struct MemoryProfileStore {
    profiles: RwLock<HashMap<Uuid, UserProfile>>,
}

impl MemoryProfileStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn load(&self, user_id: Uuid) -> StoreResult<Option<UserProfile>> {
        let profiles = self.profiles.read().await;
        Ok(profiles.get(&user_id).cloned())
    }

    async fn save(&self, profile: &UserProfile) -> StoreResult<()> {
        let mut profiles = self.profiles.write().await;
        profiles.insert(profile.user_id, profile.clone());
        Ok(())
    }
}

/// Append-only history entries in a plain vector.
#[derive(Default)]
pub struct MemoryHistoryStore {
    entries: RwLock<Vec<PasswordHistoryEntry>>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries for one credential, oldest first.  Not part of the
    /// trait; tests and embedders use it for inspection.
    pub async fn entries_for(&self, user_id: Uuid, credential_id: Uuid) -> Vec<PasswordHistoryEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .filter(|e| e.user_id == user_id && e.credential_id == credential_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    async fn add_entry(&self, entry: &PasswordHistoryEntry) -> StoreResult<()> {
        let mut entries = self.entries.write().await;
        entries.push(entry.clone());
        Ok(())
    }

    async fn check_reuse(
        &self,
        user_id: Uuid,
        password_hash: &str,
        exclude: Option<Uuid>,
    ) -> StoreResult<bool> {
        let entries = self.entries.read().await;
        Ok(entries.iter().any(|e| {
            e.user_id == user_id
                && e.password_hash == password_hash
                && exclude != Some(e.credential_id)
        }))
    }
}

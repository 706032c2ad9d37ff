//! Integration tests for master password rotation.
//!
//! The failure-path tests inject storage faults through thin wrappers
//! around the in-memory stores, then check the rollback contract: the
//! vault must never be left half under the old key and half under the
//! new one.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use uuid::Uuid;

use credvault::config::Settings;
use credvault::errors::VaultError;
use credvault::rotation::{
    NoProgress, ProgressFn, RotationOptions, RotationPhase, RotationProgress,
};
use credvault::session::{AuthenticatedUser, VaultSession};
use credvault::store::memory::{
    MemoryCredentialRepository, MemoryHistoryStore, MemoryProfileStore,
};
use credvault::store::{
    CredentialFilter, CredentialPatch, CredentialRepository, ProfileStore, StoreError,
    StoreResult, UserProfile,
};
use credvault::vault::{CreateCredentialInput, CredentialRecord, VaultEngine};

const OLD: &str = "original-master-pass";
const NEW: &str = "rotated-master-pass";

fn fast_settings() -> Settings {
    Settings {
        argon2_memory_kib: 8_192,
        argon2_iterations: 2,
        argon2_parallelism: 1,
        ..Settings::default()
    }
}

// ---------------------------------------------------------------------------
// Fault-injecting store wrappers
// ---------------------------------------------------------------------------

/// When `FlakyRepository::update` should fail, counted per call.
#[derive(Clone, Copy)]
enum UpdateFailure {
    Never,
    OnCall(usize),
    FromCall(usize),
}

/// Wraps the in-memory repository and fails `update` on command.
struct FlakyRepository {
    inner: MemoryCredentialRepository,
    failure: Mutex<UpdateFailure>,
    update_calls: AtomicUsize,
}

impl FlakyRepository {
    fn new() -> Self {
        Self {
            inner: MemoryCredentialRepository::new(),
            failure: Mutex::new(UpdateFailure::Never),
            update_calls: AtomicUsize::new(0),
        }
    }

    /// Fail exactly the n-th update call (0-based); all others succeed.
    fn fail_on_call(&self, call: usize) {
        *self.failure.lock().unwrap() = UpdateFailure::OnCall(call);
    }

    /// Fail the n-th update call and every one after it.
    fn fail_from_call(&self, call: usize) {
        *self.failure.lock().unwrap() = UpdateFailure::FromCall(call);
    }
}

#[async_trait]
impl CredentialRepository for FlakyRepository {
    async fn find_by_id(&self, user_id: Uuid, id: Uuid) -> StoreResult<Option<CredentialRecord>> {
        self.inner.find_by_id(user_id, id).await
    }

    async fn find_by_user(
        &self,
        user_id: Uuid,
        filter: &CredentialFilter,
    ) -> StoreResult<Vec<CredentialRecord>> {
        self.inner.find_by_user(user_id, filter).await
    }

    async fn find_all_by_user(&self, user_id: Uuid) -> StoreResult<Vec<CredentialRecord>> {
        self.inner.find_all_by_user(user_id).await
    }

    async fn create(&self, record: &CredentialRecord) -> StoreResult<()> {
        self.inner.create(record).await
    }

    async fn update(&self, user_id: Uuid, id: Uuid, patch: &CredentialPatch) -> StoreResult<()> {
        let call = self.update_calls.fetch_add(1, Ordering::SeqCst);
        let fail = match *self.failure.lock().unwrap() {
            UpdateFailure::Never => false,
            UpdateFailure::OnCall(n) => call == n,
            UpdateFailure::FromCall(n) => call >= n,
        };
        if fail {
            return Err(StoreError::new("injected update failure"));
        }
        self.inner.update(user_id, id, patch).await
    }

    async fn delete(&self, user_id: Uuid, id: Uuid) -> StoreResult<()> {
        self.inner.delete(user_id, id).await
    }

    async fn count(&self, user_id: Uuid) -> StoreResult<usize> {
        self.inner.count(user_id).await
    }

    async fn increment_access_count(&self, user_id: Uuid, id: Uuid) -> StoreResult<()> {
        self.inner.increment_access_count(user_id, id).await
    }
}

/// Wraps the in-memory profile store; `save` fails while armed.
struct FailingProfileStore {
    inner: MemoryProfileStore,
    fail_saves: AtomicBool,
}

impl FailingProfileStore {
    fn new() -> Self {
        Self {
            inner: MemoryProfileStore::new(),
            fail_saves: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl ProfileStore for FailingProfileStore {
    async fn load(&self, user_id: Uuid) -> StoreResult<Option<UserProfile>> {
        self.inner.load(user_id).await
    }

    async fn save(&self, profile: &UserProfile) -> StoreResult<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(StoreError::new("injected profile failure"));
        }
        self.inner.save(profile).await
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct RotationVault {
    engine: VaultEngine,
    credentials: Arc<FlakyRepository>,
    profiles: Arc<FailingProfileStore>,
    user: AuthenticatedUser,
    session: VaultSession,
}

/// Build a vault with `records` credentials and disarmed fault
/// injectors.  Returns the record ids in store order, which is also
/// the order rotation walks them.
async fn rotation_vault(records: usize) -> (RotationVault, Vec<Uuid>) {
    let credentials = Arc::new(FlakyRepository::new());
    let profiles = Arc::new(FailingProfileStore::new());
    let engine = VaultEngine::new(
        credentials.clone(),
        profiles.clone(),
        Arc::new(MemoryHistoryStore::new()),
        fast_settings(),
    );
    let user = AuthenticatedUser::new(Uuid::new_v4());
    let session = engine.setup(&user, OLD).await.expect("setup");

    for i in 0..records {
        let input = CreateCredentialInput {
            site: format!("site-{i}.example"),
            username: format!("user-{i}@example.com"),
            password: format!("Secret-{i}-Pass!x"),
            ..CreateCredentialInput::default()
        };
        engine.create(&session, input).await.expect("create");
    }
    let order: Vec<Uuid> = engine
        .list(
            &session,
            &CredentialFilter {
                include_deleted: true,
                ..CredentialFilter::default()
            },
        )
        .await
        .expect("list")
        .iter()
        .map(|r| r.id)
        .collect();

    (
        RotationVault {
            engine,
            credentials,
            profiles,
            user,
            session,
        },
        order,
    )
}

async fn versions(vault: &RotationVault) -> Vec<u64> {
    vault
        .engine
        .list(
            &vault.session,
            &CredentialFilter {
                include_deleted: true,
                ..CredentialFilter::default()
            },
        )
        .await
        .expect("list")
        .iter()
        .map(|r| r.version)
        .collect()
}

/// Collapse a progress stream into the distinct phases in arrival
/// order.
fn phase_sequence(events: &[RotationProgress]) -> Vec<RotationPhase> {
    let mut sequence = Vec::new();
    for event in events {
        if sequence.last() != Some(&event.phase) {
            sequence.push(event.phase);
        }
    }
    sequence
}

// ---------------------------------------------------------------------------
// Happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rotation_reencrypts_every_record() {
    let (vault, order) = rotation_vault(5).await;
    let events: Arc<Mutex<Vec<RotationProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_events = events.clone();
    let sink = ProgressFn(move |p: &RotationProgress| {
        sink_events.lock().unwrap().push(p.clone());
    });

    let outcome = vault
        .engine
        .rotate_master_password(
            &vault.user,
            OLD,
            NEW,
            &RotationOptions::default(),
            None,
            &sink,
        )
        .await
        .expect("rotate");

    assert_eq!(outcome.credentials_updated, 5);
    assert!(outcome.verification_replaced);
    assert!(outcome.salt_rotated);
    assert!(!outcome.session_updated, "no session was passed in");

    // The old passphrase is dead, the new one unlocks.
    let old = vault.engine.unlock(&vault.user, OLD).await;
    assert!(matches!(old, Err(VaultError::InvalidPassphrase)));
    let session = vault.engine.unlock(&vault.user, NEW).await.expect("unlock");

    // Every record decrypts unchanged under the new key, one version
    // up.
    let mut seen: Vec<(String, String)> = Vec::new();
    for id in &order {
        let detail = vault.engine.get(&session, *id).await.expect("get");
        assert_eq!(detail.record.version, 2);
        seen.push((detail.data.site.clone(), detail.data.password.clone()));
    }
    seen.sort();
    let expected: Vec<(String, String)> = (0..5)
        .map(|i| (format!("site-{i}.example"), format!("Secret-{i}-Pass!x")))
        .collect();
    assert_eq!(seen, expected);

    // Phases arrive strictly in protocol order, with per-record ticks
    // in the bulk phases.
    let events = events.lock().unwrap();
    assert_eq!(
        phase_sequence(&events),
        vec![
            RotationPhase::Verifying,
            RotationPhase::Fetching,
            RotationPhase::Decrypting,
            RotationPhase::Reencrypting,
            RotationPhase::Updating,
            RotationPhase::Finalizing,
            RotationPhase::Done,
        ]
    );
    for phase in [
        RotationPhase::Decrypting,
        RotationPhase::Reencrypting,
        RotationPhase::Updating,
    ] {
        let ticks: Vec<usize> = events
            .iter()
            .filter(|e| e.phase == phase && e.processed > 0)
            .map(|e| e.processed)
            .collect();
        assert_eq!(ticks, vec![1, 2, 3, 4, 5], "per-record ticks for {phase}");
    }
    let last = events.last().expect("at least one event");
    assert_eq!(last.phase, RotationPhase::Done);
    assert_eq!((last.processed, last.total), (5, 5));
}

#[tokio::test]
async fn rotation_with_wrong_passphrase_touches_nothing() {
    let (vault, _) = rotation_vault(3).await;
    let events: Arc<Mutex<Vec<RotationProgress>>> = Arc::new(Mutex::new(Vec::new()));
    let sink_events = events.clone();
    let sink = ProgressFn(move |p: &RotationProgress| {
        sink_events.lock().unwrap().push(p.clone());
    });

    let result = vault
        .engine
        .rotate_master_password(
            &vault.user,
            "not-the-passphrase",
            NEW,
            &RotationOptions::default(),
            None,
            &sink,
        )
        .await;
    assert!(matches!(result, Err(VaultError::InvalidPassphrase)));

    // Zero side effects: versions intact, old passphrase still works,
    // and the protocol never got past verifying.
    assert_eq!(versions(&vault).await, vec![1, 1, 1]);
    vault.engine.unlock(&vault.user, OLD).await.expect("unlock");
    let events = events.lock().unwrap();
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.phase == RotationPhase::Verifying));
}

#[tokio::test]
async fn rotation_keeping_the_salt_preserves_it() {
    let (vault, order) = rotation_vault(5).await;
    let before = vault.profiles.load(vault.user.id).await.unwrap().unwrap();

    let outcome = vault
        .engine
        .rotate_master_password(
            &vault.user,
            OLD,
            NEW,
            &RotationOptions { keep_salt: true },
            None,
            &NoProgress,
        )
        .await
        .expect("rotate");

    assert!(!outcome.salt_rotated);
    assert_eq!(outcome.salt, before.salt);
    let after = vault.profiles.load(vault.user.id).await.unwrap().unwrap();
    assert_eq!(after.salt, before.salt);

    // Same salt, new passphrase: the old one no longer validates.
    assert!(matches!(
        vault.engine.unlock(&vault.user, OLD).await,
        Err(VaultError::InvalidPassphrase)
    ));
    let session = vault.engine.unlock(&vault.user, NEW).await.expect("unlock");
    for id in &order {
        vault.engine.get(&session, *id).await.expect("get");
    }
}

#[tokio::test]
async fn rotation_swaps_the_live_session_key() {
    let (mut vault, order) = rotation_vault(2).await;

    let outcome = vault
        .engine
        .rotate_master_password(
            &vault.user,
            OLD,
            NEW,
            &RotationOptions::default(),
            Some(&mut vault.session),
            &NoProgress,
        )
        .await
        .expect("rotate");
    assert!(outcome.session_updated);

    // The live session decrypts under the new key without re-unlock.
    for id in &order {
        vault.engine.get(&vault.session, *id).await.expect("get");
    }
}

#[tokio::test]
async fn rotation_ignores_a_session_for_another_user() {
    let (vault, _) = rotation_vault(1).await;

    let other = AuthenticatedUser::new(Uuid::new_v4());
    let mut other_session = vault
        .engine
        .setup(&other, "other-master-pass")
        .await
        .expect("setup");

    let outcome = vault
        .engine
        .rotate_master_password(
            &vault.user,
            OLD,
            NEW,
            &RotationOptions::default(),
            Some(&mut other_session),
            &NoProgress,
        )
        .await
        .expect("rotate");

    assert!(
        !outcome.session_updated,
        "another user's session must not be touched"
    );
}

#[tokio::test]
async fn rotation_includes_soft_deleted_records() {
    let (vault, order) = rotation_vault(2).await;
    vault
        .engine
        .delete(&vault.session, order[1], false)
        .await
        .expect("soft delete");

    let outcome = vault
        .engine
        .rotate_master_password(
            &vault.user,
            OLD,
            NEW,
            &RotationOptions::default(),
            None,
            &NoProgress,
        )
        .await
        .expect("rotate");
    assert_eq!(outcome.credentials_updated, 2, "soft-deleted records rotate too");

    // Both records moved to the new key together.
    assert_eq!(versions(&vault).await, vec![2, 2]);
    let session = vault.engine.unlock(&vault.user, NEW).await.expect("unlock");
    vault
        .engine
        .get(&session, order[0])
        .await
        .expect("get live record");
}

#[tokio::test]
async fn full_lifecycle_survives_rotation() {
    let (mut vault, order) = rotation_vault(3).await;

    // The vault is in real use before the rotation.
    let hits = vault
        .engine
        .search(&vault.session, "site-1")
        .await
        .expect("search");
    assert_eq!(hits.len(), 1);
    let before = vault.engine.stats(&vault.session).await.expect("stats");
    assert_eq!(before.total, 3);
    assert_eq!(before.analyzed, 3);
    assert_eq!(before.health_score, 100);

    let outcome = vault
        .engine
        .rotate_master_password(
            &vault.user,
            OLD,
            NEW,
            &RotationOptions::default(),
            Some(&mut vault.session),
            &NoProgress,
        )
        .await
        .expect("rotate");
    assert!(outcome.session_updated);

    // Same session object, new key: search and stats still see
    // everything.
    let hits = vault
        .engine
        .search(&vault.session, "site-1")
        .await
        .expect("search");
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].data.password, "Secret-1-Pass!x");
    let after = vault.engine.stats(&vault.session).await.expect("stats");
    assert_eq!(after.analyzed, 3);
    assert_eq!(after.health_score, before.health_score);

    // A fresh unlock with the new passphrase reads them all too.
    let session = vault.engine.unlock(&vault.user, NEW).await.expect("unlock");
    for id in &order {
        vault.engine.get(&session, *id).await.expect("get");
    }
}

// ---------------------------------------------------------------------------
// Failure paths and rollback
// ---------------------------------------------------------------------------

#[tokio::test]
async fn undecryptable_record_aborts_rotation_before_any_write() {
    let (vault, order) = rotation_vault(3).await;

    // Corrupt one stored ciphertext behind the engine's back.
    let patch = CredentialPatch {
        ciphertext: Some(vec![0u8; 48]),
        ..CredentialPatch::default()
    };
    vault
        .credentials
        .update(vault.user.id, order[1], &patch)
        .await
        .expect("corrupt");
    let before = vault.profiles.load(vault.user.id).await.unwrap().unwrap();

    let result = vault
        .engine
        .rotate_master_password(
            &vault.user,
            OLD,
            NEW,
            &RotationOptions::default(),
            None,
            &NoProgress,
        )
        .await;
    assert!(matches!(result, Err(VaultError::DecryptionFailed)));

    // The abort came before any write: versions and the profile's salt
    // and token are all as before.
    assert_eq!(versions(&vault).await, vec![1, 1, 1]);
    let after = vault.profiles.load(vault.user.id).await.unwrap().unwrap();
    assert_eq!(after.salt, before.salt);
    assert_eq!(after.verification, before.verification);

    // The old passphrase still unlocks and reads the intact records;
    // the new one never took effect.
    let session = vault.engine.unlock(&vault.user, OLD).await.expect("unlock");
    vault
        .engine
        .get(&session, order[0])
        .await
        .expect("get intact record");
    assert!(matches!(
        vault.engine.unlock(&vault.user, NEW).await,
        Err(VaultError::InvalidPassphrase)
    ));
}

#[tokio::test]
async fn update_failure_rolls_back_and_names_the_phase() {
    let (vault, order) = rotation_vault(5).await;
    // Two records persist, the third write fails, and the writes after
    // that (the rollback's) succeed.
    vault.credentials.fail_on_call(2);

    let result = vault
        .engine
        .rotate_master_password(
            &vault.user,
            OLD,
            NEW,
            &RotationOptions::default(),
            None,
            &NoProgress,
        )
        .await;
    assert!(matches!(
        result,
        Err(VaultError::RotationFailed {
            phase: RotationPhase::Updating,
            ..
        })
    ));

    // Rollback put everything back: all five decrypt under the
    // original passphrase at their original version.
    assert_eq!(versions(&vault).await, vec![1; 5]);
    let session = vault.engine.unlock(&vault.user, OLD).await.expect("unlock");
    for id in &order {
        vault.engine.get(&session, *id).await.expect("get");
    }

    // The new passphrase never took effect.
    assert!(matches!(
        vault.engine.unlock(&vault.user, NEW).await,
        Err(VaultError::InvalidPassphrase)
    ));
}

#[tokio::test]
async fn failed_rollback_reports_the_unrestored_ids() {
    let (vault, order) = rotation_vault(5).await;
    // Calls 0 and 1 put records under the new key; every write after
    // that fails, including the rollback's restore attempts.
    vault.credentials.fail_from_call(2);

    let result = vault
        .engine
        .rotate_master_password(
            &vault.user,
            OLD,
            NEW,
            &RotationOptions::default(),
            None,
            &NoProgress,
        )
        .await;

    let (phase, mut reported) = match result {
        Err(VaultError::RollbackFailed { phase, unrestored }) => (phase, unrestored),
        other => panic!("expected RollbackFailed, got {other:?}"),
    };
    assert_eq!(phase, RotationPhase::Updating);

    // Exactly the records stranded under the new key are reported.
    reported.sort();
    let mut expected = vec![order[0], order[1]];
    expected.sort();
    assert_eq!(reported, expected);
}

#[tokio::test]
async fn finalize_failure_rolls_back_every_record() {
    let (vault, order) = rotation_vault(3).await;
    vault.profiles.fail_saves.store(true, Ordering::SeqCst);

    let result = vault
        .engine
        .rotate_master_password(
            &vault.user,
            OLD,
            NEW,
            &RotationOptions::default(),
            None,
            &NoProgress,
        )
        .await;
    assert!(matches!(
        result,
        Err(VaultError::RotationFailed {
            phase: RotationPhase::Finalizing,
            ..
        })
    ));

    // The records were already re-encrypted when the profile write
    // failed, so every one of them must have been restored.
    vault.profiles.fail_saves.store(false, Ordering::SeqCst);
    assert_eq!(versions(&vault).await, vec![1, 1, 1]);
    let session = vault.engine.unlock(&vault.user, OLD).await.expect("unlock");
    for id in &order {
        vault.engine.get(&session, *id).await.expect("get");
    }
}

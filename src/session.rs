//! Session and identity value objects.
//!
//! A `VaultSession` is the only holder of a derived master key.  The
//! caller owns it and passes it by reference into every engine
//! operation; there is no global or thread-local session state.  The
//! key is zeroed when the session drops.

use std::fmt;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::crypto::keys::MasterKey;

/// The authenticated user on whose behalf the vault operates.
///
/// Authentication itself happens upstream; the engine only needs a
/// stable identity to scope storage access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: Uuid,
}

impl AuthenticatedUser {
    pub fn new(id: Uuid) -> Self {
        Self { id }
    }
}

/// An unlocked vault: user identity plus the derived master key and
/// the salt it was derived with.
pub struct VaultSession {
    user: AuthenticatedUser,
    key: MasterKey,
    salt: Vec<u8>,
    unlocked_at: DateTime<Utc>,
}

impl VaultSession {
    pub(crate) fn new(user: AuthenticatedUser, key: MasterKey, salt: Vec<u8>) -> Self {
        Self {
            user,
            key,
            salt,
            unlocked_at: Utc::now(),
        }
    }

    pub fn user(&self) -> &AuthenticatedUser {
        &self.user
    }

    pub fn user_id(&self) -> Uuid {
        self.user.id
    }

    /// The salt the current key was derived from.
    pub fn salt(&self) -> &[u8] {
        &self.salt
    }

    pub fn unlocked_at(&self) -> DateTime<Utc> {
        self.unlocked_at
    }

    pub(crate) fn key(&self) -> &MasterKey {
        &self.key
    }

    /// Swap in a new key + salt after a successful master-password
    /// rotation.  The old key is zeroed as it drops.
    pub(crate) fn install_key(&mut self, key: MasterKey, salt: Vec<u8>) {
        self.key = key;
        self.salt = salt;
    }
}

// Sessions hold key material; keep it out of debug output.
impl fmt::Debug for VaultSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VaultSession")
            .field("user", &self.user)
            .field("key", &"[REDACTED]")
            .field("unlocked_at", &self.unlocked_at)
            .finish()
    }
}

//! Vault module: encrypted credential storage.
//!
//! This module provides:
//! - `CredentialRecord`, payload, and input types (`record`)
//! - JSON payload codec with sanitization and validation (`codec`)
//! - Password strength scoring (`strength`)
//! - High-level `VaultEngine` for unlock, CRUD, and search (`engine`)
//! - Vault statistics and the health score (`stats`)

pub mod codec;
pub mod engine;
pub mod record;
pub mod stats;
pub mod strength;

// Re-export the most commonly used items.
pub use engine::VaultEngine;
pub use record::{
    CreateCredentialInput, CredentialData, CredentialDetail, CredentialRecord, CustomField,
    ExpiryStatus, UpdateCredentialInput,
};
pub use stats::{MostAccessedCredential, VaultStats};
pub use strength::score_password;

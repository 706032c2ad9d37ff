use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, VaultError};

/// Vault policy configuration, loaded from `.credvault.toml`.
///
/// Every field has a sensible default so CredVault works out-of-the-box
/// without any config file at all.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Argon2 memory cost in KiB (default: 64 MB).
    #[serde(default = "default_argon2_memory_kib")]
    pub argon2_memory_kib: u32,

    /// Argon2 iteration count (default: 3).
    #[serde(default = "default_argon2_iterations")]
    pub argon2_iterations: u32,

    /// Argon2 parallelism degree (default: 4).
    #[serde(default = "default_argon2_parallelism")]
    pub argon2_parallelism: u32,

    /// Days until a stored password is considered expired (default: 90).
    #[serde(default = "default_password_expiry_days")]
    pub password_expiry_days: u32,

    /// Days before expiry at which a password counts as expiring soon
    /// (default: 14).
    #[serde(default = "default_expiry_warning_days")]
    pub expiry_warning_days: u32,

    /// Strength scores strictly below this count as weak in the vault
    /// statistics (default: 2, scale 0-4).
    #[serde(default = "default_weak_strength_threshold")]
    pub weak_strength_threshold: u8,
}

// ── Serde default helpers ────────────────────────────────────────────

fn default_argon2_memory_kib() -> u32 {
    65_536 // 64 MB
}

fn default_argon2_iterations() -> u32 {
    3
}

fn default_argon2_parallelism() -> u32 {
    4
}

fn default_password_expiry_days() -> u32 {
    90
}

fn default_expiry_warning_days() -> u32 {
    14
}

fn default_weak_strength_threshold() -> u8 {
    2
}

// ── Implementation ───────────────────────────────────────────────────

impl Default for Settings {
    fn default() -> Self {
        Self {
            argon2_memory_kib: default_argon2_memory_kib(),
            argon2_iterations: default_argon2_iterations(),
            argon2_parallelism: default_argon2_parallelism(),
            password_expiry_days: default_password_expiry_days(),
            expiry_warning_days: default_expiry_warning_days(),
            weak_strength_threshold: default_weak_strength_threshold(),
        }
    }
}

impl Settings {
    /// Name of the config file we look for in the given directory.
    const FILE_NAME: &'static str = ".credvault.toml";

    /// Upper bound for the expiry windows, a hundred years in days.
    /// Values past this overflow chrono's date arithmetic.
    const MAX_EXPIRY_DAYS: u32 = 36_500;

    /// Load settings from `<dir>/.credvault.toml`.
    ///
    /// If the file does not exist, sensible defaults are returned.
    /// If the file exists but cannot be parsed, an error is returned.
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(Self::FILE_NAME);

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&config_path).map_err(|e| {
            VaultError::ConfigError(format!("Failed to read {}: {e}", config_path.display()))
        })?;

        let settings: Settings = toml::from_str(&contents).map_err(|e| {
            VaultError::ConfigError(format!("Failed to parse {}: {e}", config_path.display()))
        })?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the vault policy cannot work with.
    ///
    /// The Argon2 floors are enforced separately by the KDF itself.
    pub fn validate(&self) -> Result<()> {
        if self.password_expiry_days == 0 {
            return Err(VaultError::ConfigError(
                "password_expiry_days must be at least 1".into(),
            ));
        }
        if self.password_expiry_days > Self::MAX_EXPIRY_DAYS {
            return Err(VaultError::ConfigError(format!(
                "password_expiry_days must be at most {} (got {})",
                Self::MAX_EXPIRY_DAYS,
                self.password_expiry_days
            )));
        }
        if self.expiry_warning_days > Self::MAX_EXPIRY_DAYS {
            return Err(VaultError::ConfigError(format!(
                "expiry_warning_days must be at most {} (got {})",
                Self::MAX_EXPIRY_DAYS,
                self.expiry_warning_days
            )));
        }
        if self.weak_strength_threshold > 4 {
            return Err(VaultError::ConfigError(format!(
                "weak_strength_threshold must be 0-4 (got {})",
                self.weak_strength_threshold
            )));
        }
        Ok(())
    }

    /// Convert the Argon2 settings into crypto-layer params.
    pub fn argon2_params(&self) -> crate::crypto::kdf::Argon2Params {
        crate::crypto::kdf::Argon2Params {
            memory_kib: self.argon2_memory_kib,
            iterations: self.argon2_iterations,
            parallelism: self.argon2_parallelism,
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

//! Encoding, validation, and sanitization of credential payloads.
//!
//! The codec is the boundary between typed `CredentialData` and the
//! byte blob handed to the envelope cipher.  Encoding is JSON; the
//! encrypted bytes never leave this crate unserialized, so the format
//! can evolve behind the cipher.

use crate::errors::{Result, VaultError};
use crate::vault::record::CredentialData;

// ---------------------------------------------------------------------------
// Field limits
// ---------------------------------------------------------------------------

/// Maximum length for site, username, url, and custom-field values.
const MAX_FIELD_LEN: usize = 1024;

/// Maximum length for free-form notes.
const MAX_NOTES_LEN: usize = 10_000;

/// Maximum length for a custom-field label.
const MAX_LABEL_LEN: usize = 256;

/// Maximum number of custom fields per credential.
const MAX_CUSTOM_FIELDS: usize = 50;

// ---------------------------------------------------------------------------
// Encode / decode
// ---------------------------------------------------------------------------

/// Serialize a credential payload to the plaintext blob that gets
/// encrypted.
pub fn encode(data: &CredentialData) -> Result<Vec<u8>> {
    serde_json::to_vec(data).map_err(|e| VaultError::CodecFailed(format!("encode: {e}")))
}

/// Deserialize a decrypted blob back into a credential payload.
///
/// Fails on anything that is not the JSON shape produced by `encode`;
/// never panics on garbage bytes.
pub fn decode(bytes: &[u8]) -> Result<CredentialData> {
    serde_json::from_slice(bytes).map_err(|e| VaultError::CodecFailed(format!("decode: {e}")))
}

// ---------------------------------------------------------------------------
// Sanitize / validate
// ---------------------------------------------------------------------------

/// Trim insignificant whitespace in place.
///
/// Notes are left untouched; their whitespace may be intentional.
pub fn sanitize(data: &mut CredentialData) {
    trim_in_place(&mut data.site);
    trim_in_place(&mut data.username);
    if let Some(url) = data.url.as_mut() {
        trim_in_place(url);
    }
    for field in &mut data.custom_fields {
        trim_in_place(&mut field.label);
    }
}

/// Check a payload against the field requirements and limits.
///
/// Call after `sanitize` so trimmed-to-empty input is caught.
pub fn validate(data: &CredentialData) -> Result<()> {
    if data.site.is_empty() {
        return Err(invalid("site", "must not be empty"));
    }
    if data.site.chars().count() > MAX_FIELD_LEN {
        return Err(too_long("site", MAX_FIELD_LEN));
    }
    if data.username.chars().count() > MAX_FIELD_LEN {
        return Err(too_long("username", MAX_FIELD_LEN));
    }
    if data.password.is_empty() {
        return Err(invalid("password", "must not be empty"));
    }
    if data.password.chars().count() > MAX_FIELD_LEN {
        return Err(too_long("password", MAX_FIELD_LEN));
    }
    if let Some(url) = &data.url {
        if url.chars().count() > MAX_FIELD_LEN {
            return Err(too_long("url", MAX_FIELD_LEN));
        }
    }
    if let Some(notes) = &data.notes {
        if notes.chars().count() > MAX_NOTES_LEN {
            return Err(too_long("notes", MAX_NOTES_LEN));
        }
    }
    if data.custom_fields.len() > MAX_CUSTOM_FIELDS {
        return Err(invalid(
            "custom_fields",
            format!("at most {MAX_CUSTOM_FIELDS} fields allowed"),
        ));
    }
    for field in &data.custom_fields {
        if field.label.is_empty() {
            return Err(invalid("custom_fields", "field labels must not be empty"));
        }
        if field.label.chars().count() > MAX_LABEL_LEN {
            return Err(too_long("custom_fields", MAX_LABEL_LEN));
        }
        if field.value.chars().count() > MAX_FIELD_LEN {
            return Err(too_long("custom_fields", MAX_FIELD_LEN));
        }
    }
    Ok(())
}

fn trim_in_place(s: &mut String) {
    let trimmed = s.trim();
    if trimmed.len() != s.len() {
        *s = trimmed.to_string();
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> VaultError {
    VaultError::ValidationFailed {
        field,
        reason: reason.into(),
    }
}

fn too_long(field: &'static str, max: usize) -> VaultError {
    invalid(field, format!("exceeds {max} characters"))
}

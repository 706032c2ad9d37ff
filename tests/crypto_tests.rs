//! Integration tests for the CredVault crypto module.

use credvault::crypto::{
    create_token, decrypt, derive_master_key_with_params, derive_record_key,
    derive_verification_key, encrypt, generate_salt, verify_passphrase, verify_token,
    Argon2Params, MasterKey, NONCE_LEN,
};
use uuid::Uuid;

/// Cheapest parameters the KDF accepts; tests never need more.
fn fast_params() -> Argon2Params {
    Argon2Params {
        memory_kib: 8_192,
        iterations: 2,
        parallelism: 1,
    }
}

// ---------------------------------------------------------------------------
// Envelope cipher (AES-256-GCM)
// ---------------------------------------------------------------------------

#[test]
fn encrypt_decrypt_roundtrip() {
    let key = [0xABu8; 32];
    let plaintext = br#"{"site":"example.com","password":"hunter2"}"#;

    let (ciphertext, nonce) = encrypt(&key, plaintext).expect("encrypt should succeed");

    // Ciphertext is plaintext plus the 16-byte auth tag; the nonce
    // travels separately.
    assert_eq!(ciphertext.len(), plaintext.len() + 16);
    assert_eq!(nonce.len(), NONCE_LEN);

    let recovered = decrypt(&key, &ciphertext, &nonce).expect("decrypt should succeed");
    assert_eq!(recovered, plaintext);
}

#[test]
fn encrypt_uses_a_fresh_nonce_each_time() {
    let key = [0xCDu8; 32];
    let plaintext = b"same plaintext";

    let (ct1, nonce1) = encrypt(&key, plaintext).expect("encrypt 1");
    let (ct2, nonce2) = encrypt(&key, plaintext).expect("encrypt 2");

    assert_ne!(nonce1, nonce2, "each call must draw a fresh random nonce");
    assert_ne!(ct1, ct2, "fresh nonces must change the ciphertext");
}

#[test]
fn decrypt_with_wrong_key_fails() {
    let key = [0x11u8; 32];
    let wrong_key = [0x22u8; 32];

    let (ciphertext, nonce) = encrypt(&key, b"top secret").expect("encrypt");
    let result = decrypt(&wrong_key, &ciphertext, &nonce);

    assert!(result.is_err(), "decryption with the wrong key must fail");
}

#[test]
fn decrypt_with_corrupted_ciphertext_fails() {
    let key = [0xBBu8; 32];

    let (mut ciphertext, nonce) = encrypt(&key, b"value").expect("encrypt");
    ciphertext[0] ^= 0xFF;

    let result = decrypt(&key, &ciphertext, &nonce);
    assert!(result.is_err(), "corrupted ciphertext must fail auth check");
}

#[test]
fn decrypt_with_corrupted_nonce_fails() {
    let key = [0xCCu8; 32];

    let (ciphertext, mut nonce) = encrypt(&key, b"value").expect("encrypt");
    nonce[0] ^= 0xFF;

    let result = decrypt(&key, &ciphertext, &nonce);
    assert!(result.is_err(), "a different nonce must fail auth check");
}

#[test]
fn decrypt_with_bad_nonce_length_fails() {
    let key = [0xAAu8; 32];
    let (ciphertext, _) = encrypt(&key, b"value").expect("encrypt");

    let result = decrypt(&key, &ciphertext, &[0u8; 5]);
    assert!(result.is_err(), "undersized nonce must be rejected");
}

#[test]
fn wrong_key_and_corruption_are_indistinguishable() {
    let key = [0x33u8; 32];
    let wrong_key = [0x44u8; 32];

    let (ciphertext, nonce) = encrypt(&key, b"value").expect("encrypt");

    let wrong = decrypt(&wrong_key, &ciphertext, &nonce).expect_err("wrong key");
    let mut corrupted = ciphertext.clone();
    corrupted[3] ^= 0x01;
    let tampered = decrypt(&key, &corrupted, &nonce).expect_err("tampered data");

    // A caller (or attacker) reading the message cannot tell which
    // failure occurred.
    assert_eq!(wrong.to_string(), tampered.to_string());
}

// ---------------------------------------------------------------------------
// Key derivation (Argon2id)
// ---------------------------------------------------------------------------

#[test]
fn derive_same_inputs_same_output() {
    let salt = generate_salt();
    let params = fast_params();

    let key1 = derive_master_key_with_params(b"my-passphrase", &salt, &params).expect("derive 1");
    let key2 = derive_master_key_with_params(b"my-passphrase", &salt, &params).expect("derive 2");

    assert_eq!(key1, key2, "same passphrase + salt must produce the same key");
}

#[test]
fn derive_different_salts_different_keys() {
    let salt1 = generate_salt();
    let salt2 = generate_salt();
    let params = fast_params();

    let key1 = derive_master_key_with_params(b"same-passphrase", &salt1, &params).expect("derive 1");
    let key2 = derive_master_key_with_params(b"same-passphrase", &salt2, &params).expect("derive 2");

    assert_ne!(key1, key2, "different salts must produce different keys");
}

#[test]
fn derive_different_passphrases_different_keys() {
    let salt = generate_salt();
    let params = fast_params();

    let key1 = derive_master_key_with_params(b"passphrase-one", &salt, &params).expect("derive 1");
    let key2 = derive_master_key_with_params(b"passphrase-two", &salt, &params).expect("derive 2");

    assert_ne!(key1, key2, "different passphrases must produce different keys");
}

#[test]
fn derive_rejects_weak_memory() {
    let salt = generate_salt();
    let params = Argon2Params {
        memory_kib: 1_024,
        ..fast_params()
    };

    let result = derive_master_key_with_params(b"pw", &salt, &params);
    assert!(result.is_err(), "memory below the floor must be rejected");
}

#[test]
fn derive_rejects_weak_iterations() {
    let salt = generate_salt();
    let params = Argon2Params {
        iterations: 1,
        ..fast_params()
    };

    let result = derive_master_key_with_params(b"pw", &salt, &params);
    assert!(result.is_err(), "iterations below the floor must be rejected");
}

#[test]
fn derive_rejects_zero_parallelism() {
    let salt = generate_salt();
    let params = Argon2Params {
        parallelism: 0,
        ..fast_params()
    };

    let result = derive_master_key_with_params(b"pw", &salt, &params);
    assert!(result.is_err(), "zero parallelism must be rejected");
}

#[test]
fn generated_salts_are_unique_and_sized() {
    let salt1 = generate_salt();
    let salt2 = generate_salt();

    assert_eq!(salt1.len(), 32);
    assert_ne!(salt1, salt2, "two generated salts must differ");
}

// ---------------------------------------------------------------------------
// HKDF sub-key derivation
// ---------------------------------------------------------------------------

#[test]
fn record_keys_differ_by_credential_id() {
    let master = [0x99u8; 32];

    let key_a = derive_record_key(&master, Uuid::new_v4()).expect("derive A");
    let key_b = derive_record_key(&master, Uuid::new_v4()).expect("derive B");

    assert_ne!(key_a, key_b, "different record ids must produce different keys");
}

#[test]
fn record_key_is_deterministic() {
    let master = [0x77u8; 32];
    let id = Uuid::new_v4();

    let key1 = derive_record_key(&master, id).expect("derive 1");
    let key2 = derive_record_key(&master, id).expect("derive 2");

    assert_eq!(key1, key2, "same inputs must produce the same key");
}

#[test]
fn verification_key_differs_from_record_keys() {
    let master = [0x55u8; 32];

    let verification = derive_verification_key(&master).expect("verification key");
    let record = derive_record_key(&master, Uuid::new_v4()).expect("record key");

    assert_ne!(verification, record);
}

#[test]
fn master_key_wrapper_matches_free_functions() {
    let raw = [0x44u8; 32];
    let mk = MasterKey::new(raw);
    let id = Uuid::new_v4();

    assert_eq!(
        mk.derive_record_key(id).expect("wrapper"),
        derive_record_key(&raw, id).expect("free fn")
    );
    assert_eq!(
        mk.derive_verification_key().expect("wrapper"),
        derive_verification_key(&raw).expect("free fn")
    );
}

#[test]
fn master_key_debug_is_redacted() {
    let mk = MasterKey::new([0x42u8; 32]);
    let rendered = format!("{mk:?}");

    assert!(rendered.contains("REDACTED"));
    assert!(!rendered.contains("42"), "key bytes must not leak via Debug");
}

// ---------------------------------------------------------------------------
// Verification tokens
// ---------------------------------------------------------------------------

#[test]
fn token_verifies_with_the_right_key() {
    let key = MasterKey::new([0x10u8; 32]);
    let token = create_token(&key).expect("create token");

    assert!(verify_token(&key, &token));
}

#[test]
fn token_rejects_a_wrong_key() {
    let key = MasterKey::new([0x10u8; 32]);
    let wrong = MasterKey::new([0x20u8; 32]);
    let token = create_token(&key).expect("create token");

    assert!(!verify_token(&wrong, &token), "wrong key must verify false, not error");
}

#[test]
fn tampered_token_is_rejected() {
    let key = MasterKey::new([0x30u8; 32]);
    let mut token = create_token(&key).expect("create token");
    token.ciphertext[0] ^= 0xFF;

    assert!(!verify_token(&key, &token));
}

#[test]
fn token_survives_json_round_trip() {
    let key = MasterKey::new([0x50u8; 32]);
    let token = create_token(&key).expect("create token");

    // Tokens are persisted inside the user profile as JSON with
    // base64-encoded binary fields.
    let json = serde_json::to_string(&token).expect("serialize");
    assert!(!json.contains('['), "binary fields must serialize as strings");
    let restored = serde_json::from_str(&json).expect("deserialize");

    assert_eq!(token, restored);
    assert!(verify_token(&key, &restored));
}

#[test]
fn verify_passphrase_end_to_end() {
    let salt = generate_salt();
    let params = fast_params();

    let key_bytes =
        derive_master_key_with_params(b"correct horse", &salt, &params).expect("derive");
    let token = create_token(&MasterKey::new(key_bytes)).expect("create token");

    let ok = verify_passphrase("correct horse", &salt, &params, &token).expect("verify");
    assert!(ok);

    let wrong = verify_passphrase("battery staple", &salt, &params, &token).expect("verify");
    assert!(!wrong, "a wrong passphrase must come back Ok(false)");
}

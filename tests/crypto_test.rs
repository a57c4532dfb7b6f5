// ABOUTME: Round-trip and failure-mode tests for the secret cipher
// ABOUTME: Wrong AAD and wrong key must fail authentication, never return plaintext

use mcpbox::crypto::{CryptoError, SecretCipher};

fn cipher() -> SecretCipher {
    SecretCipher::new([42u8; 32])
}

#[test]
fn bytes_round_trip() {
    let c = cipher();
    let blob = c.encrypt(b"plaintext bytes", "server_secret");
    assert_eq!(
        c.decrypt(&blob, "server_secret").unwrap(),
        b"plaintext bytes"
    );
}

#[test]
fn base64_round_trip() {
    let c = cipher();
    let encoded = c.encrypt_to_base64("the secret value", "oauth_tokens");
    assert_eq!(
        c.decrypt_from_base64(&encoded, "oauth_tokens").unwrap(),
        "the secret value"
    );
}

#[test]
fn nonces_are_unique_per_message() {
    let c = cipher();
    let a = c.encrypt(b"same input", "server_secret");
    let b = c.encrypt(b"same input", "server_secret");
    assert_ne!(a, b);
}

#[test]
fn aad_binds_ciphertext_to_its_domain() {
    let c = cipher();
    let blob = c.encrypt(b"token-bundle", "oauth_tokens");
    assert!(matches!(
        c.decrypt(&blob, "tunnel_token"),
        Err(CryptoError::Authentication)
    ));
    // Same bytes still decrypt under the right domain.
    assert!(c.decrypt(&blob, "oauth_tokens").is_ok());
}

#[test]
fn wrong_key_fails_authentication() {
    let blob = cipher().encrypt(b"secret", "server_secret");
    let other = SecretCipher::new([43u8; 32]);
    assert!(matches!(
        other.decrypt(&blob, "server_secret"),
        Err(CryptoError::Authentication)
    ));
}

#[test]
fn malformed_inputs_are_distinguishable_from_auth_failures() {
    let c = cipher();
    assert!(matches!(
        c.decrypt(&[0u8; 5], "server_secret"),
        Err(CryptoError::Malformed)
    ));
    assert!(matches!(
        c.decrypt_from_base64("not-base64!!!", "server_secret"),
        Err(CryptoError::Malformed)
    ));
}

#[test]
fn tampered_ciphertext_is_rejected() {
    let c = cipher();
    let mut blob = c.encrypt(b"integrity matters", "server_secret");
    let last = blob.len() - 1;
    blob[last] ^= 0xFF;
    assert!(matches!(
        c.decrypt(&blob, "server_secret"),
        Err(CryptoError::Authentication)
    ));
}

#[test]
fn empty_plaintext_round_trips() {
    let c = cipher();
    let blob = c.encrypt(b"", "server_secret");
    assert_eq!(c.decrypt(&blob, "server_secret").unwrap(), b"");
}

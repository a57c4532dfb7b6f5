// ABOUTME: Authenticated encryption of secrets at rest with domain-separating associated data
// ABOUTME: AES-256-GCM, random 96-bit nonce prepended to ciphertext, base64 helpers for storage

//! Secrets never touch the database in plaintext. [`SecretCipher`] wraps
//! AES-256-GCM keyed by the master key from the environment; the associated
//! data binds each ciphertext to a usage domain (see [`crate::constants::aad`])
//! so a blob stored for one purpose cannot be replayed in another.
//!
//! Decrypt failures are typed: [`CryptoError::Malformed`] means the blob is
//! structurally broken, [`CryptoError::Authentication`] means the key or the
//! AAD does not match. The distinction matters to the policy caches, which
//! fail closed on authentication errors but treat "no value" as local mode.

use aes_gcm::aead::generic_array::GenericArray;
use aes_gcm::aead::{Aead, Payload};
use aes_gcm::{Aes256Gcm, KeyInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::RngCore;
use thiserror::Error;
use zeroize::Zeroizing;

/// GCM nonce length in bytes.
const NONCE_LEN: usize = 12;

/// Failure modes of [`SecretCipher::decrypt`].
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The blob is too short or not valid base64.
    #[error("encrypted value is malformed")]
    Malformed,
    /// GCM tag verification failed: wrong key or wrong AAD.
    #[error("decryption failed")]
    Authentication,
    /// The decrypted bytes were expected to be UTF-8 but are not.
    #[error("decrypted value is not valid UTF-8")]
    Encoding,
}

/// AEAD wrapper around the process master key.
#[derive(Clone)]
pub struct SecretCipher {
    key: [u8; 32],
}

impl std::fmt::Debug for SecretCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecretCipher").finish_non_exhaustive()
    }
}

impl SecretCipher {
    #[must_use]
    pub const fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Encrypt `plaintext` under the given AAD domain. Output layout is
    /// `nonce || ciphertext+tag`.
    #[must_use]
    pub fn encrypt(&self, plaintext: &[u8], aad: &str) -> Vec<u8> {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = GenericArray::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(
                nonce,
                Payload {
                    msg: plaintext,
                    aad: aad.as_bytes(),
                },
            )
            .unwrap_or_else(|_| {
                // AES-GCM encryption with a fresh nonce cannot fail for any
                // input length we produce; the aead API is fallible only for
                // exotic misuse.
                Vec::new()
            });

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        out
    }

    /// Decrypt a `nonce || ciphertext` blob produced by [`Self::encrypt`]
    /// under the same AAD domain.
    ///
    /// # Errors
    ///
    /// [`CryptoError::Malformed`] when the blob is shorter than a nonce,
    /// [`CryptoError::Authentication`] when the key or AAD does not match.
    pub fn decrypt(&self, blob: &[u8], aad: &str) -> Result<Vec<u8>, CryptoError> {
        if blob.len() < NONCE_LEN {
            return Err(CryptoError::Malformed);
        }
        let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
        let cipher = Aes256Gcm::new(GenericArray::from_slice(&self.key));

        cipher
            .decrypt(
                GenericArray::from_slice(nonce_bytes),
                Payload {
                    msg: ciphertext,
                    aad: aad.as_bytes(),
                },
            )
            .map_err(|_| CryptoError::Authentication)
    }

    /// Encrypt a UTF-8 string and return the blob base64-encoded for TEXT
    /// column storage.
    #[must_use]
    pub fn encrypt_to_base64(&self, plaintext: &str, aad: &str) -> String {
        BASE64.encode(self.encrypt(plaintext.as_bytes(), aad))
    }

    /// Inverse of [`Self::encrypt_to_base64`].
    ///
    /// # Errors
    ///
    /// See [`Self::decrypt`]; additionally [`CryptoError::Malformed`] for
    /// invalid base64 and [`CryptoError::Encoding`] for non-UTF-8 plaintext.
    pub fn decrypt_from_base64(&self, encoded: &str, aad: &str) -> Result<String, CryptoError> {
        let blob = BASE64.decode(encoded).map_err(|_| CryptoError::Malformed)?;
        let plaintext = Zeroizing::new(self.decrypt(&blob, aad)?);
        String::from_utf8(plaintext.to_vec()).map_err(|_| CryptoError::Encoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cipher() -> SecretCipher {
        SecretCipher::new([7u8; 32])
    }

    #[test]
    fn round_trip() {
        let c = cipher();
        let blob = c.encrypt(b"hunter2", "server_secret");
        assert_eq!(c.decrypt(&blob, "server_secret").unwrap(), b"hunter2");
    }

    #[test]
    fn aad_mismatch_fails_authentication() {
        let c = cipher();
        let blob = c.encrypt(b"hunter2", "oauth_tokens");
        assert!(matches!(
            c.decrypt(&blob, "tunnel_token"),
            Err(CryptoError::Authentication)
        ));
    }

    #[test]
    fn truncated_blob_is_malformed() {
        let c = cipher();
        assert!(matches!(
            c.decrypt(&[1, 2, 3], "server_secret"),
            Err(CryptoError::Malformed)
        ));
    }
}

// ABOUTME: Process-wide cache of the remote-mode service token, refreshed under a coarse TTL
// ABOUTME: Fails closed: a DB or decryption error enables auth (deny-all) instead of local mode

use crate::constants::{aad, settings_keys, POLICY_CACHE_TTL_SECS};
use crate::crypto::{CryptoError, SecretCipher};
use crate::database::Database;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use tokio::sync::RwLock;

#[derive(Debug, Default)]
struct TokenState {
    token: Option<String>,
    db_error: bool,
    decryption_error: bool,
    last_loaded: Option<Instant>,
}

impl TokenState {
    /// Auth is enabled when a token is loaded OR either error flag is set.
    /// The error paths keep the gateway in remote mode (deny without the
    /// right token) rather than silently opening it to the world.
    const fn auth_enabled(&self) -> bool {
        self.token.is_some() || self.db_error || self.decryption_error
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.last_loaded.is_some_and(|at| at.elapsed() < ttl)
    }
}

/// Cached view of the configured service token.
pub struct ServiceTokenCache {
    database: Database,
    cipher: SecretCipher,
    ttl: Duration,
    state: RwLock<TokenState>,
}

impl ServiceTokenCache {
    #[must_use]
    pub fn new(database: Database, cipher: SecretCipher) -> Self {
        Self {
            database,
            cipher,
            ttl: Duration::from_secs(POLICY_CACHE_TTL_SECS),
            state: RwLock::new(TokenState::default()),
        }
    }

    /// Whether the gateway operates in remote mode.
    pub async fn is_auth_enabled(&self) -> bool {
        self.refresh_if_stale().await;
        self.state.read().await.auth_enabled()
    }

    /// Constant-time comparison of a presented token against the cached one.
    /// False when no token is loaded (error states deny all callers).
    pub async fn verify_token(&self, presented: &str) -> bool {
        self.refresh_if_stale().await;
        let state = self.state.read().await;
        state.token.as_ref().is_some_and(|expected| {
            expected.as_bytes().ct_eq(presented.as_bytes()).into()
        })
    }

    /// Drop the cached token and clear the decryption flag so the next
    /// access reloads from the database.
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.token = None;
        state.decryption_error = false;
        state.last_loaded = None;
    }

    async fn refresh_if_stale(&self) {
        {
            let state = self.state.read().await;
            if state.is_fresh(self.ttl) {
                return;
            }
        }

        let loaded = self.load().await;
        let mut state = self.state.write().await;
        *state = loaded;
    }

    /// Load the token from settings. DB errors and decrypt errors set their
    /// own flags; both leave auth enabled.
    async fn load(&self) -> TokenState {
        let mut state = TokenState {
            last_loaded: Some(Instant::now()),
            ..TokenState::default()
        };

        let setting = match self.database.get_setting(settings_keys::SERVICE_TOKEN).await {
            Ok(setting) => setting,
            Err(err) => {
                tracing::error!(error = %err, "failed to load service token; failing closed");
                state.db_error = true;
                return state;
            }
        };

        let Some(encrypted) = setting.and_then(|s| s.value) else {
            // No token configured: local mode.
            return state;
        };

        match self.cipher.decrypt_from_base64(&encrypted, aad::SERVICE_TOKEN) {
            Ok(token) => state.token = Some(token),
            Err(CryptoError::Malformed | CryptoError::Authentication | CryptoError::Encoding) => {
                tracing::error!(
                    "service token cannot be decrypted; remote auth fails closed until invalidated"
                );
                state.decryption_error = true;
            }
        }

        state
    }

    #[cfg(test)]
    pub(crate) async fn set_state_for_test(
        &self,
        token: Option<String>,
        db_error: bool,
        decryption_error: bool,
    ) {
        let mut state = self.state.write().await;
        *state = TokenState {
            token,
            db_error,
            decryption_error,
            last_loaded: Some(Instant::now()),
        };
    }

    #[cfg(test)]
    pub(crate) async fn decryption_error_for_test(&self) -> bool {
        self.state.read().await.decryption_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn cache() -> ServiceTokenCache {
        let db = Database::in_memory().await.unwrap();
        ServiceTokenCache::new(db, SecretCipher::new([1u8; 32]))
    }

    #[tokio::test]
    async fn decryption_error_fails_closed() {
        let cache = cache().await;
        cache.set_state_for_test(None, false, true).await;
        assert!(cache.is_auth_enabled().await);
    }

    #[tokio::test]
    async fn db_error_fails_closed() {
        let cache = cache().await;
        cache.set_state_for_test(None, true, false).await;
        assert!(cache.is_auth_enabled().await);
    }

    #[tokio::test]
    async fn no_token_no_errors_is_local_mode() {
        let cache = cache().await;
        cache.set_state_for_test(None, false, false).await;
        assert!(!cache.is_auth_enabled().await);
    }

    #[tokio::test]
    async fn invalidate_clears_decryption_error() {
        let cache = cache().await;
        cache.set_state_for_test(None, false, true).await;
        cache.invalidate().await;
        assert!(!cache.decryption_error_for_test().await);
    }

    #[tokio::test]
    async fn verify_rejects_wrong_token() {
        let cache = cache().await;
        cache
            .set_state_for_test(Some("correct-token".into()), false, false)
            .await;
        assert!(cache.verify_token("correct-token").await);
        assert!(!cache.verify_token("wrong-token").await);
    }
}

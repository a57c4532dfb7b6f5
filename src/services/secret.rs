// ABOUTME: Server secret management: placeholders from the LLM, values from the admin only
// ABOUTME: Decryption for sandbox injection is the single point where plaintext leaves storage

use crate::constants::aad;
use crate::crypto::SecretCipher;
use crate::database::Database;
use crate::models::ServerSecret;
use crate::sandbox::SandboxClient;
use anyhow::Result;
use std::collections::HashMap;
use uuid::Uuid;

/// Service over per-server secrets.
#[derive(Clone)]
pub struct SecretService {
    database: Database,
    cipher: SecretCipher,
}

impl SecretService {
    #[must_use]
    pub const fn new(database: Database, cipher: SecretCipher) -> Self {
        Self { database, cipher }
    }

    /// Create a placeholder row with no value. This is the only creation
    /// path reachable from the LLM surface.
    ///
    /// # Errors
    ///
    /// Returns the raw `sqlx::Error` so callers can detect the duplicate-key
    /// violation.
    pub async fn create_placeholder(
        &self,
        server_id: Uuid,
        key_name: &str,
        description: Option<&str>,
    ) -> Result<ServerSecret, sqlx::Error> {
        self.database
            .insert_secret(server_id, key_name, None, description)
            .await
    }

    /// Set a secret's value (admin UI path). If the owning server is
    /// running, the updated set is pushed to the sandbox so the change takes
    /// effect without a restart.
    ///
    /// # Errors
    ///
    /// Returns an error if the secret row does not exist or a query fails.
    pub async fn set_value(
        &self,
        sandbox: &SandboxClient,
        server_id: Uuid,
        key_name: &str,
        plaintext: &str,
    ) -> Result<()> {
        let encrypted = self.cipher.encrypt_to_base64(plaintext, aad::SERVER_SECRET);
        let updated = self
            .database
            .update_secret_value(server_id, key_name, Some(&encrypted))
            .await?;
        if !updated {
            anyhow::bail!("secret '{key_name}' not found for server {server_id}");
        }

        if let Some(server) = self.database.get_server(server_id).await? {
            if server.status == crate::models::ServerStatus::Running {
                let secrets = self.decrypted_for_injection(server_id).await?;
                let outcome = sandbox
                    .update_server_secrets(&server_id.to_string(), &secrets)
                    .await;
                if !outcome.success {
                    tracing::warn!(
                        server = %server.name,
                        error = ?outcome.error,
                        "failed to push updated secrets to running server"
                    );
                }
            }
        }
        Ok(())
    }

    /// List secrets for a server (values stay encrypted).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list(&self, server_id: Uuid) -> Result<Vec<ServerSecret>> {
        self.database.list_secrets(server_id).await
    }

    /// Decrypt every valued secret of a server for sandbox injection.
    /// Placeholders are skipped; an undecryptable value fails the whole
    /// operation rather than silently injecting a partial set.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails or any stored value cannot be
    /// decrypted.
    pub async fn decrypted_for_injection(
        &self,
        server_id: Uuid,
    ) -> Result<HashMap<String, String>> {
        let secrets = self.database.list_secrets(server_id).await?;
        let mut out = HashMap::new();
        for secret in secrets {
            let Some(encrypted) = secret.encrypted_value else {
                continue;
            };
            let plaintext = self
                .cipher
                .decrypt_from_base64(&encrypted, aad::SERVER_SECRET)
                .map_err(|_| {
                    anyhow::anyhow!("secret '{}' cannot be decrypted", secret.key_name)
                })?;
            out.insert(secret.key_name, plaintext);
        }
        Ok(out)
    }

    /// Resolve one secret's plaintext by key name (external-source auth).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or the value cannot be decrypted.
    pub async fn resolve(&self, server_id: Uuid, key_name: &str) -> Result<Option<String>> {
        let Some(secret) = self.database.get_secret(server_id, key_name).await? else {
            return Ok(None);
        };
        let Some(encrypted) = secret.encrypted_value else {
            return Ok(None);
        };
        let plaintext = self
            .cipher
            .decrypt_from_base64(&encrypted, aad::SERVER_SECRET)
            .map_err(|_| anyhow::anyhow!("secret '{key_name}' cannot be decrypted"))?;
        Ok(Some(plaintext))
    }

    /// Delete a secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn delete(&self, server_id: Uuid, key_name: &str) -> Result<bool> {
        self.database.delete_secret(server_id, key_name).await
    }
}

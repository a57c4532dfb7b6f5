// ABOUTME: Settings access plus the validated security policy view over the settings table
// ABOUTME: Encrypted values are masked on listing and never returned raw to the admin API

use crate::constants::{aad, settings_keys};
use crate::crypto::{CryptoError, SecretCipher};
use crate::database::Database;
use crate::errors::{AppError, ErrorCode};
use crate::models::Setting;
use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Security policy settings with their defaults and allowed values.
/// `allowed = None` means numeric, range-checked separately.
pub const SECURITY_POLICY_SETTINGS: &[(&str, &str, Option<&[&str]>)] = &[
    (
        settings_keys::REMOTE_TOOL_EDITING,
        "disabled",
        Some(&["disabled", "enabled"]),
    ),
    (
        settings_keys::TOOL_APPROVAL_MODE,
        "require_approval",
        Some(&["require_approval", "auto_approve"]),
    ),
    (
        settings_keys::NETWORK_ACCESS_POLICY,
        "require_approval",
        Some(&["require_approval", "allow_all_public"]),
    ),
    (
        settings_keys::MODULE_APPROVAL_MODE,
        "require_approval",
        Some(&["require_approval", "auto_approve"]),
    ),
    (
        settings_keys::REDACT_SECRETS_IN_OUTPUT,
        "enabled",
        Some(&["enabled", "disabled"]),
    ),
    (settings_keys::LOG_RETENTION_DAYS, "30", None),
    (settings_keys::MCP_RATE_LIMIT_RPM, "300", None),
];

/// Materialized security policy.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityPolicy {
    pub remote_tool_editing: String,
    pub tool_approval_mode: String,
    pub network_access_policy: String,
    pub module_approval_mode: String,
    pub redact_secrets_in_output: String,
    pub log_retention_days: i64,
    pub mcp_rate_limit_rpm: i64,
}

/// Partial update of the security policy.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecurityPolicyUpdate {
    pub remote_tool_editing: Option<String>,
    pub tool_approval_mode: Option<String>,
    pub network_access_policy: Option<String>,
    pub module_approval_mode: Option<String>,
    pub redact_secrets_in_output: Option<String>,
    pub log_retention_days: Option<i64>,
    pub mcp_rate_limit_rpm: Option<i64>,
}

/// Service over the settings table.
#[derive(Clone)]
pub struct SettingService {
    database: Database,
}

impl SettingService {
    #[must_use]
    pub const fn new(database: Database) -> Self {
        Self { database }
    }

    /// Raw value for a key, or the supplied default.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_value_or(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .database
            .get_setting(key)
            .await?
            .and_then(|s| s.value)
            .unwrap_or_else(|| default.to_string()))
    }

    /// Raw value for a key.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_value(&self, key: &str) -> Result<Option<String>> {
        Ok(self.database.get_setting(key).await?.and_then(|s| s.value))
    }

    /// Set a plaintext value.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn set_value(&self, key: &str, value: &str, description: Option<&str>) -> Result<()> {
        self.database
            .set_setting(key, Some(value), false, description)
            .await
    }

    /// Encrypt and store a secret value under its AAD domain.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn set_encrypted_value(
        &self,
        cipher: &SecretCipher,
        key: &str,
        plaintext: &str,
        aad_domain: &str,
        description: Option<&str>,
    ) -> Result<()> {
        let encrypted = cipher.encrypt_to_base64(plaintext, aad_domain);
        self.database
            .set_setting(key, Some(&encrypted), true, description)
            .await
    }

    /// Decrypt a stored secret. `Ok(None)` means no value is configured;
    /// a crypto failure is reported without cryptographic detail.
    ///
    /// # Errors
    ///
    /// `SecretUnavailable` when the stored blob cannot be decrypted,
    /// `DatabaseError` on query failure.
    pub async fn get_decrypted_value(
        &self,
        cipher: &SecretCipher,
        key: &str,
        aad_domain: &str,
    ) -> Result<Option<String>, AppError> {
        let setting = self
            .database
            .get_setting(key)
            .await
            .map_err(|err| {
                tracing::error!(error = %err, key, "failed to read setting");
                AppError::new(ErrorCode::DatabaseError, "Database operation failed")
            })?;

        let Some(encrypted) = setting.and_then(|s| s.value) else {
            return Ok(None);
        };

        match cipher.decrypt_from_base64(&encrypted, aad_domain) {
            Ok(plaintext) => Ok(Some(plaintext)),
            Err(CryptoError::Malformed | CryptoError::Authentication | CryptoError::Encoding) => {
                tracing::error!(key, "stored secret cannot be decrypted");
                Err(AppError::new(
                    ErrorCode::SecretUnavailable,
                    "Stored secret is unavailable",
                ))
            }
        }
    }

    /// All settings with encrypted values masked.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_masked(&self) -> Result<Vec<Setting>> {
        let mut settings = self.database.list_settings().await?;
        for setting in &mut settings {
            if setting.encrypted && setting.value.is_some() {
                setting.value = Some("********".into());
            }
        }
        Ok(settings)
    }

    /// Current security policy, defaults applied.
    ///
    /// # Errors
    ///
    /// Returns an error if any query fails.
    pub async fn get_security_policy(&self) -> Result<SecurityPolicy> {
        let mut values = std::collections::HashMap::new();
        for (key, default, _) in SECURITY_POLICY_SETTINGS {
            values.insert(*key, self.get_value_or(key, default).await?);
        }

        Ok(SecurityPolicy {
            remote_tool_editing: values[settings_keys::REMOTE_TOOL_EDITING].clone(),
            tool_approval_mode: values[settings_keys::TOOL_APPROVAL_MODE].clone(),
            network_access_policy: values[settings_keys::NETWORK_ACCESS_POLICY].clone(),
            module_approval_mode: values[settings_keys::MODULE_APPROVAL_MODE].clone(),
            redact_secrets_in_output: values[settings_keys::REDACT_SECRETS_IN_OUTPUT].clone(),
            log_retention_days: values[settings_keys::LOG_RETENTION_DAYS]
                .parse()
                .unwrap_or(30),
            mcp_rate_limit_rpm: values[settings_keys::MCP_RATE_LIMIT_RPM]
                .parse()
                .unwrap_or(300),
        })
    }

    /// Apply a partial security-policy update after validating each value.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for out-of-range or disallowed values, or a database
    /// error.
    pub async fn update_security_policy(
        &self,
        update: &SecurityPolicyUpdate,
    ) -> Result<SecurityPolicy, AppError> {
        let mut changes: Vec<(&str, String)> = Vec::new();

        for (key, value) in [
            (settings_keys::REMOTE_TOOL_EDITING, &update.remote_tool_editing),
            (settings_keys::TOOL_APPROVAL_MODE, &update.tool_approval_mode),
            (
                settings_keys::NETWORK_ACCESS_POLICY,
                &update.network_access_policy,
            ),
            (settings_keys::MODULE_APPROVAL_MODE, &update.module_approval_mode),
            (
                settings_keys::REDACT_SECRETS_IN_OUTPUT,
                &update.redact_secrets_in_output,
            ),
        ] {
            if let Some(value) = value {
                let allowed = SECURITY_POLICY_SETTINGS
                    .iter()
                    .find(|(k, _, _)| *k == key)
                    .and_then(|(_, _, allowed)| *allowed)
                    .unwrap_or(&[]);
                if !allowed.contains(&value.as_str()) {
                    return Err(AppError::invalid_input(format!(
                        "Invalid value '{value}' for {key}. Allowed: {allowed:?}"
                    )));
                }
                changes.push((key, value.clone()));
            }
        }

        if let Some(days) = update.log_retention_days {
            if !(1..=3650).contains(&days) {
                return Err(AppError::invalid_input(
                    "log_retention_days must be between 1 and 3650",
                ));
            }
            changes.push((settings_keys::LOG_RETENTION_DAYS, days.to_string()));
        }
        if let Some(rpm) = update.mcp_rate_limit_rpm {
            if !(10..=10000).contains(&rpm) {
                return Err(AppError::invalid_input(
                    "mcp_rate_limit_rpm must be between 10 and 10000",
                ));
            }
            changes.push((settings_keys::MCP_RATE_LIMIT_RPM, rpm.to_string()));
        }

        if changes.is_empty() {
            return Err(AppError::invalid_input("No fields provided to update"));
        }

        for (key, value) in changes {
            self.set_value(key, &value, None).await.map_err(|err| {
                tracing::error!(error = %err, key, "failed to persist policy setting");
                AppError::new(ErrorCode::DatabaseError, "Database operation failed")
            })?;
        }

        self.get_security_policy().await.map_err(|err| {
            tracing::error!(error = %err, "failed to re-read security policy");
            AppError::new(ErrorCode::DatabaseError, "Database operation failed")
        })
    }

    /// The currently configured tunnel token, decrypted.
    ///
    /// # Errors
    ///
    /// See [`Self::get_decrypted_value`].
    pub async fn get_tunnel_token(
        &self,
        cipher: &SecretCipher,
    ) -> Result<Option<String>, AppError> {
        self.get_decrypted_value(cipher, settings_keys::TUNNEL_TOKEN, aad::TUNNEL_TOKEN)
            .await
    }

    /// The currently configured service token, decrypted.
    ///
    /// # Errors
    ///
    /// See [`Self::get_decrypted_value`].
    pub async fn get_service_token(
        &self,
        cipher: &SecretCipher,
    ) -> Result<Option<String>, AppError> {
        self.get_decrypted_value(cipher, settings_keys::SERVICE_TOKEN, aad::SERVICE_TOKEN)
            .await
    }
}

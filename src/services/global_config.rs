// ABOUTME: Global allowed-modules list for sandboxed tool code
// ABOUTME: Stored as one settings row; absence means the built-in default set

use crate::constants::settings_keys;
use crate::database::Database;
use anyhow::Result;

/// Modules available to tool code without an approval request. Standard
/// library staples plus the HTTP client the sandbox injects.
pub const DEFAULT_ALLOWED_MODULES: &[&str] = &[
    "asyncio",
    "base64",
    "collections",
    "csv",
    "datetime",
    "decimal",
    "functools",
    "hashlib",
    "hmac",
    "httpx",
    "io",
    "itertools",
    "json",
    "math",
    "random",
    "re",
    "statistics",
    "string",
    "textwrap",
    "time",
    "typing",
    "urllib",
    "uuid",
];

/// Service over the global module allowlist.
#[derive(Clone)]
pub struct GlobalConfigService {
    database: Database,
}

impl GlobalConfigService {
    #[must_use]
    pub const fn new(database: Database) -> Self {
        Self { database }
    }

    /// Built-in default module set.
    #[must_use]
    pub fn default_modules() -> Vec<String> {
        DEFAULT_ALLOWED_MODULES
            .iter()
            .map(|m| (*m).to_string())
            .collect()
    }

    /// Current allowed modules: the custom list when configured, the
    /// defaults otherwise.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_allowed_modules(&self) -> Result<Vec<String>> {
        let setting = self
            .database
            .get_setting(settings_keys::ALLOWED_MODULES)
            .await?;
        match setting.and_then(|s| s.value) {
            Some(raw) => Ok(serde_json::from_str(&raw).unwrap_or_else(|_| Self::default_modules())),
            None => Ok(Self::default_modules()),
        }
    }

    /// True while no custom list is stored.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn is_using_defaults(&self) -> Result<bool> {
        let setting = self
            .database
            .get_setting(settings_keys::ALLOWED_MODULES)
            .await?;
        Ok(setting.and_then(|s| s.value).is_none())
    }

    /// Add a module (idempotent).
    ///
    /// # Errors
    ///
    /// Returns an error if the read or write fails.
    pub async fn add_module(&self, module: &str) -> Result<()> {
        let mut modules = self.get_allowed_modules().await?;
        if !modules.iter().any(|m| m == module) {
            modules.push(module.to_string());
            modules.sort();
            self.store(&modules).await?;
        }
        Ok(())
    }

    /// Remove a module (idempotent).
    ///
    /// # Errors
    ///
    /// Returns an error if the read or write fails.
    pub async fn remove_module(&self, module: &str) -> Result<()> {
        let mut modules = self.get_allowed_modules().await?;
        let before = modules.len();
        modules.retain(|m| m != module);
        if modules.len() != before {
            self.store(&modules).await?;
        }
        Ok(())
    }

    /// Drop the custom list so the defaults apply again.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn reset_to_defaults(&self) -> Result<()> {
        self.database
            .delete_setting(settings_keys::ALLOWED_MODULES)
            .await?;
        Ok(())
    }

    async fn store(&self, modules: &[String]) -> Result<()> {
        let raw = serde_json::to_string(modules)?;
        self.database
            .set_setting(
                settings_keys::ALLOWED_MODULES,
                Some(&raw),
                false,
                Some("Python modules tool code may import"),
            )
            .await
    }
}

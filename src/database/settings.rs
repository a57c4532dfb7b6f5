// ABOUTME: Process-wide key/value settings table with an encrypted flag
// ABOUTME: Hosts the security policy, access policy, and the remote-mode secrets

use super::Database;
use crate::models::Setting;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

impl Database {
    pub(super) async fn migrate_settings(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS settings (
                id TEXT PRIMARY KEY,
                key TEXT NOT NULL UNIQUE,
                value TEXT,
                encrypted INTEGER NOT NULL DEFAULT 0,
                description TEXT,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a setting row by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_setting(&self, key: &str) -> Result<Option<Setting>> {
        let row = sqlx::query("SELECT * FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_setting).transpose()
    }

    /// Upsert a setting value.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn set_setting(
        &self,
        key: &str,
        value: Option<&str>,
        encrypted: bool,
        description: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO settings (id, key, value, encrypted, description, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                encrypted = excluded.encrypted,
                description = COALESCE(excluded.description, settings.description),
                updated_at = excluded.updated_at
            ",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(key)
        .bind(value)
        .bind(encrypted)
        .bind(description)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All settings ordered by key.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_settings(&self) -> Result<Vec<Setting>> {
        let rows = sqlx::query("SELECT * FROM settings ORDER BY key")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_setting).collect()
    }

    /// Delete a setting.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn delete_setting(&self, key: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM settings WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_setting(row: &sqlx::sqlite::SqliteRow) -> Result<Setting> {
    let id: String = row.get("id");
    let updated_at: DateTime<Utc> = row.get("updated_at");
    Ok(Setting {
        id: Uuid::parse_str(&id)?,
        key: row.get("key"),
        value: row.get("value"),
        encrypted: row.get("encrypted"),
        description: row.get("description"),
        updated_at,
    })
}

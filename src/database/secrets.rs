// ABOUTME: Server secret table schema and queries
// ABOUTME: Values are stored encrypted (or absent for placeholders); plaintext never lands here

use super::Database;
use crate::models::ServerSecret;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

impl Database {
    pub(super) async fn migrate_secrets(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS server_secrets (
                id TEXT PRIMARY KEY,
                server_id TEXT NOT NULL REFERENCES servers(id) ON DELETE CASCADE,
                key_name TEXT NOT NULL,
                encrypted_value TEXT,
                description TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (server_id, key_name)
            )
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a secret row. `encrypted_value = None` creates a placeholder.
    ///
    /// # Errors
    ///
    /// Returns an error on insert failure, including the `(server_id,
    /// key_name)` uniqueness violation.
    pub async fn insert_secret(
        &self,
        server_id: Uuid,
        key_name: &str,
        encrypted_value: Option<&str>,
        description: Option<&str>,
    ) -> Result<ServerSecret, sqlx::Error> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r"
            INSERT INTO server_secrets (id, server_id, key_name, encrypted_value, description,
                                        created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $6)
            ",
        )
        .bind(id.to_string())
        .bind(server_id.to_string())
        .bind(key_name)
        .bind(encrypted_value)
        .bind(description)
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(ServerSecret {
            id,
            server_id,
            key_name: key_name.to_string(),
            encrypted_value: encrypted_value.map(str::to_string),
            description: description.map(str::to_string),
            created_at: now,
            updated_at: now,
        })
    }

    /// Set or clear a secret's encrypted value.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn update_secret_value(
        &self,
        server_id: Uuid,
        key_name: &str,
        encrypted_value: Option<&str>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r"
            UPDATE server_secrets SET encrypted_value = $3, updated_at = $4
            WHERE server_id = $1 AND key_name = $2
            ",
        )
        .bind(server_id.to_string())
        .bind(key_name)
        .bind(encrypted_value)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// All secrets for a server, ordered by key name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_secrets(&self, server_id: Uuid) -> Result<Vec<ServerSecret>> {
        let rows =
            sqlx::query("SELECT * FROM server_secrets WHERE server_id = $1 ORDER BY key_name")
                .bind(server_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_secret).collect()
    }

    /// Fetch one secret by key name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_secret(&self, server_id: Uuid, key_name: &str) -> Result<Option<ServerSecret>> {
        let row = sqlx::query(
            "SELECT * FROM server_secrets WHERE server_id = $1 AND key_name = $2",
        )
        .bind(server_id.to_string())
        .bind(key_name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_secret).transpose()
    }

    /// Delete a secret.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn delete_secret(&self, server_id: Uuid, key_name: &str) -> Result<bool> {
        let result =
            sqlx::query("DELETE FROM server_secrets WHERE server_id = $1 AND key_name = $2")
                .bind(server_id.to_string())
                .bind(key_name)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_secret(row: &sqlx::sqlite::SqliteRow) -> Result<ServerSecret> {
    let id: String = row.get("id");
    let server_id: String = row.get("server_id");
    let created_at: DateTime<Utc> = row.get("created_at");
    let updated_at: DateTime<Utc> = row.get("updated_at");

    Ok(ServerSecret {
        id: Uuid::parse_str(&id).context("invalid secret id")?,
        server_id: Uuid::parse_str(&server_id).context("invalid server id")?,
        key_name: row.get("key_name"),
        encrypted_value: row.get("encrypted_value"),
        description: row.get("description"),
        created_at,
        updated_at,
    })
}

// ABOUTME: Server table schema and queries
// ABOUTME: Servers are containers for tools; deleting one cascades to tools, secrets, and sources

use super::Database;
use crate::models::{NetworkMode, Server, ServerStatus};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

/// Fields accepted when creating a server.
#[derive(Debug, Clone)]
pub struct ServerCreate {
    pub name: String,
    pub description: Option<String>,
}

impl Database {
    pub(super) async fn migrate_servers(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS servers (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                description TEXT,
                status TEXT NOT NULL DEFAULT 'ready',
                network_mode TEXT NOT NULL DEFAULT 'isolated',
                allowed_hosts TEXT NOT NULL DEFAULT '[]',
                default_timeout_ms INTEGER NOT NULL DEFAULT 30000,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_servers_status ON servers(status)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Insert a new server in `ready` status.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create_server(&self, data: &ServerCreate) -> Result<Server> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r"
            INSERT INTO servers (id, name, description, status, network_mode, allowed_hosts,
                                 default_timeout_ms, created_at, updated_at)
            VALUES ($1, $2, $3, 'ready', 'isolated', '[]', 30000, $4, $4)
            ",
        )
        .bind(id.to_string())
        .bind(&data.name)
        .bind(&data.description)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_server(id)
            .await?
            .context("server vanished after insert")
    }

    /// Fetch a server by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_server(&self, id: Uuid) -> Result<Option<Server>> {
        let row = sqlx::query("SELECT * FROM servers WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_server).transpose()
    }

    /// List servers ordered by creation time, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_servers(&self, limit: i64, offset: i64) -> Result<(Vec<Server>, i64)> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM servers")
            .fetch_one(&self.pool)
            .await?;

        let rows = sqlx::query(
            "SELECT * FROM servers ORDER BY created_at DESC, id LIMIT $1 OFFSET $2",
        )
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let servers = rows.iter().map(row_to_server).collect::<Result<_>>()?;
        Ok((servers, total))
    }

    /// Update a server's lifecycle status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn update_server_status(&self, id: Uuid, status: ServerStatus) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE servers SET status = $2, updated_at = $3 WHERE id = $1",
        )
        .bind(id.to_string())
        .bind(status.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Replace a server's allowed-hosts list and network mode.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the query fails.
    pub async fn update_server_network(
        &self,
        id: Uuid,
        network_mode: NetworkMode,
        allowed_hosts: &[String],
    ) -> Result<bool> {
        let hosts_json = serde_json::to_string(allowed_hosts)?;
        let result = sqlx::query(
            "UPDATE servers SET network_mode = $2, allowed_hosts = $3, updated_at = $4 WHERE id = $1",
        )
        .bind(id.to_string())
        .bind(network_mode.as_str())
        .bind(hosts_json)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a server. Tools, secrets, execution logs, and external sources
    /// cascade; activity logs keep their rows with `server_id` set NULL.
    ///
    /// # Errors
    ///
    /// Returns an error if any delete fails.
    pub async fn delete_server(&self, id: Uuid) -> Result<bool> {
        let id_str = id.to_string();
        let mut tx = self.pool.begin().await?;

        sqlx::query("UPDATE activity_logs SET server_id = NULL WHERE server_id = $1")
            .bind(&id_str)
            .execute(&mut *tx)
            .await?;

        let result = sqlx::query("DELETE FROM servers WHERE id = $1")
            .bind(&id_str)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

pub(super) fn row_to_server(row: &sqlx::sqlite::SqliteRow) -> Result<Server> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    let network_mode: String = row.get("network_mode");
    let allowed_hosts: String = row.get("allowed_hosts");
    let created_at: DateTime<Utc> = row.get("created_at");
    let updated_at: DateTime<Utc> = row.get("updated_at");

    Ok(Server {
        id: Uuid::parse_str(&id)?,
        name: row.get("name"),
        description: row.get("description"),
        status: status.parse().map_err(anyhow::Error::msg)?,
        network_mode: network_mode.parse().map_err(anyhow::Error::msg)?,
        allowed_hosts: serde_json::from_str(&allowed_hosts).unwrap_or_default(),
        default_timeout_ms: row.get("default_timeout_ms"),
        created_at,
        updated_at,
    })
}

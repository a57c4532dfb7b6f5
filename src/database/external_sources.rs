// ABOUTME: External MCP source table schema and queries
// ABOUTME: Holds upstream endpoint config, encrypted OAuth tokens, and the discovery cache

use super::Database;
use crate::models::{AuthType, ExternalMcpSource, SourceStatus, TransportType};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

/// Fields accepted when registering an external source.
#[derive(Debug, Clone)]
pub struct ExternalSourceCreate {
    pub name: String,
    pub url: String,
    pub auth_type: AuthType,
    pub auth_secret_name: Option<String>,
    pub auth_header_name: Option<String>,
    pub transport_type: TransportType,
    pub oauth_issuer: Option<String>,
    pub oauth_client_id: Option<String>,
}

impl Database {
    pub(super) async fn migrate_external_sources(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS external_mcp_sources (
                id TEXT PRIMARY KEY,
                server_id TEXT NOT NULL REFERENCES servers(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                url TEXT NOT NULL,
                auth_type TEXT NOT NULL DEFAULT 'none',
                auth_secret_name TEXT,
                auth_header_name TEXT,
                transport_type TEXT NOT NULL DEFAULT 'streamable_http',
                status TEXT NOT NULL DEFAULT 'active',
                oauth_tokens_encrypted TEXT,
                oauth_issuer TEXT,
                oauth_client_id TEXT,
                tool_count INTEGER NOT NULL DEFAULT 0,
                discovered_tools_cache TEXT,
                last_discovered_at TIMESTAMP,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Register an external source.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_external_source(
        &self,
        server_id: Uuid,
        data: &ExternalSourceCreate,
    ) -> Result<ExternalMcpSource> {
        let id = Uuid::new_v4();
        let now = Utc::now();
        sqlx::query(
            r"
            INSERT INTO external_mcp_sources (
                id, server_id, name, url, auth_type, auth_secret_name, auth_header_name,
                transport_type, status, oauth_issuer, oauth_client_id,
                tool_count, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 'active', $9, $10, 0, $11, $11)
            ",
        )
        .bind(id.to_string())
        .bind(server_id.to_string())
        .bind(&data.name)
        .bind(&data.url)
        .bind(data.auth_type.as_str())
        .bind(&data.auth_secret_name)
        .bind(&data.auth_header_name)
        .bind(data.transport_type.as_str())
        .bind(&data.oauth_issuer)
        .bind(&data.oauth_client_id)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.get_external_source(id)
            .await?
            .ok_or_else(|| anyhow::anyhow!("external source vanished after insert"))
    }

    /// Fetch a source by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_external_source(&self, id: Uuid) -> Result<Option<ExternalMcpSource>> {
        let row = sqlx::query("SELECT * FROM external_mcp_sources WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_source).transpose()
    }

    /// All sources for a server.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_external_sources(&self, server_id: Uuid) -> Result<Vec<ExternalMcpSource>> {
        let rows =
            sqlx::query("SELECT * FROM external_mcp_sources WHERE server_id = $1 ORDER BY name")
                .bind(server_id.to_string())
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(row_to_source).collect()
    }

    /// Store discovery results on the source row.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn update_source_discovery(
        &self,
        id: Uuid,
        status: SourceStatus,
        tool_count: i64,
        discovered_tools_cache: Option<&Value>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE external_mcp_sources SET
                status = $2, tool_count = $3, discovered_tools_cache = $4,
                last_discovered_at = $5, updated_at = $5
            WHERE id = $1
            ",
        )
        .bind(id.to_string())
        .bind(status.as_str())
        .bind(tool_count)
        .bind(discovered_tools_cache.map(Value::to_string))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Persist a (re-)encrypted OAuth token bundle.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn update_source_oauth_tokens(
        &self,
        id: Uuid,
        encrypted: &str,
        issuer: Option<&str>,
        client_id: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE external_mcp_sources SET
                oauth_tokens_encrypted = $2,
                oauth_issuer = COALESCE($3, oauth_issuer),
                oauth_client_id = COALESCE($4, oauth_client_id),
                updated_at = $5
            WHERE id = $1
            ",
        )
        .bind(id.to_string())
        .bind(encrypted)
        .bind(issuer)
        .bind(client_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Delete a source.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn delete_external_source(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM external_mcp_sources WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_source(row: &sqlx::sqlite::SqliteRow) -> Result<ExternalMcpSource> {
    let id: String = row.get("id");
    let server_id: String = row.get("server_id");
    let auth_type: String = row.get("auth_type");
    let transport_type: String = row.get("transport_type");
    let status: String = row.get("status");
    let cache: Option<String> = row.get("discovered_tools_cache");
    let created_at: DateTime<Utc> = row.get("created_at");
    let updated_at: DateTime<Utc> = row.get("updated_at");

    Ok(ExternalMcpSource {
        id: Uuid::parse_str(&id)?,
        server_id: Uuid::parse_str(&server_id)?,
        name: row.get("name"),
        url: row.get("url"),
        auth_type: auth_type.parse::<AuthType>().map_err(anyhow::Error::msg)?,
        auth_secret_name: row.get("auth_secret_name"),
        auth_header_name: row.get("auth_header_name"),
        transport_type: transport_type
            .parse::<TransportType>()
            .map_err(anyhow::Error::msg)?,
        status: status.parse::<SourceStatus>().map_err(anyhow::Error::msg)?,
        oauth_tokens_encrypted: row.get("oauth_tokens_encrypted"),
        oauth_issuer: row.get("oauth_issuer"),
        oauth_client_id: row.get("oauth_client_id"),
        tool_count: row.get("tool_count"),
        discovered_tools_cache: cache.as_deref().map(serde_json::from_str).transpose()?,
        last_discovered_at: row.get("last_discovered_at"),
        created_at,
        updated_at,
    })
}

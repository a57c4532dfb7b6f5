// ABOUTME: Tool and tool_version table schema and queries
// ABOUTME: Version rows are immutable snapshots; mutation logic lives in the tool service

use super::Database;
use crate::models::{ApprovalStatus, ChangeSource, Tool, ToolType, ToolVersion};
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

impl Database {
    pub(super) async fn migrate_tools(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS tools (
                id TEXT PRIMARY KEY,
                server_id TEXT NOT NULL REFERENCES servers(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                description TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                timeout_ms INTEGER,
                tool_type TEXT NOT NULL DEFAULT 'python_code',
                python_code TEXT,
                external_source_id TEXT,
                external_tool_name TEXT,
                input_schema TEXT,
                code_dependencies TEXT NOT NULL DEFAULT '[]',
                current_version INTEGER NOT NULL DEFAULT 1,
                approval_status TEXT NOT NULL DEFAULT 'draft',
                approval_requested_at TIMESTAMP,
                approved_at TIMESTAMP,
                approved_by TEXT,
                rejection_reason TEXT,
                created_by TEXT,
                publish_notes TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (server_id, name)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_tools_approval_status ON tools(approval_status)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS tool_versions (
                id TEXT PRIMARY KEY,
                tool_id TEXT NOT NULL REFERENCES tools(id) ON DELETE CASCADE,
                version_number INTEGER NOT NULL,
                name TEXT NOT NULL,
                description TEXT,
                enabled INTEGER NOT NULL DEFAULT 1,
                timeout_ms INTEGER,
                python_code TEXT,
                input_schema TEXT,
                change_summary TEXT,
                change_source TEXT NOT NULL DEFAULT 'manual',
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
                UNIQUE (tool_id, version_number)
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a tool row and its initial version in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if either insert fails (including the
    /// `(server_id, name)` uniqueness violation).
    pub async fn insert_tool(&self, tool: &Tool, change_source: ChangeSource) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            INSERT INTO tools (
                id, server_id, name, description, enabled, timeout_ms, tool_type,
                python_code, external_source_id, external_tool_name, input_schema,
                code_dependencies, current_version, approval_status,
                approval_requested_at, approved_at, approved_by, rejection_reason,
                created_by, publish_notes, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                      $15, $16, $17, $18, $19, $20, $21, $22)
            ",
        )
        .bind(tool.id.to_string())
        .bind(tool.server_id.to_string())
        .bind(&tool.name)
        .bind(&tool.description)
        .bind(tool.enabled)
        .bind(tool.timeout_ms)
        .bind(tool.tool_type.as_str())
        .bind(&tool.python_code)
        .bind(tool.external_source_id.map(|id| id.to_string()))
        .bind(&tool.external_tool_name)
        .bind(tool.input_schema.as_ref().map(Value::to_string))
        .bind(serde_json::to_string(&tool.code_dependencies)?)
        .bind(tool.current_version)
        .bind(tool.approval_status.as_str())
        .bind(tool.approval_requested_at)
        .bind(tool.approved_at)
        .bind(&tool.approved_by)
        .bind(&tool.rejection_reason)
        .bind(&tool.created_by)
        .bind(&tool.publish_notes)
        .bind(tool.created_at)
        .bind(tool.updated_at)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            INSERT INTO tool_versions (
                id, tool_id, version_number, name, description, enabled, timeout_ms,
                python_code, input_schema, change_summary, change_source, created_at
            ) VALUES ($1, $2, 1, $3, $4, $5, $6, $7, $8, 'Initial version', $9, $10)
            ",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tool.id.to_string())
        .bind(&tool.name)
        .bind(&tool.description)
        .bind(tool.enabled)
        .bind(tool.timeout_ms)
        .bind(&tool.python_code)
        .bind(tool.input_schema.as_ref().map(Value::to_string))
        .bind(change_source.as_str())
        .bind(tool.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Fetch a tool by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_tool(&self, id: Uuid) -> Result<Option<Tool>> {
        let row = sqlx::query("SELECT * FROM tools WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_tool).transpose()
    }

    /// List tools for a server, ordered by name.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_tools_by_server(&self, server_id: Uuid) -> Result<Vec<Tool>> {
        let rows = sqlx::query("SELECT * FROM tools WHERE server_id = $1 ORDER BY name")
            .bind(server_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(row_to_tool).collect()
    }

    /// Persist the mutable fields of a tool and append a version snapshot of
    /// the NEW state, atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails.
    pub async fn update_tool_with_version(
        &self,
        tool: &Tool,
        change_summary: &str,
        change_source: ChangeSource,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r"
            UPDATE tools SET
                name = $2,
                description = $3,
                enabled = $4,
                timeout_ms = $5,
                python_code = $6,
                input_schema = $7,
                code_dependencies = $8,
                current_version = $9,
                approval_status = $10,
                approved_at = $11,
                approved_by = $12,
                updated_at = $13
            WHERE id = $1
            ",
        )
        .bind(tool.id.to_string())
        .bind(&tool.name)
        .bind(&tool.description)
        .bind(tool.enabled)
        .bind(tool.timeout_ms)
        .bind(&tool.python_code)
        .bind(tool.input_schema.as_ref().map(Value::to_string))
        .bind(serde_json::to_string(&tool.code_dependencies)?)
        .bind(tool.current_version)
        .bind(tool.approval_status.as_str())
        .bind(tool.approved_at)
        .bind(&tool.approved_by)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r"
            INSERT INTO tool_versions (
                id, tool_id, version_number, name, description, enabled, timeout_ms,
                python_code, input_schema, change_summary, change_source, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(tool.id.to_string())
        .bind(tool.current_version)
        .bind(&tool.name)
        .bind(&tool.description)
        .bind(tool.enabled)
        .bind(tool.timeout_ms)
        .bind(&tool.python_code)
        .bind(tool.input_schema.as_ref().map(Value::to_string))
        .bind(change_summary)
        .bind(change_source.as_str())
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Update only approval-related fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn update_tool_approval(&self, tool: &Tool) -> Result<()> {
        sqlx::query(
            r"
            UPDATE tools SET
                approval_status = $2,
                approval_requested_at = $3,
                approved_at = $4,
                approved_by = $5,
                rejection_reason = $6,
                created_by = $7,
                publish_notes = $8,
                updated_at = $9
            WHERE id = $1
            ",
        )
        .bind(tool.id.to_string())
        .bind(tool.approval_status.as_str())
        .bind(tool.approval_requested_at)
        .bind(tool.approved_at)
        .bind(&tool.approved_by)
        .bind(&tool.rejection_reason)
        .bind(&tool.created_by)
        .bind(&tool.publish_notes)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flip the `enabled` toggle.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn set_tool_enabled(&self, id: Uuid, enabled: bool) -> Result<bool> {
        let result =
            sqlx::query("UPDATE tools SET enabled = $2, updated_at = $3 WHERE id = $1")
                .bind(id.to_string())
                .bind(enabled)
                .bind(Utc::now())
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete a tool; versions and workflow requests cascade.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn delete_tool(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM tools WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Version history, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_tool_versions(
        &self,
        tool_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ToolVersion>, i64)> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tool_versions WHERE tool_id = $1")
                .bind(tool_id.to_string())
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query(
            r"
            SELECT * FROM tool_versions WHERE tool_id = $1
            ORDER BY version_number DESC LIMIT $2 OFFSET $3
            ",
        )
        .bind(tool_id.to_string())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let versions = rows.iter().map(row_to_version).collect::<Result<_>>()?;
        Ok((versions, total))
    }

    /// Fetch one version snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_tool_version(
        &self,
        tool_id: Uuid,
        version_number: i64,
    ) -> Result<Option<ToolVersion>> {
        let row = sqlx::query(
            "SELECT * FROM tool_versions WHERE tool_id = $1 AND version_number = $2",
        )
        .bind(tool_id.to_string())
        .bind(version_number)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_version).transpose()
    }

    /// Full `server__tool` names of every enabled + approved tool. The
    /// gateway intersects this with the sandbox's registered set, which
    /// already excludes stopped servers.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn approved_tool_names(&self) -> Result<std::collections::HashSet<String>> {
        let rows = sqlx::query(
            r"
            SELECT servers.name AS server_name, tools.name AS tool_name
            FROM tools JOIN servers ON tools.server_id = servers.id
            WHERE tools.approval_status = 'approved' AND tools.enabled = 1
            ",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| {
                let server: String = row.get("server_name");
                let tool: String = row.get("tool_name");
                format!("{server}__{tool}")
            })
            .collect())
    }

    /// Count tools in one approval status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_tools_by_approval(&self, status: ApprovalStatus) -> Result<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM tools WHERE approval_status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?,
        )
    }

    /// Count tools approved since the given instant.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_tools_approved_since(&self, since: DateTime<Utc>) -> Result<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM tools WHERE approval_status = 'approved' AND approved_at >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?)
    }

    /// Count tools rejected since the given instant (by last update).
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_tools_rejected_since(&self, since: DateTime<Utc>) -> Result<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM tools WHERE approval_status = 'rejected' AND updated_at >= $1",
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?)
    }

    /// Tools in one approval status with server names, for the review queue.
    /// Ordered by request time, newest first, unrequested last.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_tools_by_approval(
        &self,
        status: ApprovalStatus,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<(Tool, String)>, i64)> {
        let total = self.count_tools_by_approval(status).await?;

        let rows = sqlx::query(
            r"
            SELECT tools.*, servers.name AS ctx_server_name
            FROM tools JOIN servers ON tools.server_id = servers.id
            WHERE tools.approval_status = $1
            ORDER BY tools.approval_requested_at IS NULL, tools.approval_requested_at DESC
            LIMIT $2 OFFSET $3
            ",
        )
        .bind(status.as_str())
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .iter()
            .map(|row| Ok((row_to_tool(row)?, row.get("ctx_server_name"))))
            .collect::<Result<_>>()?;
        Ok((items, total))
    }
}

pub(super) fn row_to_tool(row: &sqlx::sqlite::SqliteRow) -> Result<Tool> {
    let id: String = row.get("id");
    let server_id: String = row.get("server_id");
    let tool_type: String = row.get("tool_type");
    let approval_status: String = row.get("approval_status");
    let external_source_id: Option<String> = row.get("external_source_id");
    let input_schema: Option<String> = row.get("input_schema");
    let code_dependencies: String = row.get("code_dependencies");
    let created_at: DateTime<Utc> = row.get("created_at");
    let updated_at: DateTime<Utc> = row.get("updated_at");

    Ok(Tool {
        id: Uuid::parse_str(&id)?,
        server_id: Uuid::parse_str(&server_id)?,
        name: row.get("name"),
        description: row.get("description"),
        enabled: row.get("enabled"),
        timeout_ms: row.get("timeout_ms"),
        tool_type: tool_type.parse::<ToolType>().map_err(anyhow::Error::msg)?,
        python_code: row.get("python_code"),
        external_source_id: external_source_id
            .as_deref()
            .map(Uuid::parse_str)
            .transpose()?,
        external_tool_name: row.get("external_tool_name"),
        input_schema: input_schema
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        code_dependencies: serde_json::from_str(&code_dependencies).unwrap_or_default(),
        current_version: row.get("current_version"),
        approval_status: approval_status
            .parse::<ApprovalStatus>()
            .map_err(anyhow::Error::msg)?,
        approval_requested_at: row.get("approval_requested_at"),
        approved_at: row.get("approved_at"),
        approved_by: row.get("approved_by"),
        rejection_reason: row.get("rejection_reason"),
        created_by: row.get("created_by"),
        publish_notes: row.get("publish_notes"),
        created_at,
        updated_at,
    })
}

pub(super) fn row_to_version(row: &sqlx::sqlite::SqliteRow) -> Result<ToolVersion> {
    let id: String = row.get("id");
    let tool_id: String = row.get("tool_id");
    let change_source: String = row.get("change_source");
    let input_schema: Option<String> = row.get("input_schema");
    let created_at: DateTime<Utc> = row.get("created_at");

    Ok(ToolVersion {
        id: Uuid::parse_str(&id)?,
        tool_id: Uuid::parse_str(&tool_id)?,
        version_number: row.get("version_number"),
        name: row.get("name"),
        description: row.get("description"),
        enabled: row.get("enabled"),
        timeout_ms: row.get("timeout_ms"),
        python_code: row.get("python_code"),
        input_schema: input_schema
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?,
        change_summary: row.get("change_summary"),
        change_source: change_source
            .parse::<ChangeSource>()
            .map_err(anyhow::Error::msg)?,
        created_at,
    })
}

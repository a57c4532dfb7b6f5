// ABOUTME: Tool execution log table schema and queries
// ABOUTME: Records every invocation (production and test) with inputs, result, stdout, and timing

use super::Database;
use crate::models::ToolExecutionLog;
use anyhow::Result;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

impl Database {
    pub(super) async fn migrate_execution_logs(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS tool_execution_logs (
                id TEXT PRIMARY KEY,
                tool_id TEXT REFERENCES tools(id) ON DELETE CASCADE,
                server_id TEXT REFERENCES servers(id) ON DELETE CASCADE,
                tool_name TEXT NOT NULL,
                input_args TEXT,
                result TEXT,
                error TEXT,
                stdout TEXT,
                duration_ms INTEGER,
                success INTEGER NOT NULL DEFAULT 0,
                is_test INTEGER NOT NULL DEFAULT 0,
                executed_by TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_execution_tool_created ON tool_execution_logs(tool_id, created_at)",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Append an execution record.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn insert_execution_log(&self, log: &ToolExecutionLog) -> Result<()> {
        sqlx::query(
            r"
            INSERT INTO tool_execution_logs (
                id, tool_id, server_id, tool_name, input_args, result, error, stdout,
                duration_ms, success, is_test, executed_by, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ",
        )
        .bind(log.id.to_string())
        .bind(log.tool_id.map(|id| id.to_string()))
        .bind(log.server_id.map(|id| id.to_string()))
        .bind(&log.tool_name)
        .bind(log.input_args.as_ref().map(Value::to_string))
        .bind(log.result.as_ref().map(Value::to_string))
        .bind(&log.error)
        .bind(&log.stdout)
        .bind(log.duration_ms)
        .bind(log.success)
        .bind(log.is_test)
        .bind(&log.executed_by)
        .bind(log.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Recent executions for a tool, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_execution_logs(
        &self,
        tool_id: Uuid,
        limit: i64,
    ) -> Result<(Vec<ToolExecutionLog>, i64)> {
        let total: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM tool_execution_logs WHERE tool_id = $1")
                .bind(tool_id.to_string())
                .fetch_one(&self.pool)
                .await?;

        let rows = sqlx::query(
            r"
            SELECT * FROM tool_execution_logs WHERE tool_id = $1
            ORDER BY created_at DESC, id LIMIT $2
            ",
        )
        .bind(tool_id.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let logs = rows.iter().map(row_to_execution_log).collect::<Result<_>>()?;
        Ok((logs, total))
    }
}

fn row_to_execution_log(row: &sqlx::sqlite::SqliteRow) -> Result<ToolExecutionLog> {
    let id: String = row.get("id");
    let tool_id: Option<String> = row.get("tool_id");
    let server_id: Option<String> = row.get("server_id");
    let input_args: Option<String> = row.get("input_args");
    let result: Option<String> = row.get("result");
    let created_at: DateTime<Utc> = row.get("created_at");

    Ok(ToolExecutionLog {
        id: Uuid::parse_str(&id)?,
        tool_id: tool_id.as_deref().map(Uuid::parse_str).transpose()?,
        server_id: server_id.as_deref().map(Uuid::parse_str).transpose()?,
        tool_name: row.get("tool_name"),
        input_args: input_args.as_deref().map(serde_json::from_str).transpose()?,
        result: result.as_deref().map(serde_json::from_str).transpose()?,
        error: row.get("error"),
        stdout: row.get("stdout"),
        duration_ms: row.get("duration_ms"),
        success: row.get("success"),
        is_test: row.get("is_test"),
        executed_by: row.get("executed_by"),
        created_at,
    })
}

// ABOUTME: Append-only record of tool executions, production runs and test runs alike
// ABOUTME: Input arguments are sanitized before storage so secrets never land in history

use crate::activity::sanitize_params;
use crate::database::Database;
use crate::models::ToolExecutionLog;
use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

/// Fields for one execution record.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub tool_id: Option<Uuid>,
    pub server_id: Option<Uuid>,
    pub tool_name: String,
    pub input_args: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub stdout: Option<String>,
    pub duration_ms: Option<i64>,
    pub success: bool,
    pub is_test: bool,
    pub executed_by: Option<String>,
}

/// Service over the execution history.
#[derive(Clone)]
pub struct ExecutionLogService {
    database: Database,
}

impl ExecutionLogService {
    #[must_use]
    pub const fn new(database: Database) -> Self {
        Self { database }
    }

    /// Append one record, sanitizing the input arguments.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn record(&self, record: ExecutionRecord) -> Result<ToolExecutionLog> {
        let log = ToolExecutionLog {
            id: Uuid::new_v4(),
            tool_id: record.tool_id,
            server_id: record.server_id,
            tool_name: record.tool_name,
            input_args: record.input_args.as_ref().map(sanitize_params),
            result: record.result,
            error: record.error,
            stdout: record.stdout,
            duration_ms: record.duration_ms,
            success: record.success,
            is_test: record.is_test,
            executed_by: record.executed_by,
            created_at: Utc::now(),
        };
        self.database.insert_execution_log(&log).await?;
        Ok(log)
    }

    /// Recent executions for a tool, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_for_tool(
        &self,
        tool_id: Uuid,
        limit: i64,
    ) -> Result<(Vec<ToolExecutionLog>, i64)> {
        self.database.list_execution_logs(tool_id, limit).await
    }
}

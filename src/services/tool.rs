// ABOUTME: Tool mutation service: immutable version history and the approval-reset safety rule
// ABOUTME: Any change to python_code forces approval back to pending_review, rollback included

use super::code_analysis;
use crate::database::Database;
use crate::models::{ApprovalStatus, ChangeSource, Tool, ToolType, ToolVersion};
use anyhow::Result;
use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

/// Fields for creating a tool.
#[derive(Debug, Clone)]
pub struct ToolCreate {
    pub name: String,
    pub description: Option<String>,
    pub python_code: Option<String>,
    pub tool_type: ToolType,
    pub external_source_id: Option<Uuid>,
    pub external_tool_name: Option<String>,
    pub input_schema: Option<Value>,
    pub timeout_ms: Option<i64>,
    pub created_by: Option<String>,
    pub change_source: ChangeSource,
}

/// Partial tool update. Absent fields are untouched; provided fields equal
/// to the current value count as unchanged.
#[derive(Debug, Clone, Default)]
pub struct ToolUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub enabled: Option<bool>,
    pub timeout_ms: Option<i64>,
    pub python_code: Option<String>,
    pub change_source: Option<ChangeSource>,
}

/// Per-field difference between two versions.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VersionDiff {
    pub field: String,
    pub from: Option<String>,
    pub to: Option<String>,
}

/// Service owning tool mutation, versioning, and the approval-reset rule.
#[derive(Clone)]
pub struct ToolService {
    database: Database,
}

impl ToolService {
    #[must_use]
    pub const fn new(database: Database) -> Self {
        Self { database }
    }

    /// Create a tool in `draft` status with version 1.
    ///
    /// For `python_code` tools the input schema and code dependencies are
    /// derived from the code unless a schema was supplied (imports).
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails (including duplicate names
    /// within the server).
    pub async fn create(&self, server_id: Uuid, data: ToolCreate) -> Result<Tool> {
        let (input_schema, code_dependencies) = match (&data.python_code, &data.input_schema) {
            (Some(code), None) => (
                Some(code_analysis::extract_input_schema(code)),
                code_analysis::extract_imports(code),
            ),
            (Some(code), Some(schema)) => {
                (Some(schema.clone()), code_analysis::extract_imports(code))
            }
            (None, schema) => (schema.clone(), Vec::new()),
        };

        let now = Utc::now();
        let tool = Tool {
            id: Uuid::new_v4(),
            server_id,
            name: data.name,
            description: data.description,
            enabled: true,
            timeout_ms: data.timeout_ms,
            tool_type: data.tool_type,
            python_code: data.python_code,
            external_source_id: data.external_source_id,
            external_tool_name: data.external_tool_name,
            input_schema,
            code_dependencies,
            current_version: 1,
            approval_status: ApprovalStatus::Draft,
            approval_requested_at: None,
            approved_at: None,
            approved_by: None,
            rejection_reason: None,
            created_by: data.created_by,
            publish_notes: None,
            created_at: now,
            updated_at: now,
        };

        self.database.insert_tool(&tool, data.change_source).await?;
        tracing::info!(tool = %tool.name, server_id = %server_id, "tool created");
        Ok(tool)
    }

    /// Apply a partial update. Returns `None` when the tool does not exist.
    ///
    /// When nothing actually changed, versioning is skipped entirely and the
    /// current state is returned as-is. A change to `python_code` resets
    /// `approval_status` to `pending_review` whatever it was before; the
    /// reset and the new version row are written in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails.
    pub async fn update(&self, tool_id: Uuid, update: ToolUpdate) -> Result<Option<Tool>> {
        let Some(mut tool) = self.database.get_tool(tool_id).await? else {
            return Ok(None);
        };

        let mut changed_fields: Vec<&str> = Vec::new();

        if let Some(name) = update.name {
            if name != tool.name {
                tool.name = name;
                changed_fields.push("name");
            }
        }
        if let Some(description) = update.description {
            if Some(&description) != tool.description.as_ref() {
                tool.description = Some(description);
                changed_fields.push("description");
            }
        }
        if let Some(enabled) = update.enabled {
            if enabled != tool.enabled {
                tool.enabled = enabled;
                changed_fields.push("enabled");
            }
        }
        if let Some(timeout_ms) = update.timeout_ms {
            if Some(timeout_ms) != tool.timeout_ms {
                tool.timeout_ms = Some(timeout_ms);
                changed_fields.push("timeout_ms");
            }
        }
        if let Some(python_code) = update.python_code {
            if Some(&python_code) != tool.python_code.as_ref() {
                tool.input_schema = Some(code_analysis::extract_input_schema(&python_code));
                tool.code_dependencies = code_analysis::extract_imports(&python_code);
                tool.python_code = Some(python_code);
                changed_fields.push("python_code");

                // The safety rule: edited code is never still approved.
                tool.approval_status = ApprovalStatus::PendingReview;
                tool.approved_at = None;
                tool.approved_by = None;
            }
        }

        if changed_fields.is_empty() {
            return Ok(Some(tool));
        }

        tool.current_version += 1;
        let change_summary = format!("Updated {}", changed_fields.join(", "));
        self.database
            .update_tool_with_version(
                &tool,
                &change_summary,
                update.change_source.unwrap_or(ChangeSource::Manual),
            )
            .await?;

        tracing::info!(
            tool = %tool.name,
            version = tool.current_version,
            changes = %change_summary,
            "tool updated"
        );
        Ok(Some(tool))
    }

    /// Roll a tool back to an earlier version by writing a NEW version whose
    /// content equals the old one. Always resets approval to
    /// `pending_review`. Returns `None` when the tool or version does not
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails.
    pub async fn rollback(&self, tool_id: Uuid, version_number: i64) -> Result<Option<Tool>> {
        let Some(mut tool) = self.database.get_tool(tool_id).await? else {
            return Ok(None);
        };
        let Some(version) = self.database.get_tool_version(tool_id, version_number).await? else {
            return Ok(None);
        };

        tool.name = version.name;
        tool.description = version.description;
        tool.enabled = version.enabled;
        tool.timeout_ms = version.timeout_ms;
        tool.input_schema = version.input_schema;
        tool.code_dependencies = version
            .python_code
            .as_deref()
            .map(code_analysis::extract_imports)
            .unwrap_or_default();
        tool.python_code = version.python_code;

        tool.approval_status = ApprovalStatus::PendingReview;
        tool.approved_at = None;
        tool.approved_by = None;

        tool.current_version += 1;
        let change_summary = format!("Rolled back to version {version_number}");
        self.database
            .update_tool_with_version(&tool, &change_summary, ChangeSource::Rollback)
            .await?;

        tracing::info!(
            tool = %tool.name,
            from_version = version_number,
            new_version = tool.current_version,
            "tool rolled back"
        );
        Ok(Some(tool))
    }

    /// Toggle the enabled flag; returns the new state, `None` when missing.
    ///
    /// # Errors
    ///
    /// Returns an error if any statement fails.
    pub async fn toggle_enabled(&self, tool_id: Uuid) -> Result<Option<bool>> {
        let Some(tool) = self.database.get_tool(tool_id).await? else {
            return Ok(None);
        };
        let next = !tool.enabled;
        self.database.set_tool_enabled(tool_id, next).await?;
        Ok(Some(next))
    }

    /// Per-field diff of two versions.
    ///
    /// # Errors
    ///
    /// Returns an error if any query fails.
    pub async fn compare_versions(
        &self,
        tool_id: Uuid,
        from: i64,
        to: i64,
    ) -> Result<Option<Vec<VersionDiff>>> {
        let Some(a) = self.database.get_tool_version(tool_id, from).await? else {
            return Ok(None);
        };
        let Some(b) = self.database.get_tool_version(tool_id, to).await? else {
            return Ok(None);
        };

        Ok(Some(diff_versions(&a, &b)))
    }
}

fn diff_versions(a: &ToolVersion, b: &ToolVersion) -> Vec<VersionDiff> {
    let mut diffs = Vec::new();
    let mut push = |field: &str, from: Option<String>, to: Option<String>| {
        if from != to {
            diffs.push(VersionDiff {
                field: field.to_string(),
                from,
                to,
            });
        }
    };

    push("name", Some(a.name.clone()), Some(b.name.clone()));
    push("description", a.description.clone(), b.description.clone());
    push(
        "enabled",
        Some(a.enabled.to_string()),
        Some(b.enabled.to_string()),
    );
    push(
        "timeout_ms",
        a.timeout_ms.map(|t| t.to_string()),
        b.timeout_ms.map(|t| t.to_string()),
    );
    push("python_code", a.python_code.clone(), b.python_code.clone());
    diffs
}

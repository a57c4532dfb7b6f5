// ABOUTME: Management handlers for tool CRUD, validation, testing, versions, and execution logs
// ABOUTME: Code changes flow through the tool service so the approval reset cannot be bypassed

use super::registration;
use super::{required_str, uuid_arg, valid_name};
use crate::constants::{settings_keys, TEST_EXECUTION_TIMEOUT_SECS};
use crate::context::ServerResources;
use crate::models::{ChangeSource, NetworkMode, ToolType};
use crate::sandbox::ExecuteCodeRequest;
use crate::services::execution_log::ExecutionRecord;
use crate::services::{
    code_analysis, ExecutionLogService, GlobalConfigService, SecretService, SettingService,
    ToolService,
};
use crate::services::tool::{ToolCreate, ToolUpdate};
use serde_json::{json, Value};

pub(super) async fn list_tools(resources: &ServerResources, args: &Value) -> Value {
    let server_id = match uuid_arg(args, "server_id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    let server = match resources.database.get_server(server_id).await {
        Ok(Some(server)) => server,
        Ok(None) => return json!({ "error": format!("Server {server_id} not found") }),
        Err(err) => {
            tracing::error!(error = %err, "failed to load server");
            return json!({ "error": "Failed to list tools due to an internal error" });
        }
    };

    match resources.database.list_tools_by_server(server_id).await {
        Ok(tools) => json!({
            "server_id": server_id.to_string(),
            "server_name": server.name,
            "tools": tools.iter().map(|t| json!({
                "id": t.id.to_string(),
                "name": t.name,
                "description": t.description,
                "enabled": t.enabled,
                "approval_status": t.approval_status.as_str(),
            })).collect::<Vec<_>>(),
            "total": tools.len(),
        }),
        Err(err) => {
            tracing::error!(error = %err, "failed to list tools");
            json!({ "error": "Failed to list tools due to an internal error" })
        }
    }
}

pub(super) async fn get_tool(resources: &ServerResources, args: &Value) -> Value {
    let tool_id = match uuid_arg(args, "tool_id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    match resources.database.get_tool(tool_id).await {
        Ok(Some(tool)) => json!({
            "id": tool.id.to_string(),
            "server_id": tool.server_id.to_string(),
            "name": tool.name,
            "description": tool.description,
            "enabled": tool.enabled,
            "timeout_ms": tool.timeout_ms,
            "tool_type": tool.tool_type.as_str(),
            "input_schema": tool.input_schema,
            "code_dependencies": tool.code_dependencies,
            "current_version": tool.current_version,
            "approval_status": tool.approval_status.as_str(),
            "python_code": tool.python_code,
        }),
        Ok(None) => json!({ "error": format!("Tool {tool_id} not found") }),
        Err(err) => {
            tracing::error!(error = %err, "failed to load tool");
            json!({ "error": "Failed to load tool due to an internal error" })
        }
    }
}

pub(super) async fn create_tool(resources: &ServerResources, args: &Value) -> Value {
    let server_id = match uuid_arg(args, "server_id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    if resources
        .database
        .get_server(server_id)
        .await
        .ok()
        .flatten()
        .is_none()
    {
        return json!({ "error": format!("Server {server_id} not found") });
    }

    let name = match required_str(args, "name") {
        Ok(name) => name,
        Err(err) => return err,
    };
    if !valid_name(name) {
        return json!({
            "error": "name must be lowercase alphanumeric with underscores, starting with a letter"
        });
    }

    let python_code = match required_str(args, "python_code") {
        Ok(code) => code,
        Err(err) => return err,
    };

    let validation = code_analysis::validate_python_code(python_code);
    if !validation.valid {
        return json!({
            "error": format!("Invalid Python code: {}", validation.error.unwrap_or_default())
        });
    }
    if !validation.has_main {
        return json!({ "error": "Python code must contain an async def main() function" });
    }

    let service = ToolService::new(resources.database.clone());
    let create = ToolCreate {
        name: name.to_string(),
        description: args
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        python_code: Some(python_code.to_string()),
        tool_type: ToolType::PythonCode,
        external_source_id: None,
        external_tool_name: None,
        input_schema: None,
        timeout_ms: None,
        created_by: None,
        change_source: ChangeSource::Llm,
    };

    match service.create(server_id, create).await {
        Ok(tool) => json!({
            "success": true,
            "id": tool.id.to_string(),
            "name": tool.name,
            "message": format!("Tool '{name}' created successfully"),
        }),
        Err(err) => {
            tracing::error!(error = %err, name, "failed to create tool");
            json!({ "error": "Failed to create tool due to an internal error" })
        }
    }
}

pub(super) async fn update_tool(resources: &ServerResources, args: &Value) -> Value {
    let tool_id = match uuid_arg(args, "tool_id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    let mut update = ToolUpdate {
        name: args.get("name").and_then(Value::as_str).map(str::to_string),
        description: args
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
        enabled: args.get("enabled").and_then(Value::as_bool),
        timeout_ms: args.get("timeout_ms").and_then(Value::as_i64),
        python_code: None,
        change_source: Some(ChangeSource::Llm),
    };

    if let Some(name) = &update.name {
        if !valid_name(name) {
            return json!({
                "error": "name must be lowercase alphanumeric with underscores, starting with a letter"
            });
        }
    }

    if let Some(python_code) = args.get("python_code").and_then(Value::as_str) {
        let validation = code_analysis::validate_python_code(python_code);
        if !validation.valid {
            return json!({
                "error": format!("Invalid Python code: {}", validation.error.unwrap_or_default())
            });
        }
        if !validation.has_main {
            return json!({ "error": "Python code must contain an async def main() function" });
        }
        update.python_code = Some(python_code.to_string());
    }

    if update.name.is_none()
        && update.description.is_none()
        && update.enabled.is_none()
        && update.timeout_ms.is_none()
        && update.python_code.is_none()
    {
        return json!({ "error": "No fields to update" });
    }

    let touches_visible_fields = update.name.is_some()
        || update.description.is_some()
        || update.enabled.is_some()
        || update.python_code.is_some();

    let service = ToolService::new(resources.database.clone());
    match service.update(tool_id, update).await {
        Ok(Some(tool)) => {
            if touches_visible_fields {
                registration::refresh_if_running(resources, tool.server_id).await;
            }
            json!({
                "success": true,
                "id": tool.id.to_string(),
                "name": tool.name,
                "approval_status": tool.approval_status.as_str(),
                "current_version": tool.current_version,
                "message": format!("Tool '{}' updated successfully", tool.name),
            })
        }
        Ok(None) => json!({ "error": format!("Tool {tool_id} not found") }),
        Err(err) => {
            tracing::error!(error = %err, "failed to update tool");
            json!({ "error": "Failed to update tool due to an internal error" })
        }
    }
}

pub(super) async fn delete_tool(resources: &ServerResources, args: &Value) -> Value {
    let tool_id = match uuid_arg(args, "tool_id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    let tool = match resources.database.get_tool(tool_id).await {
        Ok(Some(tool)) => tool,
        Ok(None) => return json!({ "error": format!("Tool {tool_id} not found") }),
        Err(err) => {
            tracing::error!(error = %err, "failed to load tool");
            return json!({ "error": "Failed to delete tool due to an internal error" });
        }
    };

    match resources.database.delete_tool(tool_id).await {
        Ok(true) => {
            registration::refresh_if_running(resources, tool.server_id).await;
            json!({
                "success": true,
                "message": format!("Tool {tool_id} deleted successfully"),
            })
        }
        Ok(false) => json!({ "error": format!("Tool {tool_id} not found") }),
        Err(err) => {
            tracing::error!(error = %err, "failed to delete tool");
            json!({ "error": "Failed to delete tool due to an internal error" })
        }
    }
}

pub(super) async fn validate_code(_resources: &ServerResources, args: &Value) -> Value {
    let code = match required_str(args, "code") {
        Ok(code) => code,
        Err(err) => return err,
    };

    let validation = code_analysis::validate_python_code(code);
    let mut result = json!({
        "valid": validation.valid,
        "has_main": validation.has_main,
        "error": validation.error,
        "parameters": validation.parameters,
    });

    if validation.valid && validation.has_main {
        result["input_schema"] = code_analysis::extract_input_schema(code);
    }

    result
}

pub(super) async fn get_server_modules(resources: &ServerResources, _args: &Value) -> Value {
    let config = GlobalConfigService::new(resources.database.clone());
    let allowed = match config.get_allowed_modules().await {
        Ok(mut modules) => {
            modules.sort();
            modules
        }
        Err(err) => {
            tracing::error!(error = %err, "failed to load allowed modules");
            return json!({ "error": "Failed to load module configuration" });
        }
    };
    let is_custom = !config.is_using_defaults().await.unwrap_or(true);
    let mut defaults = GlobalConfigService::default_modules();
    defaults.sort();

    json!({
        "is_custom_config": is_custom,
        "total_allowed": allowed.len(),
        "allowed_modules": allowed,
        "default_modules": defaults,
        "description": "These are the Python modules you can import in your tool code. \
                        Module configuration is global and applies to all servers. \
                        Use mcpbox_request_module to request additional modules.",
    })
}

/// Run a saved tool's code against the sandbox with its production
/// environment. The approval gate applies: in require_approval mode an
/// unapproved tool cannot run, even as a test.
pub(super) async fn test_code(resources: &ServerResources, args: &Value) -> Value {
    let tool_id = match uuid_arg(args, "tool_id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    let tool = match resources.database.get_tool(tool_id).await {
        Ok(Some(tool)) => tool,
        Ok(None) => return json!({ "error": format!("Tool {tool_id} not found") }),
        Err(err) => {
            tracing::error!(error = %err, "failed to load tool");
            return json!({ "error": "Test execution failed due to an internal error" });
        }
    };

    let Some(code) = tool.python_code.clone() else {
        return json!({ "error": "Tool has no code to test" });
    };

    let settings = SettingService::new(resources.database.clone());
    let approval_mode = settings
        .get_value_or(settings_keys::TOOL_APPROVAL_MODE, "require_approval")
        .await
        .unwrap_or_else(|_| "require_approval".into());
    if approval_mode == "require_approval"
        && tool.approval_status != crate::models::ApprovalStatus::Approved
    {
        return json!({
            "error": format!(
                "Tool '{}' cannot be tested until it is approved (current status: {}). \
                 Use mcpbox_request_publish to submit it for admin review, \
                 or ask the admin to set tool_approval_mode to 'auto_approve'.",
                tool.name, tool.approval_status
            )
        });
    }

    let arguments = args.get("arguments").cloned().unwrap_or_else(|| json!({}));

    let config = GlobalConfigService::new(resources.database.clone());
    let allowed_modules = config.get_allowed_modules().await.ok();

    let secret_service = SecretService::new(resources.database.clone(), resources.cipher.clone());
    let secrets = match secret_service.decrypted_for_injection(tool.server_id).await {
        Ok(secrets) => secrets,
        Err(err) => {
            tracing::error!(error = %err, "cannot prepare secrets for test run");
            return json!({ "error": "A stored secret is unavailable; test run aborted" });
        }
    };

    let allowed_hosts = match resources.database.get_server(tool.server_id).await {
        Ok(Some(server)) if server.network_mode == NetworkMode::Allowlist => {
            Some(server.allowed_hosts)
        }
        _ => None,
    };

    let started = std::time::Instant::now();
    let outcome = resources
        .sandbox
        .execute_code(&ExecuteCodeRequest {
            code,
            arguments: arguments.clone(),
            secrets,
            allowed_hosts,
            allowed_modules,
            timeout_seconds: TEST_EXECUTION_TIMEOUT_SECS,
        })
        .await;
    let duration_ms = started.elapsed().as_millis() as i64;

    // The test run always lands in the execution history; a logging
    // failure must not fail the test itself.
    let log_service = ExecutionLogService::new(resources.database.clone());
    if let Err(err) = log_service
        .record(ExecutionRecord {
            tool_id: Some(tool.id),
            server_id: Some(tool.server_id),
            tool_name: tool.name.clone(),
            input_args: Some(json!({ "arguments": arguments })),
            result: outcome.result.clone(),
            error: outcome.error.clone(),
            stdout: outcome.stdout.clone(),
            duration_ms: Some(outcome.duration_ms.unwrap_or(duration_ms)),
            success: outcome.success,
            is_test: true,
            executed_by: None,
        })
        .await
    {
        tracing::warn!(error = %err, "failed to save test execution log");
    }

    serde_json::to_value(&outcome)
        .unwrap_or_else(|_| json!({ "error": "Test execution produced an unserializable result" }))
}

pub(super) async fn list_tool_versions(resources: &ServerResources, args: &Value) -> Value {
    let tool_id = match uuid_arg(args, "tool_id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    let tool = match resources.database.get_tool(tool_id).await {
        Ok(Some(tool)) => tool,
        Ok(None) => return json!({ "error": format!("Tool {tool_id} not found") }),
        Err(err) => {
            tracing::error!(error = %err, "failed to load tool");
            return json!({ "error": "Failed to list versions due to an internal error" });
        }
    };

    match resources.database.list_tool_versions(tool_id, 50, 0).await {
        Ok((versions, total)) => json!({
            "tool_id": tool.id.to_string(),
            "tool_name": tool.name,
            "current_version": tool.current_version,
            "total_versions": total,
            "versions": versions.iter().map(|v| json!({
                "version": v.version_number,
                "change_summary": v.change_summary,
                "change_source": v.change_source.as_str(),
                "created_at": v.created_at.to_rfc3339(),
            })).collect::<Vec<_>>(),
        }),
        Err(err) => {
            tracing::error!(error = %err, "failed to list versions");
            json!({ "error": "Failed to list versions due to an internal error" })
        }
    }
}

pub(super) async fn rollback_tool(resources: &ServerResources, args: &Value) -> Value {
    let tool_id = match uuid_arg(args, "tool_id") {
        Ok(id) => id,
        Err(err) => return err,
    };
    let Some(version) = args.get("version").and_then(Value::as_i64) else {
        return json!({ "error": "version must be an integer" });
    };

    let service = ToolService::new(resources.database.clone());
    match service.rollback(tool_id, version).await {
        Ok(Some(tool)) => {
            registration::refresh_if_running(resources, tool.server_id).await;
            json!({
                "success": true,
                "tool_id": tool.id.to_string(),
                "name": tool.name,
                "current_version": tool.current_version,
                "approval_status": tool.approval_status.as_str(),
                "message": format!(
                    "Tool '{}' rolled back to version {version}. Current version is now {}.",
                    tool.name, tool.current_version
                ),
            })
        }
        Ok(None) => json!({
            "error": format!("Tool {tool_id} not found or version {version} does not exist")
        }),
        Err(err) => {
            tracing::error!(error = %err, "rollback failed");
            json!({ "error": "Failed to rollback tool due to an internal error" })
        }
    }
}

pub(super) async fn get_tool_logs(resources: &ServerResources, args: &Value) -> Value {
    let tool_id = match uuid_arg(args, "tool_id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    let tool = match resources.database.get_tool(tool_id).await {
        Ok(Some(tool)) => tool,
        Ok(None) => return json!({ "error": format!("Tool {tool_id} not found") }),
        Err(err) => {
            tracing::error!(error = %err, "failed to load tool");
            return json!({ "error": "Failed to load execution logs" });
        }
    };

    let limit = args
        .get("limit")
        .and_then(Value::as_i64)
        .unwrap_or(10)
        .clamp(1, 50);

    let log_service = ExecutionLogService::new(resources.database.clone());
    match log_service.list_for_tool(tool_id, limit).await {
        Ok((logs, total)) => json!({
            "tool_id": tool.id.to_string(),
            "tool_name": tool.name,
            "logs": logs.iter().map(|log| json!({
                "id": log.id.to_string(),
                "success": log.success,
                "duration_ms": log.duration_ms,
                "error": log.error,
                "input_args": log.input_args,
                "result": log.result,
                "stdout": log.stdout,
                "is_test": log.is_test,
                "executed_by": log.executed_by,
                "created_at": log.created_at.to_rfc3339(),
            })).collect::<Vec<_>>(),
            "total": total,
        }),
        Err(err) => {
            tracing::error!(error = %err, "failed to list execution logs");
            json!({ "error": "Failed to load execution logs" })
        }
    }
}

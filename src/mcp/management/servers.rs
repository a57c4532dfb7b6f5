// ABOUTME: Management handlers for server CRUD and lifecycle (start/stop)
// ABOUTME: Starting registers the publishable tool set with the sandbox; stopping unregisters

use super::registration;
use super::{required_str, uuid_arg, valid_name};
use crate::context::ServerResources;
use crate::database::servers::ServerCreate;
use crate::models::{RequestStatus, ServerStatus};
use serde_json::{json, Value};

pub(super) async fn list_servers(resources: &ServerResources, args: &Value) -> Value {
    let page = args.get("page").and_then(Value::as_i64).unwrap_or(1).max(1);
    let page_size = args
        .get("page_size")
        .and_then(Value::as_i64)
        .unwrap_or(50)
        .clamp(1, 100);

    match resources
        .database
        .list_servers(page_size, (page - 1) * page_size)
        .await
    {
        Ok((servers, total)) => json!({
            "servers": servers.iter().map(|s| json!({
                "id": s.id.to_string(),
                "name": s.name,
                "description": s.description,
                "status": s.status.as_str(),
                "created_at": s.created_at.to_rfc3339(),
            })).collect::<Vec<_>>(),
            "total": total,
            "page": page,
            "page_size": page_size,
        }),
        Err(err) => {
            tracing::error!(error = %err, "failed to list servers");
            json!({ "error": "Failed to list servers due to an internal error" })
        }
    }
}

pub(super) async fn get_server(resources: &ServerResources, args: &Value) -> Value {
    let server_id = match uuid_arg(args, "server_id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    let server = match resources.database.get_server(server_id).await {
        Ok(Some(server)) => server,
        Ok(None) => return json!({ "error": format!("Server {server_id} not found") }),
        Err(err) => {
            tracing::error!(error = %err, "failed to load server");
            return json!({ "error": "Failed to load server due to an internal error" });
        }
    };

    let tools = resources
        .database
        .list_tools_by_server(server_id)
        .await
        .unwrap_or_default();

    let (pending_modules, pending_network) = resources
        .database
        .count_requests_for_server(server_id, RequestStatus::Pending)
        .await
        .unwrap_or((0, 0));

    json!({
        "id": server.id.to_string(),
        "name": server.name,
        "description": server.description,
        "status": server.status.as_str(),
        "network_mode": server.network_mode.as_str(),
        "allowed_hosts": server.allowed_hosts,
        "default_timeout_ms": server.default_timeout_ms,
        "created_at": server.created_at.to_rfc3339(),
        "updated_at": server.updated_at.to_rfc3339(),
        "tools": tools.iter().map(|t| json!({
            "id": t.id.to_string(),
            "name": t.name,
            "description": t.description,
            "enabled": t.enabled,
            "approval_status": t.approval_status.as_str(),
        })).collect::<Vec<_>>(),
        "tool_count": tools.len(),
        "pending_requests": {
            "modules": pending_modules,
            "network": pending_network,
        },
    })
}

pub(super) async fn create_server(resources: &ServerResources, args: &Value) -> Value {
    let name = match required_str(args, "name") {
        Ok(name) => name,
        Err(err) => return err,
    };

    if !valid_name(name) {
        return json!({
            "error": "name must be lowercase alphanumeric with underscores, starting with a letter"
        });
    }

    let data = ServerCreate {
        name: name.to_string(),
        description: args
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
    };

    match resources.database.create_server(&data).await {
        Ok(server) => json!({
            "success": true,
            "id": server.id.to_string(),
            "name": server.name,
            "message": format!("Server '{name}' created successfully"),
        }),
        Err(err) => {
            tracing::error!(error = %err, name, "failed to create server");
            json!({ "error": "Failed to create server due to an internal error" })
        }
    }
}

pub(super) async fn delete_server(resources: &ServerResources, args: &Value) -> Value {
    let server_id = match uuid_arg(args, "server_id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    // Drop the sandbox registration first so no orphaned tools stay callable.
    if let Ok(Some(server)) = resources.database.get_server(server_id).await {
        if server.status == ServerStatus::Running {
            resources
                .sandbox
                .unregister_server(&server_id.to_string())
                .await;
        }
    }

    match resources.database.delete_server(server_id).await {
        Ok(true) => {
            resources.tool_changes.notify();
            json!({
                "success": true,
                "message": format!("Server {server_id} deleted successfully"),
            })
        }
        Ok(false) => json!({ "error": format!("Server {server_id} not found") }),
        Err(err) => {
            tracing::error!(error = %err, "failed to delete server");
            json!({ "error": "Failed to delete server due to an internal error" })
        }
    }
}

pub(super) async fn start_server(resources: &ServerResources, args: &Value) -> Value {
    let server_id = match uuid_arg(args, "server_id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    let server = match resources.database.get_server(server_id).await {
        Ok(Some(server)) => server,
        Ok(None) => return json!({ "error": format!("Server {server_id} not found") }),
        Err(err) => {
            tracing::error!(error = %err, "failed to load server");
            return json!({ "error": "Failed to start server due to an internal error" });
        }
    };

    if server.status == ServerStatus::Running {
        return json!({ "error": "Server is already running" });
    }

    let tools = match resources.database.list_tools_by_server(server_id).await {
        Ok(tools) => tools,
        Err(err) => {
            tracing::error!(error = %err, "failed to load tools");
            return json!({ "error": "Failed to start server due to an internal error" });
        }
    };

    if registration::build_tool_definitions(&tools).is_empty() {
        if tools.is_empty() {
            return json!({ "error": "Server has no tools defined. Add tools first." });
        }
        return json!({
            "error": "Server has no approved and enabled tools. \
                      Use mcpbox_request_publish to submit tools for approval, \
                      then approve them in the admin UI."
        });
    }

    let outcome = match registration::register_with_sandbox(resources, &server).await {
        Ok(outcome) => outcome,
        Err(err) => {
            tracing::error!(error = %err, server = %server.name, "failed to build registration");
            let _ = resources
                .database
                .update_server_status(server_id, ServerStatus::Error)
                .await;
            return json!({ "error": "Failed to start server due to an internal error" });
        }
    };

    if !outcome.success {
        tracing::error!(error = ?outcome.error, "sandbox registration failed");
        let _ = resources
            .database
            .update_server_status(server_id, ServerStatus::Error)
            .await;
        return json!({ "error": "Failed to register server with sandbox" });
    }

    if let Err(err) = resources
        .database
        .update_server_status(server_id, ServerStatus::Running)
        .await
    {
        tracing::error!(error = %err, "failed to update server status");
        return json!({ "error": "Failed to start server due to an internal error" });
    }

    resources.tool_changes.notify();

    json!({
        "success": true,
        "message": format!("Server '{}' started", server.name),
        "status": "running",
        "registered_tools": outcome.tools_registered,
    })
}

pub(super) async fn stop_server(resources: &ServerResources, args: &Value) -> Value {
    let server_id = match uuid_arg(args, "server_id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    let server = match resources.database.get_server(server_id).await {
        Ok(Some(server)) => server,
        Ok(None) => return json!({ "error": format!("Server {server_id} not found") }),
        Err(err) => {
            tracing::error!(error = %err, "failed to load server");
            return json!({ "error": "Failed to stop server due to an internal error" });
        }
    };

    if server.status != ServerStatus::Running {
        return json!({ "error": "Server is not running" });
    }

    resources
        .sandbox
        .unregister_server(&server_id.to_string())
        .await;

    if let Err(err) = resources
        .database
        .update_server_status(server_id, ServerStatus::Stopped)
        .await
    {
        tracing::error!(error = %err, "failed to update server status");
        return json!({ "error": "Failed to stop server due to an internal error" });
    }

    resources.tool_changes.notify();

    json!({
        "success": true,
        "message": format!("Server '{}' stopped", server.name),
        "status": "stopped",
    })
}

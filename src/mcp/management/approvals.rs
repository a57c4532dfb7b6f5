// ABOUTME: Management handlers for the approval workflows: publish, module, and network requests
// ABOUTME: Auto-approved publishes re-register the running server so the tool goes live at once

use super::registration;
use super::{required_str, uuid_arg};
use crate::context::ServerResources;
use crate::models::ApprovalStatus;
use crate::services::{ApprovalService, SettingService};
use serde_json::{json, Value};

pub(super) async fn request_publish(resources: &ServerResources, args: &Value) -> Value {
    let tool_id = match uuid_arg(args, "tool_id") {
        Ok(id) => id,
        Err(err) => return err,
    };
    let notes = args
        .get("notes")
        .and_then(Value::as_str)
        .map(str::to_string);

    let approval = ApprovalService::new(resources.database.clone());
    let settings = SettingService::new(resources.database.clone());

    match approval
        .request_publish(&settings, tool_id, notes, None)
        .await
    {
        Ok(tool) => {
            let message = if tool.approval_status == ApprovalStatus::Approved {
                // Auto-approved: push the tool live without a manual restart.
                registration::refresh_if_running(resources, tool.server_id).await;
                format!(
                    "Tool '{}' has been auto-approved and registered with the sandbox. \
                     Important: most MCP clients do not currently support automatic tool list \
                     refresh. The user will need to restart or refresh their client to see the \
                     new tool.",
                    tool.name
                )
            } else {
                format!(
                    "Tool '{}' has been submitted for admin review. Once approved, the user \
                     will need to restart or refresh their MCP client to see the new tool, as \
                     clients do not currently support automatic tool list refresh.",
                    tool.name
                )
            };

            json!({
                "success": true,
                "tool_id": tool.id.to_string(),
                "name": tool.name,
                "status": tool.approval_status.as_str(),
                "message": message,
            })
        }
        Err(err) => json!({ "error": err.message }),
    }
}

pub(super) async fn request_module(resources: &ServerResources, args: &Value) -> Value {
    let tool_id = match uuid_arg(args, "tool_id") {
        Ok(id) => id,
        Err(err) => return err,
    };
    let module_name = match required_str(args, "module_name") {
        Ok(value) => value,
        Err(err) => return err,
    };
    let justification = match required_str(args, "justification") {
        Ok(value) => value,
        Err(err) => return err,
    };

    let approval = ApprovalService::new(resources.database.clone());
    match approval
        .create_module_request(tool_id, module_name, justification, None)
        .await
    {
        Ok(request) => json!({
            "success": true,
            "request_id": request.id.to_string(),
            "module_name": request.module_name,
            "status": request.status.as_str(),
            "message": format!(
                "Request to whitelist module '{module_name}' has been submitted. \
                 An admin will review and approve or reject it."
            ),
        }),
        Err(err) => json!({ "error": err.message }),
    }
}

pub(super) async fn request_network_access(resources: &ServerResources, args: &Value) -> Value {
    let tool_id = match uuid_arg(args, "tool_id") {
        Ok(id) => id,
        Err(err) => return err,
    };
    let host = match required_str(args, "host") {
        Ok(value) => value,
        Err(err) => return err,
    };
    let justification = match required_str(args, "justification") {
        Ok(value) => value,
        Err(err) => return err,
    };
    let port = args.get("port").and_then(Value::as_i64);

    let approval = ApprovalService::new(resources.database.clone());
    match approval
        .create_network_request(tool_id, host, port, justification, None)
        .await
    {
        Ok(request) => {
            let port_str = request.port.map(|p| format!(":{p}")).unwrap_or_default();
            json!({
                "success": true,
                "request_id": request.id.to_string(),
                "host": request.host,
                "port": request.port,
                "status": request.status.as_str(),
                "message": format!(
                    "Request to access '{host}{port_str}' has been submitted. \
                     An admin will review and approve or reject it."
                ),
            })
        }
        Err(err) => json!({ "error": err.message }),
    }
}

pub(super) async fn get_tool_status(resources: &ServerResources, args: &Value) -> Value {
    let tool_id = match uuid_arg(args, "tool_id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    let tool = match resources.database.get_tool(tool_id).await {
        Ok(Some(tool)) => tool,
        Ok(None) => return json!({ "error": format!("Tool {tool_id} not found") }),
        Err(err) => {
            tracing::error!(error = %err, "failed to load tool");
            return json!({ "error": "Failed to load tool status" });
        }
    };

    let module_requests = resources
        .database
        .module_requests_for_tool(tool_id)
        .await
        .unwrap_or_default();
    let network_requests = resources
        .database
        .network_requests_for_tool(tool_id)
        .await
        .unwrap_or_default();

    json!({
        "tool_id": tool.id.to_string(),
        "name": tool.name,
        "approval_status": tool.approval_status.as_str(),
        "created_by": tool.created_by,
        "approval_requested_at": tool.approval_requested_at.map(|t| t.to_rfc3339()),
        "approved_at": tool.approved_at.map(|t| t.to_rfc3339()),
        "approved_by": tool.approved_by,
        "rejection_reason": tool.rejection_reason,
        "publish_notes": tool.publish_notes,
        "module_requests": module_requests.iter().map(|req| json!({
            "id": req.id.to_string(),
            "module_name": req.module_name,
            "status": req.status.as_str(),
            "rejection_reason": req.rejection_reason,
            "created_at": req.created_at.to_rfc3339(),
        })).collect::<Vec<_>>(),
        "network_access_requests": network_requests.iter().map(|req| json!({
            "id": req.id.to_string(),
            "host": req.host,
            "port": req.port,
            "status": req.status.as_str(),
            "rejection_reason": req.rejection_reason,
            "created_at": req.created_at.to_rfc3339(),
        })).collect::<Vec<_>>(),
    })
}

pub(super) async fn list_pending_requests(resources: &ServerResources, _args: &Value) -> Value {
    let (pending_tools, tools_total) = match resources
        .database
        .list_tools_by_approval(ApprovalStatus::PendingReview, 50, 0)
        .await
    {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(error = %err, "failed to list pending tools");
            return json!({ "error": "Failed to list pending requests due to an internal error" });
        }
    };

    let (pending_modules, modules_total) = match resources
        .database
        .list_module_requests(None, None, 50, 0)
        .await
    {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(error = %err, "failed to list pending module requests");
            return json!({ "error": "Failed to list pending requests due to an internal error" });
        }
    };

    let (pending_network, network_total) = match resources
        .database
        .list_network_requests(None, None, 50, 0)
        .await
    {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(error = %err, "failed to list pending network requests");
            return json!({ "error": "Failed to list pending requests due to an internal error" });
        }
    };

    json!({
        "pending_tools": pending_tools.iter().map(|(tool, server_name)| json!({
            "id": tool.id.to_string(),
            "name": tool.name,
            "server_name": server_name,
            "requested_at": tool.approval_requested_at.map(|t| t.to_rfc3339()),
        })).collect::<Vec<_>>(),
        "pending_module_requests": pending_modules.iter().map(|item| json!({
            "id": item.request.id.to_string(),
            "module_name": item.request.module_name,
            "tool_name": item.tool_name,
            "server_name": item.server_name,
        })).collect::<Vec<_>>(),
        "pending_network_requests": pending_network.iter().map(|item| json!({
            "id": item.request.id.to_string(),
            "host": item.request.host,
            "port": item.request.port,
            "tool_name": item.tool_name,
            "server_name": item.server_name,
        })).collect::<Vec<_>>(),
        "summary": {
            "tools": tools_total,
            "modules": modules_total,
            "network": network_total,
            "total": tools_total + modules_total + network_total,
        },
    })
}

// ABOUTME: Management handlers for external MCP sources: add, list, discover, import
// ABOUTME: Discovery opens a live session and caches results; import consumes the cache only

use super::{required_str, uuid_arg};
use crate::context::ServerResources;
use crate::database::external_sources::ExternalSourceCreate;
use crate::models::{AuthType, TransportType};
use crate::services::{ExternalSourceService, SecretService, ToolService};
use serde_json::{json, Value};

pub(super) async fn add_external_source(resources: &ServerResources, args: &Value) -> Value {
    let server_id = match uuid_arg(args, "server_id") {
        Ok(id) => id,
        Err(err) => return err,
    };
    let name = match required_str(args, "name") {
        Ok(name) => name,
        Err(err) => return err,
    };
    let url = match required_str(args, "url") {
        Ok(url) => url,
        Err(err) => return err,
    };

    let server = match resources.database.get_server(server_id).await {
        Ok(Some(server)) => server,
        Ok(None) => return json!({ "error": format!("Server {server_id} not found") }),
        Err(err) => {
            tracing::error!(error = %err, "failed to load server");
            return json!({ "error": "Failed to add external source due to an internal error" });
        }
    };

    let auth_type = args
        .get("auth_type")
        .and_then(Value::as_str)
        .unwrap_or("none");
    let Ok(auth_type) = auth_type.parse::<AuthType>() else {
        return json!({ "error": format!("Invalid auth_type '{auth_type}'") });
    };

    let transport_type = args
        .get("transport_type")
        .and_then(Value::as_str)
        .unwrap_or("streamable_http");
    let Ok(transport_type) = transport_type.parse::<TransportType>() else {
        return json!({ "error": format!("Invalid transport_type '{transport_type}'") });
    };

    let service = ExternalSourceService::new(resources.database.clone());
    let data = ExternalSourceCreate {
        name: name.to_string(),
        url: url.to_string(),
        auth_type,
        auth_secret_name: args
            .get("auth_secret_name")
            .and_then(Value::as_str)
            .map(str::to_string),
        auth_header_name: args
            .get("auth_header_name")
            .and_then(Value::as_str)
            .map(str::to_string),
        transport_type,
        oauth_issuer: None,
        oauth_client_id: None,
    };

    match service.create(server_id, data).await {
        Ok(source) => json!({
            "success": true,
            "source_id": source.id.to_string(),
            "name": source.name,
            "url": source.url,
            "auth_type": source.auth_type.as_str(),
            "transport_type": source.transport_type.as_str(),
            "message": format!(
                "External source '{name}' added to server '{}'. \
                 Use mcpbox_discover_external_tools to see available tools, \
                 then mcpbox_import_external_tools to import them.",
                server.name
            ),
        }),
        Err(err) => {
            tracing::error!(error = %err, "failed to add external source");
            json!({ "error": format!("Failed to add external source: {err}") })
        }
    }
}

pub(super) async fn list_external_sources(resources: &ServerResources, args: &Value) -> Value {
    let server_id = match uuid_arg(args, "server_id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    let server = match resources.database.get_server(server_id).await {
        Ok(Some(server)) => server,
        Ok(None) => return json!({ "error": format!("Server {server_id} not found") }),
        Err(err) => {
            tracing::error!(error = %err, "failed to load server");
            return json!({ "error": "Failed to list external sources due to an internal error" });
        }
    };

    let service = ExternalSourceService::new(resources.database.clone());
    match service.list(server_id).await {
        Ok(sources) => json!({
            "server_id": server_id.to_string(),
            "server_name": server.name,
            "sources": sources.iter().map(|s| json!({
                "id": s.id.to_string(),
                "name": s.name,
                "url": s.url,
                "auth_type": s.auth_type.as_str(),
                "transport_type": s.transport_type.as_str(),
                "status": s.status.as_str(),
                "tool_count": s.tool_count,
                "last_discovered_at": s.last_discovered_at.map(|t| t.to_rfc3339()),
            })).collect::<Vec<_>>(),
            "total": sources.len(),
        }),
        Err(err) => {
            tracing::error!(error = %err, "failed to list external sources");
            json!({ "error": "Failed to list external sources due to an internal error" })
        }
    }
}

pub(super) async fn discover_external_tools(resources: &ServerResources, args: &Value) -> Value {
    let source_id = match uuid_arg(args, "source_id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    let service = ExternalSourceService::new(resources.database.clone());
    let source = match service.get(source_id).await {
        Ok(Some(source)) => source,
        Ok(None) => return json!({ "error": format!("External source {source_id} not found") }),
        Err(err) => {
            tracing::error!(error = %err, "failed to load external source");
            return json!({ "error": "Discovery failed due to an internal error" });
        }
    };

    let secrets = SecretService::new(resources.database.clone(), resources.cipher.clone());
    match service
        .discover_tools(&secrets, &resources.cipher, source_id)
        .await
    {
        Ok(discovered) => json!({
            "success": true,
            "source_id": source.id.to_string(),
            "source_name": source.name,
            "tools": discovered.iter().map(|t| json!({
                "name": t.name,
                "description": t.description,
                "input_schema": t.input_schema,
            })).collect::<Vec<_>>(),
            "total": discovered.len(),
            "message": format!(
                "Found {} tools on '{}'. \
                 Use mcpbox_import_external_tools with the tool names you want to import.",
                discovered.len(),
                source.name
            ),
        }),
        Err(err) => json!({ "error": format!("Discovery failed: {err}") }),
    }
}

pub(super) async fn import_external_tools(resources: &ServerResources, args: &Value) -> Value {
    let source_id = match uuid_arg(args, "source_id") {
        Ok(id) => id,
        Err(err) => return err,
    };

    let tool_names: Vec<String> = args
        .get("tool_names")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if tool_names.is_empty() {
        return json!({ "error": "tool_names is required (list of tool names to import)" });
    }

    let service = ExternalSourceService::new(resources.database.clone());
    let cached = match service.cached_tools(source_id).await {
        Ok(Some(cached)) => cached,
        Ok(None) => {
            return json!({
                "error": "No cached tools available. \
                          Use mcpbox_discover_external_tools first to discover tools."
            })
        }
        Err(err) => return json!({ "error": format!("Import failed: {err}") }),
    };

    let tool_service = ToolService::new(resources.database.clone());
    match service
        .import_tools(&tool_service, source_id, &tool_names, &cached)
        .await
    {
        Ok(outcome) => {
            let mut message = format!(
                "Imported {} tool(s) as drafts. \
                 Use mcpbox_request_publish for each tool to submit for admin approval.",
                outcome.created.len()
            );
            if !outcome.skipped.is_empty() {
                message = format!(
                    "Imported {} tool(s) as drafts, skipped {}. \
                     Use mcpbox_request_publish for each tool to submit for admin approval.",
                    outcome.created.len(),
                    outcome.skipped.len()
                );
            }

            let mut response = json!({
                "success": true,
                "imported_tools": outcome.created.iter().map(|t| json!({
                    "id": t.id.to_string(),
                    "name": t.name,
                    "description": t.description,
                    "tool_type": t.tool_type.as_str(),
                    "approval_status": t.approval_status.as_str(),
                })).collect::<Vec<_>>(),
                "count": outcome.created.len(),
                "message": message,
            });
            if !outcome.skipped.is_empty() {
                response["skipped_tools"] = json!(outcome.skipped);
                response["skipped_count"] = json!(outcome.skipped.len());
            }
            response
        }
        Err(err) => json!({ "error": format!("Import failed: {err}") }),
    }
}

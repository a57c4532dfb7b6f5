// ABOUTME: The LLM-facing admin surface: dispatches mcpbox_* tool calls to local handlers
// ABOUTME: Handler results use the {error: ...} convention; the gateway wraps them in content blocks

pub mod approvals;
pub mod catalog;
pub mod external;
pub mod registration;
pub mod secrets;
pub mod servers;
pub mod tools;

pub use catalog::management_tools;

use crate::context::ServerResources;
use regex::Regex;
use serde_json::{json, Value};
use std::sync::OnceLock;
use uuid::Uuid;

/// Server and tool names: lowercase, digits, underscores, letter first.
pub(crate) fn valid_name(name: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z][a-z0-9_]*$").unwrap_or_else(|_| unreachable!()))
        .is_match(name)
}

/// Parse a required UUID argument; the error value names the field.
pub(crate) fn uuid_arg(args: &Value, key: &str) -> Result<Uuid, Value> {
    args.get(key)
        .and_then(Value::as_str)
        .and_then(|raw| Uuid::parse_str(raw).ok())
        .ok_or_else(|| json!({ "error": format!("Invalid {key}") }))
}

/// Fetch a required non-empty string argument.
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, Value> {
    match args.get(key).and_then(Value::as_str) {
        Some(value) if !value.is_empty() => Ok(value),
        _ => Err(json!({ "error": format!("{key} is required") })),
    }
}

/// Executes management tools against the shared context.
pub struct ManagementService<'a> {
    resources: &'a ServerResources,
}

impl<'a> ManagementService<'a> {
    #[must_use]
    pub const fn new(resources: &'a ServerResources) -> Self {
        Self { resources }
    }

    /// Dispatch one management tool call. Unknown names are reported in the
    /// standard error shape.
    pub async fn execute_tool(&self, tool_name: &str, arguments: &Value) -> Value {
        let r = self.resources;
        match tool_name {
            "mcpbox_list_servers" => servers::list_servers(r, arguments).await,
            "mcpbox_get_server" => servers::get_server(r, arguments).await,
            "mcpbox_create_server" => servers::create_server(r, arguments).await,
            "mcpbox_delete_server" => servers::delete_server(r, arguments).await,
            "mcpbox_start_server" => servers::start_server(r, arguments).await,
            "mcpbox_stop_server" => servers::stop_server(r, arguments).await,
            "mcpbox_list_tools" => tools::list_tools(r, arguments).await,
            "mcpbox_get_tool" => tools::get_tool(r, arguments).await,
            "mcpbox_create_tool" => tools::create_tool(r, arguments).await,
            "mcpbox_update_tool" => tools::update_tool(r, arguments).await,
            "mcpbox_delete_tool" => tools::delete_tool(r, arguments).await,
            "mcpbox_validate_code" => tools::validate_code(r, arguments).await,
            "mcpbox_test_code" => tools::test_code(r, arguments).await,
            "mcpbox_get_server_modules" => tools::get_server_modules(r, arguments).await,
            "mcpbox_list_tool_versions" => tools::list_tool_versions(r, arguments).await,
            "mcpbox_rollback_tool" => tools::rollback_tool(r, arguments).await,
            "mcpbox_get_tool_logs" => tools::get_tool_logs(r, arguments).await,
            "mcpbox_request_publish" => approvals::request_publish(r, arguments).await,
            "mcpbox_request_module" => approvals::request_module(r, arguments).await,
            "mcpbox_request_network_access" => {
                approvals::request_network_access(r, arguments).await
            }
            "mcpbox_get_tool_status" => approvals::get_tool_status(r, arguments).await,
            "mcpbox_list_pending_requests" => {
                approvals::list_pending_requests(r, arguments).await
            }
            "mcpbox_create_server_secret" => secrets::create_server_secret(r, arguments).await,
            "mcpbox_list_server_secrets" => secrets::list_server_secrets(r, arguments).await,
            "mcpbox_add_external_source" => external::add_external_source(r, arguments).await,
            "mcpbox_list_external_sources" => {
                external::list_external_sources(r, arguments).await
            }
            "mcpbox_discover_external_tools" => {
                external::discover_external_tools(r, arguments).await
            }
            "mcpbox_import_external_tools" => {
                external::import_external_tools(r, arguments).await
            }
            other => json!({ "error": format!("Unknown tool: {other}") }),
        }
    }
}

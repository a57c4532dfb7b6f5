// ABOUTME: Static catalog of the mcpbox_* management tool definitions
// ABOUTME: Always present in tools/list; descriptions are written for the LLM operating them

use serde_json::{json, Value};

/// All management tool definitions in MCP format.
#[must_use]
pub fn management_tools() -> Vec<Value> {
    vec![
        json!({
            "name": "mcpbox_list_servers",
            "description": "List all MCP servers in MCPbox. Returns server names, IDs, status, and tool counts.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "page": { "type": "integer", "description": "Page number (default: 1)", "default": 1 },
                    "page_size": { "type": "integer", "description": "Items per page (default: 50, max: 100)", "default": 50 },
                },
                "required": [],
            },
        }),
        json!({
            "name": "mcpbox_get_server",
            "description": "Get details of a specific MCP server including its configuration and status.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "server_id": { "type": "string", "description": "UUID of the server to retrieve" },
                },
                "required": ["server_id"],
            },
        }),
        json!({
            "name": "mcpbox_create_server",
            "description": "Create a new MCP server. The server acts as a container for related tools.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "name": { "type": "string", "description": "Server name (e.g., 'weather_api', 'github_tools')" },
                    "description": { "type": "string", "description": "Description of what this server does" },
                },
                "required": ["name"],
            },
        }),
        json!({
            "name": "mcpbox_delete_server",
            "description": "Delete an MCP server and all its tools. This action is irreversible.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "server_id": { "type": "string", "description": "UUID of the server to delete" },
                },
                "required": ["server_id"],
            },
        }),
        json!({
            "name": "mcpbox_list_tools",
            "description": "List all tools in an MCP server.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "server_id": { "type": "string", "description": "UUID of the server" },
                },
                "required": ["server_id"],
            },
        }),
        json!({
            "name": "mcpbox_get_tool",
            "description": "Get details of a specific tool including its Python code.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tool_id": { "type": "string", "description": "UUID of the tool to retrieve" },
                },
                "required": ["tool_id"],
            },
        }),
        json!({
            "name": "mcpbox_create_tool",
            "description": "Create a new MCP tool in a server. Tools are created in 'draft' status and must be submitted for admin approval using mcpbox_request_publish before they become available. Write Python code with an async main() function. Note: after approval, MCP clients do not automatically refresh their tool list - the user must restart or refresh their client to see new tools.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "server_id": { "type": "string", "description": "UUID of the server to add the tool to" },
                    "name": { "type": "string", "description": "Tool name (lowercase with underscores, e.g., 'get_weather')" },
                    "description": { "type": "string", "description": "Description of what the tool does (shown to LLMs)" },
                    "python_code": { "type": "string", "description": "Python code with async def main() function. Use 'httpx' for requests." },
                },
                "required": ["server_id", "name", "python_code"],
            },
        }),
        json!({
            "name": "mcpbox_update_tool",
            "description": "Update an existing tool's configuration or code. Changing the code resets the tool's approval to pending review.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tool_id": { "type": "string", "description": "UUID of the tool to update" },
                    "name": { "type": "string", "description": "New tool name (optional)" },
                    "description": { "type": "string", "description": "New description (optional)" },
                    "python_code": { "type": "string", "description": "New Python code (optional)" },
                    "enabled": { "type": "boolean", "description": "Enable or disable the tool (optional). Disabled tools are excluded when the server starts." },
                },
                "required": ["tool_id"],
            },
        }),
        json!({
            "name": "mcpbox_delete_tool",
            "description": "Delete a tool from a server. This action is irreversible.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tool_id": { "type": "string", "description": "UUID of the tool to delete" },
                },
                "required": ["tool_id"],
            },
        }),
        json!({
            "name": "mcpbox_validate_code",
            "description": "Validate Python code structure and check for the required async main() function.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "code": { "type": "string", "description": "Python code to validate" },
                },
                "required": ["code"],
            },
        }),
        json!({
            "name": "mcpbox_get_server_modules",
            "description": "Get the list of allowed Python modules. Use this to see what modules you can import in your tool code. Module configuration is global (applies to all servers).",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "required": [],
            },
        }),
        json!({
            "name": "mcpbox_test_code",
            "description": "Test a saved tool by running its current code against the sandbox. Requires a tool_id - use mcpbox_create_tool or mcpbox_update_tool first, then test here. The test run is saved to the tool's execution history labelled as a test. Testing is blocked if the admin requires approval and the tool has not yet been approved.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tool_id": { "type": "string", "description": "UUID of the tool to test" },
                    "arguments": { "type": "object", "description": "Arguments to pass to the tool's main() function (optional)" },
                },
                "required": ["tool_id"],
            },
        }),
        json!({
            "name": "mcpbox_start_server",
            "description": "Start an MCP server, making its tools available. Only tools with approval_status='approved' and enabled=true are registered. Tools that are disabled or not yet approved are excluded.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "server_id": { "type": "string", "description": "UUID of the server to start" },
                },
                "required": ["server_id"],
            },
        }),
        json!({
            "name": "mcpbox_stop_server",
            "description": "Stop an MCP server, making its tools unavailable. All tools are unregistered from the sandbox. Individual tool states (enabled, approval_status) are preserved.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "server_id": { "type": "string", "description": "UUID of the server to stop" },
                },
                "required": ["server_id"],
            },
        }),
        json!({
            "name": "mcpbox_request_publish",
            "description": "Request admin approval to publish a draft or rejected tool. Tools must be approved before they become available for use.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tool_id": { "type": "string", "description": "UUID of the tool to request publish for" },
                    "notes": { "type": "string", "description": "Notes for the admin reviewer explaining what this tool does and why it should be approved" },
                },
                "required": ["tool_id"],
            },
        }),
        json!({
            "name": "mcpbox_request_module",
            "description": "Request a Python module to be whitelisted for use in your tool's code. Admin must approve before the module becomes available.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tool_id": { "type": "string", "description": "UUID of the tool that needs this module" },
                    "module_name": { "type": "string", "description": "Name of the Python module to whitelist (e.g., 'xml.etree.ElementTree', 'yaml')" },
                    "justification": { "type": "string", "description": "Explanation of why this module is needed for your tool" },
                },
                "required": ["tool_id", "module_name", "justification"],
            },
        }),
        json!({
            "name": "mcpbox_request_network_access",
            "description": "Request network access to an external host for your tool. Admin must approve before the tool can access the specified host.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tool_id": { "type": "string", "description": "UUID of the tool that needs network access" },
                    "host": { "type": "string", "description": "Hostname or IP address to whitelist (e.g., 'api.github.com', 'example.com')" },
                    "port": { "type": "integer", "description": "Optional port number. If not specified, any port is allowed." },
                    "justification": { "type": "string", "description": "Explanation of why your tool needs to access this host" },
                },
                "required": ["tool_id", "host", "justification"],
            },
        }),
        json!({
            "name": "mcpbox_get_tool_status",
            "description": "Get the approval status of a tool, including any rejection reasons or pending requests.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tool_id": { "type": "string", "description": "UUID of the tool to check status for" },
                },
                "required": ["tool_id"],
            },
        }),
        json!({
            "name": "mcpbox_list_tool_versions",
            "description": "List version history of a tool. Shows all previous versions with change summaries and timestamps.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tool_id": { "type": "string", "description": "UUID of the tool to list versions for" },
                },
                "required": ["tool_id"],
            },
        }),
        json!({
            "name": "mcpbox_rollback_tool",
            "description": "Rollback a tool to a previous version. Creates a new version with the old code (non-destructive). The rolled-back tool goes back to pending review.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tool_id": { "type": "string", "description": "UUID of the tool to rollback" },
                    "version": { "type": "integer", "description": "Version number to rollback to" },
                },
                "required": ["tool_id", "version"],
            },
        }),
        json!({
            "name": "mcpbox_create_server_secret",
            "description": "Create an empty secret placeholder for a server. The secret value must be set by an admin in the MCPbox UI - secrets never pass through the LLM. Tool code accesses secrets via secrets[\"KEY_NAME\"].",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "server_id": { "type": "string", "description": "UUID of the server to add the secret to" },
                    "key": { "type": "string", "description": "Secret key name (UPPER_SNAKE_CASE, e.g., 'THEIRSTACK_API_KEY')" },
                    "description": { "type": "string", "description": "Human-readable description of what this secret is for" },
                },
                "required": ["server_id", "key"],
            },
        }),
        json!({
            "name": "mcpbox_list_server_secrets",
            "description": "List all secret key names configured for a server. Returns key names and whether each has a value set. Never returns actual secret values.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "server_id": { "type": "string", "description": "UUID of the server to list secrets for" },
                },
                "required": ["server_id"],
            },
        }),
        json!({
            "name": "mcpbox_list_pending_requests",
            "description": "List all pending approval requests across the system. Returns pending tool publishes, module whitelist requests, and network access requests grouped by server.",
            "inputSchema": {
                "type": "object",
                "properties": {},
                "required": [],
            },
        }),
        json!({
            "name": "mcpbox_get_tool_logs",
            "description": "Get recent execution logs for a tool. Shows input arguments (secrets redacted), result, errors, stdout, duration, and success status for each invocation.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "tool_id": { "type": "string", "description": "UUID of the tool to get logs for" },
                    "limit": { "type": "integer", "description": "Maximum number of logs to return (default: 10, max: 50)", "default": 10 },
                },
                "required": ["tool_id"],
            },
        }),
        json!({
            "name": "mcpbox_add_external_source",
            "description": "Add an external MCP server as a source for a MCPbox server. This allows importing tools from the external server. Auth credentials should be stored as server secrets first (use mcpbox_create_server_secret), then referenced by key name here.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "server_id": { "type": "string", "description": "UUID of the MCPbox server to add the source to" },
                    "name": { "type": "string", "description": "Human-readable name for this source (e.g., 'GitHub MCP', 'Slack MCP')" },
                    "url": { "type": "string", "description": "URL of the external MCP server endpoint (e.g., 'https://mcp.example.com/mcp')" },
                    "auth_type": {
                        "type": "string",
                        "enum": ["none", "bearer", "header"],
                        "description": "Authentication type: 'none', 'bearer' (Authorization: Bearer <secret>), or 'header' (custom header). Default: 'none'",
                        "default": "none",
                    },
                    "auth_secret_name": { "type": "string", "description": "Name of a server secret containing the auth credential (create it first with mcpbox_create_server_secret)" },
                    "auth_header_name": { "type": "string", "description": "Custom header name when auth_type='header' (e.g., 'X-API-Key'). Default: 'Authorization'" },
                    "transport_type": {
                        "type": "string",
                        "enum": ["streamable_http", "sse"],
                        "description": "MCP transport type. Default: 'streamable_http'",
                        "default": "streamable_http",
                    },
                },
                "required": ["server_id", "name", "url"],
            },
        }),
        json!({
            "name": "mcpbox_list_external_sources",
            "description": "List all external MCP sources configured for a server. Shows name, URL, auth type, status, and discovered tool count.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "server_id": { "type": "string", "description": "UUID of the server to list sources for" },
                },
                "required": ["server_id"],
            },
        }),
        json!({
            "name": "mcpbox_discover_external_tools",
            "description": "Connect to an external MCP server and discover its available tools. Returns tool names, descriptions, and input schemas. Does NOT import the tools - use mcpbox_import_external_tools after discovery.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "source_id": { "type": "string", "description": "UUID of the external source to discover tools from" },
                },
                "required": ["source_id"],
            },
        }),
        json!({
            "name": "mcpbox_import_external_tools",
            "description": "Import selected tools from an external MCP source into the MCPbox server. Imported tools are created in 'draft' status - use mcpbox_request_publish to submit them for admin approval. The admin must approve before the tools become available.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "source_id": { "type": "string", "description": "UUID of the external source to import from" },
                    "tool_names": {
                        "type": "array",
                        "items": { "type": "string" },
                        "description": "List of tool names to import (as returned by mcpbox_discover_external_tools)",
                    },
                },
                "required": ["source_id", "tool_names"],
            },
        }),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_definition_is_well_formed() {
        let tools = management_tools();
        assert!(tools.len() >= 25);
        for tool in &tools {
            let name = tool["name"].as_str().unwrap();
            assert!(name.starts_with("mcpbox_"), "{name}");
            assert!(tool["description"].as_str().is_some_and(|d| !d.is_empty()));
            assert_eq!(tool["inputSchema"]["type"], "object");
        }
    }
}

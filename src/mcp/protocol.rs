// ABOUTME: Fixed MCP handshake reply and content-envelope helpers
// ABOUTME: tools/call results always travel as text content blocks, errors flagged with isError

use crate::constants::{MCP_PROTOCOL_VERSION, MCP_SERVER_NAME, MCP_SERVER_VERSION};
use serde_json::{json, Value};

/// The `initialize` result: protocol version, capabilities, identity.
#[must_use]
pub fn initialize_result() -> Value {
    json!({
        "protocolVersion": MCP_PROTOCOL_VERSION,
        "capabilities": {
            "tools": {},
        },
        "serverInfo": {
            "name": MCP_SERVER_NAME,
            "version": MCP_SERVER_VERSION,
        },
    })
}

/// Wrap a successful management-tool result as one pretty-printed text
/// content block.
#[must_use]
pub fn text_content(result: &Value) -> Value {
    let text = serde_json::to_string_pretty(result)
        .unwrap_or_else(|_| result.to_string());
    json!({
        "content": [
            { "type": "text", "text": text },
        ],
    })
}

/// Wrap an error message as an `isError` content block. The LLM is the end
/// user of this surface, so errors travel inside the result, not as
/// JSON-RPC errors.
#[must_use]
pub fn error_content(message: &str) -> Value {
    json!({
        "content": [
            { "type": "text", "text": format!("Error: {message}") },
        ],
        "isError": true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initialize_shape() {
        let result = initialize_result();
        assert_eq!(result["protocolVersion"], json!("2024-11-05"));
        assert_eq!(result["capabilities"]["tools"], json!({}));
        assert_eq!(result["serverInfo"]["name"], json!("mcpbox"));
    }

    #[test]
    fn error_content_is_flagged() {
        let wrapped = error_content("boom");
        assert_eq!(wrapped["isError"], json!(true));
        assert_eq!(wrapped["content"][0]["text"], json!("Error: boom"));
    }
}

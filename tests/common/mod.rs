// ABOUTME: Shared test fixtures: in-memory contexts, servers, and tools
// ABOUTME: The sandbox URL points at a closed port; tests avoid paths that would retry against it

// Each test binary compiles its own copy; not every helper is used everywhere.
#![allow(dead_code)]

use mcpbox::config::ServerConfig;
use mcpbox::context::ServerResources;
use mcpbox::database::servers::ServerCreate;
use mcpbox::database::Database;
use mcpbox::models::{ChangeSource, Server, Tool, ToolType};
use mcpbox::services::tool::ToolCreate;
use mcpbox::services::ToolService;
use std::sync::Arc;
use std::time::Duration;

pub const TEST_MASTER_KEY: [u8; 32] = [7u8; 32];

/// A ServerConfig suitable for tests: in-memory database, unreachable
/// sandbox, fixed key.
#[must_use]
pub fn test_config() -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1".into(),
        http_port: 0,
        database_url: "sqlite::memory:".into(),
        master_key: TEST_MASTER_KEY,
        sandbox_url: "http://127.0.0.1:9".into(),
        sandbox_api_key: None,
        internal_api_token: Some("internal-test-token".into()),
        http_timeout: Duration::from_millis(200),
        http_keepalive_connections: 2,
        oauth_callback_base: "http://localhost:8000".into(),
    }
}

/// Fresh application context over an in-memory database.
pub async fn test_resources() -> Arc<ServerResources> {
    let database = Database::in_memory().await.expect("in-memory db");
    ServerResources::new(test_config(), database)
}

pub async fn create_server(database: &Database, name: &str) -> Server {
    database
        .create_server(&ServerCreate {
            name: name.into(),
            description: Some("test server".into()),
        })
        .await
        .expect("create server")
}

pub const SAMPLE_CODE_V1: &str = "async def main():\n    return 'v1'\n";
pub const SAMPLE_CODE_V2: &str = "async def main():\n    return 'v2'\n";

pub async fn create_python_tool(database: &Database, server: &Server, name: &str) -> Tool {
    let service = ToolService::new(database.clone());
    service
        .create(
            server.id,
            ToolCreate {
                name: name.into(),
                description: Some("test tool".into()),
                python_code: Some(SAMPLE_CODE_V1.into()),
                tool_type: ToolType::PythonCode,
                external_source_id: None,
                external_tool_name: None,
                input_schema: None,
                timeout_ms: None,
                created_by: None,
                change_source: ChangeSource::Manual,
            },
        )
        .await
        .expect("create tool")
}

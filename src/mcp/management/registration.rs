// ABOUTME: Builds sandbox registration payloads and re-registers running servers after mutations
// ABOUTME: Only enabled + approved tools ever reach the sandbox

use crate::context::ServerResources;
use crate::models::{NetworkMode, Server, ServerStatus, Tool};
use crate::sandbox::{RegisterOutcome, RegisterServerRequest, SandboxToolDefinition};
use crate::services::{ExternalSourceService, GlobalConfigService, SecretService};
use anyhow::Result;
use uuid::Uuid;

/// Sandbox tool definitions for the publishable subset of a server's tools.
#[must_use]
pub fn build_tool_definitions(tools: &[Tool]) -> Vec<SandboxToolDefinition> {
    tools
        .iter()
        .filter(|tool| tool.is_publishable())
        .map(|tool| SandboxToolDefinition {
            name: tool.name.clone(),
            description: tool.description.clone(),
            tool_type: tool.tool_type.as_str().to_string(),
            python_code: tool.python_code.clone(),
            input_schema: tool.input_schema.clone(),
            timeout_ms: tool.timeout_ms,
            external_source_name: None,
            external_tool_name: tool.external_tool_name.clone(),
        })
        .collect()
}

/// Assemble the full registration payload for one server: publishable tool
/// definitions, decrypted secrets, the global module allowlist, resolved
/// external-source configs, and the network allowlist when active.
///
/// # Errors
///
/// Returns an error when a query fails or a secret cannot be decrypted.
pub async fn build_registration(
    resources: &ServerResources,
    server: &Server,
) -> Result<RegisterServerRequest> {
    let tools = resources.database.list_tools_by_server(server.id).await?;
    let tool_defs = build_tool_definitions(&tools);

    let secret_service = SecretService::new(resources.database.clone(), resources.cipher.clone());
    let secrets = secret_service.decrypted_for_injection(server.id).await?;

    let config_service = GlobalConfigService::new(resources.database.clone());
    let allowed_modules = config_service.get_allowed_modules().await?;

    let source_service = ExternalSourceService::new(resources.database.clone());
    let external_sources = source_service
        .sandbox_configs(&secret_service, &resources.cipher, server.id)
        .await?;

    let allowed_hosts = match server.network_mode {
        NetworkMode::Allowlist => Some(server.allowed_hosts.clone()),
        NetworkMode::Isolated => None,
    };

    Ok(RegisterServerRequest {
        server_id: server.id.to_string(),
        server_name: server.name.clone(),
        tools: tool_defs,
        allowed_modules,
        secrets,
        external_sources,
        allowed_hosts,
    })
}

/// Register (or re-register) a server with the sandbox.
///
/// # Errors
///
/// Returns an error when the payload cannot be assembled; a sandbox-side
/// failure is reported in the returned outcome instead.
pub async fn register_with_sandbox(
    resources: &ServerResources,
    server: &Server,
) -> Result<RegisterOutcome> {
    let request = build_registration(resources, server).await?;
    Ok(resources.sandbox.register_server(&request).await)
}

/// After a mutation that may change the observable tool set: if the owning
/// server is running, push a fresh registration to the sandbox and signal
/// connected MCP clients. Failures are logged, never propagated; the
/// mutation itself already succeeded.
pub async fn refresh_if_running(resources: &ServerResources, server_id: Uuid) {
    let server = match resources.database.get_server(server_id).await {
        Ok(Some(server)) => server,
        Ok(None) => return,
        Err(err) => {
            tracing::warn!(error = %err, %server_id, "failed to load server for re-registration");
            return;
        }
    };

    if server.status != ServerStatus::Running {
        return;
    }

    match register_with_sandbox(resources, &server).await {
        Ok(outcome) if outcome.success => {
            resources.tool_changes.notify();
        }
        Ok(outcome) => {
            tracing::warn!(
                server = %server.name,
                error = ?outcome.error,
                "re-registration after mutation failed"
            );
        }
        Err(err) => {
            tracing::warn!(server = %server.name, error = %err, "re-registration failed");
        }
    }
}

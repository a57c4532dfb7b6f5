// ABOUTME: External MCP source management: registration, live discovery, and cached import
// ABOUTME: Auth headers resolve from server secrets or OAuth token bundles at use time

use super::secret::SecretService;
use super::tool::{ToolCreate, ToolService};
use crate::database::external_sources::ExternalSourceCreate;
use crate::database::Database;
use crate::models::{ChangeSource, ExternalMcpSource, SourceStatus, Tool, ToolType};
use crate::oauth;
use crate::sandbox::SandboxExternalSource;
use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

/// A tool descriptor discovered on an upstream MCP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveredTool {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: Option<Value>,
}

/// Outcome of an import: created tools plus names that were skipped.
#[derive(Debug)]
pub struct ImportOutcome {
    pub created: Vec<Tool>,
    pub skipped: Vec<String>,
}

/// Service over external MCP sources.
#[derive(Clone)]
pub struct ExternalSourceService {
    database: Database,
}

impl ExternalSourceService {
    #[must_use]
    pub const fn new(database: Database) -> Self {
        Self { database }
    }

    /// Register a new source for a server.
    ///
    /// # Errors
    ///
    /// Returns an error if the insert fails.
    pub async fn create(
        &self,
        server_id: Uuid,
        data: ExternalSourceCreate,
    ) -> Result<ExternalMcpSource> {
        self.database.insert_external_source(server_id, &data).await
    }

    /// Fetch a source.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get(&self, source_id: Uuid) -> Result<Option<ExternalMcpSource>> {
        self.database.get_external_source(source_id).await
    }

    /// List a server's sources.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list(&self, server_id: Uuid) -> Result<Vec<ExternalMcpSource>> {
        self.database.list_external_sources(server_id).await
    }

    /// Resolve the auth header for a source. OAuth sources refresh inside
    /// the expiry buffer; a rotated bundle is persisted before returning.
    ///
    /// # Errors
    ///
    /// Returns an error when a referenced secret or token bundle is missing
    /// or undecryptable.
    pub async fn auth_header(
        &self,
        secrets: &SecretService,
        cipher: &crate::crypto::SecretCipher,
        source: &ExternalMcpSource,
    ) -> Result<Option<(String, String)>> {
        match source.auth_type {
            crate::models::AuthType::None => Ok(None),
            crate::models::AuthType::Bearer => {
                let value = self.resolve_secret(secrets, source).await?;
                Ok(Some(("Authorization".into(), format!("Bearer {value}"))))
            }
            crate::models::AuthType::Header => {
                let value = self.resolve_secret(secrets, source).await?;
                let header = source
                    .auth_header_name
                    .clone()
                    .unwrap_or_else(|| "Authorization".into());
                Ok(Some((header, value)))
            }
            crate::models::AuthType::Oauth => {
                let encrypted = source.oauth_tokens_encrypted.as_deref().ok_or_else(|| {
                    anyhow!(
                        "source '{}' uses OAuth but has not been authorized yet",
                        source.name
                    )
                })?;
                let (bearer, rotated) =
                    oauth::bearer_for_source(cipher, encrypted, source.id).await?;
                if let Some(rotated) = rotated {
                    self.database
                        .update_source_oauth_tokens(source.id, &rotated, None, None)
                        .await?;
                }
                Ok(Some(("Authorization".into(), bearer)))
            }
        }
    }

    async fn resolve_secret(
        &self,
        secrets: &SecretService,
        source: &ExternalMcpSource,
    ) -> Result<String> {
        let key_name = source.auth_secret_name.as_deref().ok_or_else(|| {
            anyhow!(
                "source '{}' requires auth but has no auth_secret_name configured",
                source.name
            )
        })?;
        secrets
            .resolve(source.server_id, key_name)
            .await?
            .ok_or_else(|| {
                anyhow!("secret '{key_name}' has no value; set it in the admin UI first")
            })
    }

    /// Open a live MCP session to the upstream (initialize, then
    /// tools/list), cache the descriptors on the source row, and return
    /// them. A failed discovery marks the source `error`.
    ///
    /// # Errors
    ///
    /// Returns an error when the upstream is unreachable or replies with a
    /// protocol error.
    pub async fn discover_tools(
        &self,
        secrets: &SecretService,
        cipher: &crate::crypto::SecretCipher,
        source_id: Uuid,
    ) -> Result<Vec<DiscoveredTool>> {
        let source = self
            .get(source_id)
            .await?
            .ok_or_else(|| anyhow!("External source {source_id} not found"))?;

        match self.discover_inner(secrets, cipher, &source).await {
            Ok(tools) => {
                let cache = serde_json::to_value(&tools)?;
                self.database
                    .update_source_discovery(
                        source.id,
                        SourceStatus::Active,
                        tools.len() as i64,
                        Some(&cache),
                    )
                    .await?;
                Ok(tools)
            }
            Err(err) => {
                self.database
                    .update_source_discovery(source.id, SourceStatus::Error, source.tool_count, None)
                    .await?;
                Err(err)
            }
        }
    }

    async fn discover_inner(
        &self,
        secrets: &SecretService,
        cipher: &crate::crypto::SecretCipher,
        source: &ExternalMcpSource,
    ) -> Result<Vec<DiscoveredTool>> {
        let auth = self.auth_header(secrets, cipher, source).await?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("cannot build HTTP client")?;

        let send = |body: Value| {
            let client = client.clone();
            let url = source.url.clone();
            let auth = auth.clone();
            async move {
                let mut request = client
                    .post(url.as_str())
                    .json(&body)
                    .header("Accept", "application/json");
                if let Some((name, value)) = &auth {
                    request = request.header(name.as_str(), value.as_str());
                }
                let response = request.send().await.context("upstream unreachable")?;
                if !response.status().is_success() {
                    bail!("upstream returned HTTP {}", response.status());
                }
                response
                    .json::<Value>()
                    .await
                    .context("upstream returned invalid JSON")
            }
        };

        let init = send(json!({
            "jsonrpc": "2.0",
            "id": "init",
            "method": "initialize",
            "params": {
                "protocolVersion": crate::constants::MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": {
                    "name": crate::constants::MCP_SERVER_NAME,
                    "version": crate::constants::MCP_SERVER_VERSION,
                },
            },
        }))
        .await?;
        if let Some(error) = init.get("error") {
            bail!("upstream initialize failed: {error}");
        }

        let listed = send(json!({
            "jsonrpc": "2.0",
            "id": "list",
            "method": "tools/list",
            "params": {},
        }))
        .await?;
        if let Some(error) = listed.get("error") {
            bail!("upstream tools/list failed: {error}");
        }

        let tools = listed
            .get("result")
            .and_then(|r| r.get("tools"))
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();

        Ok(tools
            .into_iter()
            .filter_map(|tool| {
                let name = tool.get("name")?.as_str()?.to_string();
                Some(DiscoveredTool {
                    name,
                    description: tool
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                    input_schema: tool.get("inputSchema").cloned(),
                })
            })
            .collect())
    }

    /// Cached descriptors from the last discovery, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn cached_tools(&self, source_id: Uuid) -> Result<Option<Vec<DiscoveredTool>>> {
        let source = self
            .get(source_id)
            .await?
            .ok_or_else(|| anyhow!("External source {source_id} not found"))?;
        Ok(source
            .discovered_tools_cache
            .map(serde_json::from_value)
            .transpose()?)
    }

    /// Create local passthrough tools (draft) from the cached descriptors.
    /// Unknown or already-imported names are skipped, not fatal.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub async fn import_tools(
        &self,
        tools: &ToolService,
        source_id: Uuid,
        tool_names: &[String],
        cached: &[DiscoveredTool],
    ) -> Result<ImportOutcome> {
        let source = self
            .get(source_id)
            .await?
            .ok_or_else(|| anyhow!("External source {source_id} not found"))?;

        let mut created = Vec::new();
        let mut skipped = Vec::new();

        for name in tool_names {
            let Some(descriptor) = cached.iter().find(|t| &t.name == name) else {
                skipped.push(name.clone());
                continue;
            };

            let create = ToolCreate {
                name: sanitize_tool_name(name),
                description: descriptor.description.clone(),
                python_code: None,
                tool_type: ToolType::McpPassthrough,
                external_source_id: Some(source.id),
                external_tool_name: Some(name.clone()),
                input_schema: descriptor.input_schema.clone(),
                timeout_ms: None,
                created_by: None,
                change_source: ChangeSource::Import,
            };

            match tools.create(source.server_id, create).await {
                Ok(tool) => created.push(tool),
                Err(err) => {
                    tracing::warn!(tool = name.as_str(), error = %err, "import skipped tool");
                    skipped.push(name.clone());
                }
            }
        }

        Ok(ImportOutcome { created, skipped })
    }

    /// Sandbox-facing configs for a server's active sources, auth resolved.
    /// Sources whose auth cannot be resolved are skipped with a warning so
    /// one broken source does not block a server start.
    ///
    /// # Errors
    ///
    /// Returns an error if the listing query fails.
    pub async fn sandbox_configs(
        &self,
        secrets: &SecretService,
        cipher: &crate::crypto::SecretCipher,
        server_id: Uuid,
    ) -> Result<Vec<SandboxExternalSource>> {
        let sources = self.list(server_id).await?;
        let mut configs = Vec::new();

        for source in sources {
            if source.status == SourceStatus::Disabled {
                continue;
            }
            match self.auth_header(secrets, cipher, &source).await {
                Ok(auth) => {
                    let (auth_header_name, auth_header_value) = match auth {
                        Some((name, value)) => (Some(name), Some(value)),
                        None => (None, None),
                    };
                    configs.push(SandboxExternalSource {
                        name: source.name,
                        url: source.url,
                        transport_type: source.transport_type.as_str().to_string(),
                        auth_header_name,
                        auth_header_value,
                    });
                }
                Err(err) => {
                    tracing::warn!(
                        source = %source.name,
                        error = %err,
                        "skipping external source with unresolvable auth"
                    );
                }
            }
        }

        Ok(configs)
    }
}

/// Upstream tool names may contain characters the local name rules forbid.
fn sanitize_tool_name(name: &str) -> String {
    let mut out: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_lowercase()
            } else {
                '_'
            }
        })
        .collect();
    if out.chars().next().is_none_or(|c| !c.is_ascii_lowercase()) {
        out.insert_str(0, "tool_");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitizes_upstream_tool_names() {
        assert_eq!(sanitize_tool_name("Get-Weather"), "get_weather");
        assert_eq!(sanitize_tool_name("9lives"), "tool_9lives");
        assert_eq!(sanitize_tool_name("ok_name"), "ok_name");
    }
}

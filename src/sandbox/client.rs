// ABOUTME: Resilient RPC client for the sandbox service (pool, retry, circuit breaker)
// ABOUTME: Every response is parsed defensively; callers get structured failures, never panics

use super::{
    ExecuteCodeRequest, ExecutionOutcome, RegisterOutcome, RegisterServerRequest, SandboxError,
};
use crate::jsonrpc::error_codes;
use crate::retry::{retry_async, CircuitBreaker, CircuitBreakerConfig, RetryConfig, RetryError};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::sync::Mutex;

/// Retry policy for ordinary sandbox calls.
fn sandbox_retry_config() -> RetryConfig {
    RetryConfig {
        max_retries: 3,
        base_delay: Duration::from_millis(500),
        max_delay: Duration::from_secs(10),
        exponential_base: 2.0,
        jitter: true,
    }
}

/// The sandbox is local, so the breaker recovers quickly.
fn sandbox_breaker_config() -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        failure_threshold: 5,
        success_threshold: 2,
        timeout: Duration::from_secs(30),
    }
}

/// HTTP client for the shared sandbox service.
///
/// The inner reqwest client is reused across calls with explicit pool
/// limits. If the shared client fails at the connection layer between
/// acquisition and use, one recreate-and-retry pass heals it before the
/// error escapes to the retry layer.
pub struct SandboxClient {
    base_url: String,
    api_key: Option<String>,
    http_timeout: Duration,
    keepalive_connections: usize,
    client: Mutex<Option<reqwest::Client>>,
    breaker: CircuitBreaker,
    retry_config: RetryConfig,
}

impl SandboxClient {
    #[must_use]
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        http_timeout: Duration,
        keepalive_connections: usize,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            http_timeout,
            keepalive_connections,
            client: Mutex::new(None),
            breaker: CircuitBreaker::new("sandbox", sandbox_breaker_config()),
            retry_config: sandbox_retry_config(),
        }
    }

    /// Breaker snapshot for observability.
    pub async fn circuit_state(&self) -> crate::retry::BreakerSnapshot {
        self.breaker.snapshot().await
    }

    /// Force the breaker closed (admin action after a sandbox restart).
    pub async fn reset_circuit(&self) {
        self.breaker.reset().await;
    }

    fn build_client(&self) -> Result<reqwest::Client, SandboxError> {
        reqwest::Client::builder()
            .timeout(self.http_timeout)
            .pool_max_idle_per_host(self.keepalive_connections)
            .pool_idle_timeout(self.http_timeout)
            .build()
            .map_err(|e| SandboxError::Transport(e.to_string()))
    }

    async fn acquire_client(&self) -> Result<reqwest::Client, SandboxError> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let client = self.build_client()?;
        *guard = Some(client.clone());
        Ok(client)
    }

    async fn drop_client(&self) {
        let mut guard = self.client.lock().await;
        *guard = None;
    }

    /// One HTTP round-trip with the shared client, healing a stale
    /// connection pool by recreating the client once.
    async fn send(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
        timeout_override: Option<Duration>,
    ) -> Result<(u16, String), SandboxError> {
        let url = format!("{}{path}", self.base_url);

        let mut last_err = SandboxError::Transport("sandbox client unavailable".into());
        for attempt in 0..2u8 {
            let client = self.acquire_client().await?;
            let mut request = client.request(method.clone(), &url);
            if let Some(key) = &self.api_key {
                request = request.header("X-API-Key", key);
            }
            if let Some(body) = body {
                request = request.json(body);
            }
            if let Some(timeout) = timeout_override {
                request = request.timeout(timeout);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let text = response
                        .text()
                        .await
                        .map_err(|e| SandboxError::Transport(e.to_string()))?;
                    return Ok((status, text));
                }
                Err(err) => {
                    if err.is_timeout() {
                        return Err(SandboxError::Timeout);
                    }
                    // Connection-layer failures may mean the pooled client
                    // went stale underneath us; rebuild it and try once more.
                    if err.is_connect() || err.is_request() {
                        last_err = SandboxError::Transport(err.to_string());
                        if attempt == 0 {
                            tracing::warn!(error = %last_err, "recreating sandbox HTTP client");
                            self.drop_client().await;
                            continue;
                        }
                    }
                    return Err(SandboxError::Transport(err.to_string()));
                }
            }
        }
        Err(last_err)
    }

    /// Status-classified JSON round trip.
    async fn send_json(
        &self,
        method: reqwest::Method,
        path: &str,
        body: Option<&Value>,
        timeout_override: Option<Duration>,
    ) -> Result<Value, SandboxError> {
        let (status, text) = self.send(method, path, body, timeout_override).await?;

        if status >= 500 {
            return Err(SandboxError::Server { status, body: text });
        }
        if status >= 400 {
            return Err(SandboxError::Rejected { status, body: text });
        }
        serde_json::from_str(&text).map_err(|_| SandboxError::InvalidJson)
    }

    /// Check sandbox liveness. Open circuits and failures read as unhealthy.
    pub async fn health_check(&self) -> bool {
        let quick_retry = RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_millis(500),
            jitter: true,
            ..RetryConfig::default()
        };
        let result = retry_async(
            || async {
                let (status, _) = self
                    .send(reqwest::Method::GET, "/health", None, None)
                    .await?;
                Ok::<bool, SandboxError>(status == 200)
            },
            &quick_retry,
            &self.breaker,
        )
        .await;

        match result {
            Ok(healthy) => healthy,
            Err(RetryError::CircuitOpen(e)) => {
                tracing::warn!(error = %e, "sandbox circuit breaker open");
                false
            }
            Err(RetryError::Exhausted(e)) => {
                tracing::warn!(error = %e, "sandbox health check failed");
                false
            }
        }
    }

    /// Register a server and its tools with the sandbox.
    pub async fn register_server(&self, request: &RegisterServerRequest) -> RegisterOutcome {
        let Ok(body) = serde_json::to_value(request) else {
            return RegisterOutcome::failure("failed to serialize registration payload");
        };

        let result = retry_async(
            || async {
                self.send_json(reqwest::Method::POST, "/servers/register", Some(&body), None)
                    .await
            },
            &self.retry_config,
            &self.breaker,
        )
        .await;

        match result {
            Ok(data) => {
                let tools_registered = data
                    .get("tools_registered")
                    .and_then(Value::as_i64)
                    .unwrap_or(0);
                tracing::info!(
                    server = %request.server_name,
                    tools = tools_registered,
                    "registered server with sandbox"
                );
                RegisterOutcome {
                    success: true,
                    tools_registered,
                    error: None,
                    circuit_breaker_open: false,
                }
            }
            Err(RetryError::CircuitOpen(e)) => {
                tracing::error!(error = %e, "cannot register server, circuit breaker open");
                RegisterOutcome {
                    success: false,
                    tools_registered: 0,
                    error: Some(format!("Sandbox temporarily unavailable: {e}")),
                    circuit_breaker_open: true,
                }
            }
            Err(RetryError::Exhausted(e)) => {
                tracing::error!(error = %e, "failed to register server with sandbox");
                RegisterOutcome::failure(e.to_string())
            }
        }
    }

    /// Unregister a server. An already-unregistered server counts as
    /// success.
    pub async fn unregister_server(&self, server_id: &str) -> RegisterOutcome {
        let path = format!("/servers/{server_id}/unregister");
        let result = retry_async(
            || async {
                match self
                    .send_json(reqwest::Method::POST, &path, None, None)
                    .await
                {
                    Ok(value) => Ok(value),
                    // Not registered: that's fine.
                    Err(SandboxError::Rejected { status: 404, .. }) => Ok(json!({})),
                    Err(other) => Err(other),
                }
            },
            &self.retry_config,
            &self.breaker,
        )
        .await;

        match result {
            Ok(_) => {
                tracing::info!(server_id, "unregistered server from sandbox");
                RegisterOutcome {
                    success: true,
                    tools_registered: 0,
                    error: None,
                    circuit_breaker_open: false,
                }
            }
            Err(RetryError::CircuitOpen(e)) => RegisterOutcome {
                success: false,
                tools_registered: 0,
                error: Some(format!("Sandbox temporarily unavailable: {e}")),
                circuit_breaker_open: true,
            },
            Err(RetryError::Exhausted(e)) => RegisterOutcome::failure(e.to_string()),
        }
    }

    /// List registered tools, optionally for one server. Failures collapse
    /// to an empty list.
    pub async fn list_tools(&self, server_id: Option<&str>) -> Vec<Value> {
        let path = server_id.map_or_else(
            || "/tools".to_string(),
            |id| format!("/tools?server_id={}", urlencoding::encode(id)),
        );

        let result = retry_async(
            || async { self.send_json(reqwest::Method::GET, &path, None, None).await },
            &self.retry_config,
            &self.breaker,
        )
        .await;

        match result {
            Ok(data) => data
                .get("tools")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to list sandbox tools");
                Vec::new()
            }
        }
    }

    /// Execute a registered tool by full name (`server__tool`).
    pub async fn call_tool(&self, tool_name: &str, arguments: &Value, debug_mode: bool) -> Value {
        let path = format!("/tools/{tool_name}/call");
        let body = json!({ "arguments": arguments, "debug_mode": debug_mode });

        let result = retry_async(
            || async {
                self.send_json(reqwest::Method::POST, &path, Some(&body), None)
                    .await
            },
            &self.retry_config,
            &self.breaker,
        )
        .await;

        match result {
            Ok(value) => value,
            Err(RetryError::CircuitOpen(e)) => {
                tracing::error!(error = %e, tool_name, "cannot call tool, circuit breaker open");
                json!({ "success": false, "error": format!("Sandbox temporarily unavailable: {e}") })
            }
            Err(RetryError::Exhausted(e)) => {
                tracing::error!(error = %e, tool_name, "tool call failed");
                json!({ "success": false, "error": e.to_string() })
            }
        }
    }

    /// Forward a JSON-RPC envelope to the sandbox `/mcp` endpoint. Always
    /// returns a JSON-RPC-shaped value; failures become `-32603` errors.
    pub async fn mcp_request(&self, request: &Value) -> Value {
        let id = request.get("id").cloned().unwrap_or(Value::Null);

        let result = retry_async(
            || async {
                self.send_json(reqwest::Method::POST, "/mcp", Some(request), None)
                    .await
            },
            &self.retry_config,
            &self.breaker,
        )
        .await;

        match result {
            Ok(value) => value,
            Err(RetryError::CircuitOpen(e)) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": error_codes::INTERNAL_ERROR,
                    "message": format!("Sandbox temporarily unavailable: {e}"),
                },
            }),
            // A sandbox 4xx is a validation failure of the forwarded call.
            Err(RetryError::Exhausted(SandboxError::Rejected { body, .. })) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": error_codes::INVALID_PARAMS,
                    "message": body,
                },
            }),
            Err(RetryError::Exhausted(e)) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": error_codes::INTERNAL_ERROR,
                    "message": format!("Sandbox communication error: {e}"),
                },
            }),
        }
    }

    /// Execute code directly, outside any registered tool. Used by tool
    /// testing.
    pub async fn execute_code(&self, request: &ExecuteCodeRequest) -> ExecutionOutcome {
        let Ok(body) = serde_json::to_value(request) else {
            return ExecutionOutcome::failure("failed to serialize execution payload");
        };

        let result = retry_async(
            || async {
                self.send_json(reqwest::Method::POST, "/execute", Some(&body), None)
                    .await
            },
            &self.retry_config,
            &self.breaker,
        )
        .await;

        match result {
            Ok(value) => serde_json::from_value(value)
                .unwrap_or_else(|_| ExecutionOutcome::failure("Invalid JSON response from sandbox")),
            Err(RetryError::CircuitOpen(e)) => {
                ExecutionOutcome::failure(format!("Sandbox temporarily unavailable: {e}"))
            }
            Err(RetryError::Exhausted(e)) => ExecutionOutcome::failure(e.to_string()),
        }
    }

    /// Install one package. Installation can be slow, so the call carries a
    /// generous per-request timeout and fewer retries.
    pub async fn install_package(&self, module_name: &str, version: Option<&str>) -> Value {
        let mut body = json!({ "module_name": module_name });
        if let Some(version) = version {
            body["version"] = json!(version);
        }

        let install_retry = RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_secs(1),
            ..RetryConfig::default()
        };

        let result = retry_async(
            || async {
                self.send_json(
                    reqwest::Method::POST,
                    "/packages/install",
                    Some(&body),
                    Some(Duration::from_secs(120)),
                )
                .await
            },
            &install_retry,
            &self.breaker,
        )
        .await;

        match result {
            Ok(value) => value,
            Err(RetryError::CircuitOpen(e)) => {
                json!({ "success": false, "error": format!("Sandbox unavailable: {e}") })
            }
            Err(RetryError::Exhausted(e)) => json!({ "success": false, "error": e.to_string() }),
        }
    }

    /// Reconcile the sandbox's installed packages with the allowed-modules
    /// list. A full sync can take minutes.
    pub async fn sync_packages(&self, modules: &[String]) -> Value {
        let body = json!({ "modules": modules });
        let sync_retry = RetryConfig {
            max_retries: 2,
            base_delay: Duration::from_secs(2),
            ..RetryConfig::default()
        };

        let result = retry_async(
            || async {
                self.send_json(
                    reqwest::Method::POST,
                    "/packages/sync",
                    Some(&body),
                    Some(Duration::from_secs(300)),
                )
                .await
            },
            &sync_retry,
            &self.breaker,
        )
        .await;

        match result {
            Ok(value) => value,
            Err(RetryError::CircuitOpen(e)) => {
                json!({ "success": false, "error": format!("Sandbox unavailable: {e}") })
            }
            Err(RetryError::Exhausted(e)) => json!({ "success": false, "error": e.to_string() }),
        }
    }

    /// Installation status of one module.
    pub async fn get_package_status(&self, module_name: &str) -> Value {
        let path = format!("/packages/status/{}", urlencoding::encode(module_name));
        let result = retry_async(
            || async { self.send_json(reqwest::Method::GET, &path, None, None).await },
            &self.retry_config,
            &self.breaker,
        )
        .await;

        match result {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, module_name, "failed to get package status");
                json!({ "error": e.to_string() })
            }
        }
    }

    /// All installed packages. Failures collapse to an empty list.
    pub async fn list_installed_packages(&self) -> Vec<Value> {
        let result = retry_async(
            || async {
                self.send_json(reqwest::Method::GET, "/packages", None, None)
                    .await
            },
            &self.retry_config,
            &self.breaker,
        )
        .await;

        match result {
            Ok(data) => data
                .get("packages")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default(),
            Err(e) => {
                tracing::warn!(error = %e, "failed to list installed packages");
                Vec::new()
            }
        }
    }

    /// Classify modules as stdlib or third-party.
    pub async fn classify_modules(&self, modules: &[String]) -> Value {
        let body = json!({ "modules": modules });
        let result = retry_async(
            || async {
                self.send_json(
                    reqwest::Method::POST,
                    "/packages/classify",
                    Some(&body),
                    None,
                )
                .await
            },
            &self.retry_config,
            &self.breaker,
        )
        .await;

        match result {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "failed to classify modules");
                json!({ "stdlib": [], "third_party": [] })
            }
        }
    }

    /// Package-index metadata for one module.
    pub async fn get_pypi_info(&self, module_name: &str) -> Value {
        let body = json!({ "module_name": module_name });
        let result = retry_async(
            || async {
                self.send_json(
                    reqwest::Method::POST,
                    "/packages/pypi-info",
                    Some(&body),
                    None,
                )
                .await
            },
            &self.retry_config,
            &self.breaker,
        )
        .await;

        match result {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, module_name, "failed to get package info");
                json!({ "error": e.to_string() })
            }
        }
    }

    /// Push updated secret values to a running server so an admin edit takes
    /// effect without a restart.
    pub async fn update_server_secrets(
        &self,
        server_id: &str,
        secrets: &std::collections::HashMap<String, String>,
    ) -> RegisterOutcome {
        let path = format!("/servers/{server_id}/secrets");
        let body = json!({ "secrets": secrets });

        let result = retry_async(
            || async {
                self.send_json(reqwest::Method::POST, &path, Some(&body), None)
                    .await
            },
            &self.retry_config,
            &self.breaker,
        )
        .await;

        match result {
            Ok(_) => RegisterOutcome {
                success: true,
                tools_registered: 0,
                error: None,
                circuit_breaker_open: false,
            },
            Err(RetryError::CircuitOpen(e)) => RegisterOutcome {
                success: false,
                tools_registered: 0,
                error: Some(format!("Sandbox temporarily unavailable: {e}")),
                circuit_breaker_open: true,
            },
            Err(RetryError::Exhausted(e)) => RegisterOutcome::failure(e.to_string()),
        }
    }
}

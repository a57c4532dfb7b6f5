// ABOUTME: The MCP gateway: JSON-RPC dispatch on POST /mcp, SSE stream on GET /mcp
// ABOUTME: Management tools run locally; everything else forwards to the sandbox after auth

use super::management::{self, ManagementService};
use super::protocol;
use crate::auth::{self, AuthenticatedCaller, CallerSource};
use crate::constants::{
    LOCAL_ONLY_TOOLS, MANAGEMENT_TOOL_PREFIX, MAX_SSE_CONNECTIONS, SERVICE_TOKEN_HEADER,
    SSE_KEEPALIVE_SECS, USER_EMAIL_HEADER,
};
use crate::context::ServerResources;
use crate::jsonrpc::{error_codes, JsonRpcRequest, JsonRpcResponse};
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use futures_util::stream::Stream;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Routes served on the `/mcp` path.
pub fn router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .route("/mcp", get(mcp_sse).post(mcp_gateway))
        .route("/mcp/health", get(mcp_health))
        .with_state(resources)
}

/// Guard that releases one SSE connection slot when the stream drops.
struct SseSlot {
    resources: Arc<ServerResources>,
}

impl Drop for SseSlot {
    fn drop(&mut self) {
        self.resources.sse_connections.fetch_sub(1, Ordering::SeqCst);
        tracing::info!("SSE stream closed");
    }
}

/// `GET /mcp`: server-initiated event stream per the Streamable HTTP
/// transport. Carries keep-alives and `tools/list_changed` notifications.
async fn mcp_sse(
    State(resources): State<Arc<ServerResources>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    match authenticate(&resources, &headers, peer).await {
        Ok(_) => {}
        Err(err) => return err.into_response(),
    }

    let reserved = resources
        .sse_connections
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
            (count < MAX_SSE_CONNECTIONS).then_some(count + 1)
        });
    if reserved.is_err() {
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many active SSE connections")
            .into_response();
    }

    tracing::info!(
        active = resources.sse_connections.load(Ordering::SeqCst),
        "SSE stream opened"
    );

    let mut tool_changes = resources.tool_changes.subscribe();
    let slot = SseSlot {
        resources: Arc::clone(&resources),
    };

    let stream: std::pin::Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>> =
        Box::pin(async_stream::stream! {
            // Owned by the stream so the slot frees exactly when the client
            // goes away.
            let _slot = slot;

            yield Ok(Event::default().comment("keepalive"));

            let mut keepalive =
                tokio::time::interval(Duration::from_secs(SSE_KEEPALIVE_SECS));
            keepalive.tick().await;

            loop {
                tokio::select! {
                    _ = keepalive.tick() => {
                        yield Ok(Event::default().comment("keepalive"));
                    }
                    changed = tool_changes.recv() => {
                        if changed.is_err() {
                            // Lagged receivers just resubscribe to the next
                            // signal; a closed channel means shutdown.
                            if matches!(
                                changed,
                                Err(tokio::sync::broadcast::error::RecvError::Closed)
                            ) {
                                break;
                            }
                        }
                        let notification = JsonRpcRequest::notification(
                            "notifications/tools/list_changed",
                            None,
                        );
                        if let Ok(data) = serde_json::to_string(&notification) {
                            yield Ok(Event::default().data(data));
                        }
                    }
                }
            }
        });

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(SSE_KEEPALIVE_SECS)))
        .into_response()
}

/// `GET /mcp/health`: liveness for the tunnel target.
async fn mcp_health(State(resources): State<Arc<ServerResources>>) -> Json<Value> {
    let status = if resources.sandbox.health_check().await {
        "ok"
    } else {
        "degraded"
    };
    Json(json!({ "status": status }))
}

async fn authenticate(
    resources: &ServerResources,
    headers: &HeaderMap,
    peer: SocketAddr,
) -> Result<AuthenticatedCaller, crate::errors::AppError> {
    let service_token = headers
        .get(SERVICE_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());
    let user_email = headers
        .get(USER_EMAIL_HEADER)
        .and_then(|value| value.to_str().ok());

    auth::verify_mcp_auth(
        &resources.service_tokens,
        &resources.email_policy,
        &resources.auth_failures,
        service_token,
        user_email,
        peer.ip(),
    )
    .await
}

/// `POST /mcp`: one JSON-RPC request or notification.
async fn mcp_gateway(
    State(resources): State<Arc<ServerResources>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Json(request): Json<JsonRpcRequest>,
) -> Response {
    let start = Instant::now();
    let method = request.method.clone();
    let params = request.params.clone().unwrap_or_else(|| json!({}));

    let request_id = resources
        .activity
        .log_mcp_request(&method, Some(&params), None)
        .await;

    let caller = match authenticate(&resources, &headers, peer).await {
        Ok(caller) => caller,
        Err(err) => {
            resources
                .activity
                .log_mcp_response(
                    &request_id,
                    false,
                    start.elapsed().as_millis() as i64,
                    Some(&method),
                    Some(&err.message),
                    None,
                )
                .await;
            return err.into_response();
        }
    };

    // Notifications have no response envelope; a denied remote notification
    // replies at the HTTP layer instead.
    if method.starts_with("notifications/") {
        if caller.requires_user_identity() {
            resources
                .activity
                .log_mcp_response(
                    &request_id,
                    false,
                    start.elapsed().as_millis() as i64,
                    Some(&method),
                    Some("Requires user authentication"),
                    None,
                )
                .await;
            return StatusCode::FORBIDDEN.into_response();
        }
        resources
            .activity
            .log_mcp_response(
                &request_id,
                true,
                start.elapsed().as_millis() as i64,
                Some(&method),
                None,
                None,
            )
            .await;
        // The Streamable HTTP transport requires 202 Accepted here.
        return StatusCode::ACCEPTED.into_response();
    }

    let (result, error) = dispatch(&resources, &caller, &request, &method, &params).await;

    let response = match error {
        Some(error) => JsonRpcResponse {
            jsonrpc: crate::jsonrpc::JSONRPC_VERSION.to_string(),
            id: request.id.clone(),
            result: None,
            error: Some(error),
        },
        None => JsonRpcResponse::success(request.id.clone(), result.unwrap_or(Value::Null)),
    };

    let duration_ms = start.elapsed().as_millis() as i64;
    let error_message = response.error.as_ref().map(|e| e.message.clone());
    resources
        .activity
        .log_mcp_response(
            &request_id,
            response.is_success(),
            duration_ms,
            Some(&method),
            error_message.as_deref(),
            None,
        )
        .await;

    Json(response).into_response()
}

async fn dispatch(
    resources: &ServerResources,
    caller: &AuthenticatedCaller,
    request: &JsonRpcRequest,
    method: &str,
    params: &Value,
) -> (Option<Value>, Option<crate::jsonrpc::JsonRpcError>) {
    let denied = || {
        crate::jsonrpc::JsonRpcError::new(
            error_codes::INVALID_REQUEST,
            "Requires user authentication",
        )
    };

    match method {
        // The handshake carries no tool information and is needed by the
        // sync traffic, so it is open to every authenticated caller.
        "initialize" => (Some(protocol::initialize_result()), None),
        "tools/list" => {
            // Tool names are sensitive: anonymous remote callers (sync
            // traffic from the upstream discovery service) may not see them.
            if caller.requires_user_identity() {
                return (None, Some(denied()));
            }
            match handle_tools_list(resources, request).await {
                Ok(result) => (Some(result), None),
                Err(err) => {
                    tracing::error!(error = %err, "tools/list failed");
                    internal_error()
                }
            }
        }
        "tools/call" => {
            if caller.requires_user_identity() {
                return (
                    None,
                    Some(crate::jsonrpc::JsonRpcError::new(
                        error_codes::INVALID_REQUEST,
                        "Tool execution requires user authentication",
                    )),
                );
            }
            let tool_name = params.get("name").and_then(Value::as_str).unwrap_or("");
            let arguments = params.get("arguments").cloned().unwrap_or_else(|| json!({}));

            if tool_name.starts_with(MANAGEMENT_TOOL_PREFIX) {
                let result =
                    handle_management_tool_call(resources, caller, tool_name, &arguments).await;
                (Some(result), None)
            } else {
                forward_to_sandbox(resources, request).await
            }
        }
        _ => {
            if caller.requires_user_identity() {
                (None, Some(denied()))
            } else {
                forward_to_sandbox(resources, request).await
            }
        }
    }
}

fn internal_error() -> (Option<Value>, Option<crate::jsonrpc::JsonRpcError>) {
    (
        None,
        Some(crate::jsonrpc::JsonRpcError::new(
            error_codes::INTERNAL_ERROR,
            "Internal server error",
        )),
    )
}

async fn forward_to_sandbox(
    resources: &ServerResources,
    request: &JsonRpcRequest,
) -> (Option<Value>, Option<crate::jsonrpc::JsonRpcError>) {
    let envelope = json!({
        "jsonrpc": "2.0",
        "id": request.id,
        "method": request.method,
        "params": request.params,
    });
    let response = resources.sandbox.mcp_request(&envelope).await;

    if let Some(error) = response.get("error") {
        let code = error
            .get("code")
            .and_then(Value::as_i64)
            .unwrap_or(i64::from(error_codes::INTERNAL_ERROR)) as i32;
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("Internal server error");
        (None, Some(crate::jsonrpc::JsonRpcError::new(code, message)))
    } else {
        (response.get("result").cloned(), None)
    }
}

/// tools/list: sandbox tools filtered to the approved + enabled set, plus
/// the always-present management catalog.
async fn handle_tools_list(
    resources: &ServerResources,
    request: &JsonRpcRequest,
) -> anyhow::Result<Value> {
    let envelope = json!({
        "jsonrpc": "2.0",
        "id": request.id.clone().unwrap_or_else(|| json!("list")),
        "method": "tools/list",
        "params": {},
    });
    let sandbox_response = resources.sandbox.mcp_request(&envelope).await;

    let mut tools: Vec<Value> = Vec::new();
    if let Some(sandbox_tools) = sandbox_response
        .get("result")
        .and_then(|result| result.get("tools"))
        .and_then(Value::as_array)
    {
        let approved = resources.database.approved_tool_names().await?;
        tools.extend(
            sandbox_tools
                .iter()
                .filter(|tool| {
                    tool.get("name")
                        .and_then(Value::as_str)
                        .is_some_and(|name| approved.contains(name))
                })
                .cloned(),
        );
    }

    tools.extend(management::management_tools());

    Ok(json!({ "tools": tools }))
}

/// Run a management tool locally and wrap the result in the MCP content
/// envelope. Destructive tools are refused for remote callers.
async fn handle_management_tool_call(
    resources: &ServerResources,
    caller: &AuthenticatedCaller,
    tool_name: &str,
    arguments: &Value,
) -> Value {
    if LOCAL_ONLY_TOOLS.contains(&tool_name) && caller.source == CallerSource::Worker {
        tracing::warn!(
            tool_name,
            caller = caller.email.as_deref().unwrap_or("unknown"),
            "blocked remote call to local-only tool"
        );
        return protocol::error_content(&format!(
            "{tool_name} is restricted to local access only"
        ));
    }

    let service = ManagementService::new(resources);
    let result = service.execute_tool(tool_name, arguments).await;

    if let Some(error) = result.get("error").and_then(Value::as_str) {
        protocol::error_content(error)
    } else {
        protocol::text_content(&result)
    }
}

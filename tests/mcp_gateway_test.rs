// ABOUTME: Gateway tests: handshake, notifications, local-mode calls, remote denial semantics
// ABOUTME: Drives the real axum router with oneshot requests and a seeded peer address

mod common;

use axum::body::Body;
use axum::extract::connect_info::ConnectInfo;
use axum::http::{Request, StatusCode};
use common::test_resources;
use mcpbox::constants::{aad, settings_keys, SERVICE_TOKEN_HEADER, USER_EMAIL_HEADER};
use mcpbox::services::SettingService;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

const TOKEN: &str = "remote-service-token-0123456789";

fn post_mcp(body: Value) -> Request<Body> {
    let mut request = Request::builder()
        .method("POST")
        .uri("/mcp")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request");
    request
        .extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    request
}

fn with_headers(mut request: Request<Body>, token: Option<&str>, email: Option<&str>) -> Request<Body> {
    if let Some(token) = token {
        request
            .headers_mut()
            .insert(SERVICE_TOKEN_HEADER, token.parse().expect("header"));
    }
    if let Some(email) = email {
        request
            .headers_mut()
            .insert(USER_EMAIL_HEADER, email.parse().expect("header"));
    }
    request
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json body")
}

async fn remote_mode(resources: &mcpbox::context::ServerResources) {
    let settings = SettingService::new(resources.database.clone());
    settings
        .set_encrypted_value(
            &resources.cipher,
            settings_keys::SERVICE_TOKEN,
            TOKEN,
            aad::SERVICE_TOKEN,
            None,
        )
        .await
        .unwrap();
    resources.service_tokens.invalidate().await;
}

#[tokio::test]
async fn initialize_returns_the_fixed_handshake() {
    let resources = test_resources().await;
    let app = mcpbox::app_router(Arc::clone(&resources));

    let response = app
        .oneshot(post_mcp(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["jsonrpc"], json!("2.0"));
    assert_eq!(body["id"], json!(1));
    assert_eq!(body["result"]["protocolVersion"], json!("2024-11-05"));
    assert_eq!(body["result"]["capabilities"]["tools"], json!({}));
    assert_eq!(body["result"]["serverInfo"]["name"], json!("mcpbox"));
}

#[tokio::test]
async fn notification_returns_202_with_empty_body() {
    let resources = test_resources().await;
    let app = mcpbox::app_router(Arc::clone(&resources));

    let response = app
        .oneshot(post_mcp(json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized",
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn local_mode_management_call_succeeds_without_auth() {
    let resources = test_resources().await;
    let app = mcpbox::app_router(Arc::clone(&resources));

    let response = app
        .oneshot(post_mcp(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "tools/call",
            "params": {"name": "mcpbox_list_servers", "arguments": {}},
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], json!(1));
    let content = &body["result"]["content"][0];
    assert_eq!(content["type"], json!("text"));
    let inner: Value = serde_json::from_str(content["text"].as_str().unwrap()).unwrap();
    assert_eq!(inner["servers"], json!([]));
    assert_eq!(inner["total"], json!(0));
    assert!(body["result"].get("isError").is_none());
}

#[tokio::test]
async fn management_errors_travel_as_is_error_content() {
    let resources = test_resources().await;
    let app = mcpbox::app_router(Arc::clone(&resources));

    let response = app
        .oneshot(post_mcp(json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "tools/call",
            "params": {"name": "mcpbox_get_server", "arguments": {"server_id": "not-a-uuid"}},
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    // Input errors are part of the result, not JSON-RPC errors.
    assert!(body.get("error").is_none());
    assert_eq!(body["result"]["isError"], json!(true));
    assert!(body["result"]["content"][0]["text"]
        .as_str()
        .unwrap()
        .starts_with("Error:"));
}

#[tokio::test]
async fn remote_without_token_gets_403_and_opaque_body() {
    let resources = test_resources().await;
    remote_mode(&resources).await;
    let app = mcpbox::app_router(Arc::clone(&resources));

    let response = app
        .oneshot(post_mcp(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
        })))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_json(response).await;
    assert_eq!(body["detail"], json!("Authentication failed"));
}

#[tokio::test]
async fn remote_anonymous_tools_list_is_denied_as_jsonrpc_error() {
    let resources = test_resources().await;
    remote_mode(&resources).await;
    let app = mcpbox::app_router(Arc::clone(&resources));

    // Valid token, no email: the request is authenticated but anonymous.
    let response = app
        .oneshot(with_headers(
            post_mcp(json!({
                "jsonrpc": "2.0",
                "id": 1,
                "method": "tools/list",
            })),
            Some(TOKEN),
            None,
        ))
        .await
        .unwrap();

    // HTTP 200 because the token WAS valid; the denial is JSON-RPC level.
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!(-32600));
    assert_eq!(
        body["error"]["message"],
        json!("Requires user authentication")
    );
}

#[tokio::test]
async fn remote_anonymous_tools_call_is_denied_with_execution_message() {
    let resources = test_resources().await;
    remote_mode(&resources).await;
    let app = mcpbox::app_router(Arc::clone(&resources));

    let response = app
        .oneshot(with_headers(
            post_mcp(json!({
                "jsonrpc": "2.0",
                "id": 2,
                "method": "tools/call",
                "params": {"name": "mcpbox_list_servers", "arguments": {}},
            })),
            Some(TOKEN),
            None,
        ))
        .await
        .unwrap();

    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], json!(-32600));
    assert_eq!(
        body["error"]["message"],
        json!("Tool execution requires user authentication")
    );
}

#[tokio::test]
async fn remote_anonymous_initialize_and_notifications_are_allowed() {
    let resources = test_resources().await;
    remote_mode(&resources).await;

    let app = mcpbox::app_router(Arc::clone(&resources));
    let init = app
        .oneshot(with_headers(
            post_mcp(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize"})),
            Some(TOKEN),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(init.status(), StatusCode::OK);
    let body = body_json(init).await;
    assert!(body.get("error").is_none());

    let app = mcpbox::app_router(Arc::clone(&resources));
    let notified = app
        .oneshot(with_headers(
            post_mcp(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})),
            Some(TOKEN),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(notified.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn remote_verified_user_may_call_management_tools() {
    let resources = test_resources().await;
    remote_mode(&resources).await;
    let app = mcpbox::app_router(Arc::clone(&resources));

    let response = app
        .oneshot(with_headers(
            post_mcp(json!({
                "jsonrpc": "2.0",
                "id": 3,
                "method": "tools/call",
                "params": {"name": "mcpbox_list_servers", "arguments": {}},
            })),
            Some(TOKEN),
            Some("user@example.com"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert!(body.get("error").is_none());
    assert!(body["result"]["content"][0]["text"].is_string());
}

#[tokio::test]
async fn destructive_tools_are_local_only() {
    let resources = test_resources().await;
    remote_mode(&resources).await;
    let app = mcpbox::app_router(Arc::clone(&resources));

    let response = app
        .oneshot(with_headers(
            post_mcp(json!({
                "jsonrpc": "2.0",
                "id": 4,
                "method": "tools/call",
                "params": {
                    "name": "mcpbox_delete_server",
                    "arguments": {"server_id": uuid::Uuid::new_v4().to_string()},
                },
            })),
            Some(TOKEN),
            Some("user@example.com"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["result"]["isError"], json!(true));
    assert!(body["result"]["content"][0]["text"]
        .as_str()
        .unwrap()
        .contains("restricted to local access only"));
}

#[tokio::test]
async fn string_and_integer_ids_round_trip() {
    let resources = test_resources().await;

    for id in [json!("abc-123"), json!(42)] {
        let app = mcpbox::app_router(Arc::clone(&resources));
        let response = app
            .oneshot(post_mcp(json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "initialize",
            })))
            .await
            .unwrap();
        let body = body_json(response).await;
        assert_eq!(body["id"], id);
    }
}

#[tokio::test]
async fn gateway_writes_request_and_response_logs() {
    let resources = test_resources().await;
    let app = mcpbox::app_router(Arc::clone(&resources));

    app.oneshot(post_mcp(json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": "initialize",
    })))
    .await
    .unwrap();

    let recent = resources.activity.get_recent_logs(10).await;
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].log_type, mcpbox::models::LogType::McpRequest);
    assert_eq!(recent[1].log_type, mcpbox::models::LogType::McpResponse);
    // Request and response carry the same correlation id.
    assert_eq!(recent[0].request_id, recent[1].request_id);
    assert!(recent[0].request_id.is_some());
}

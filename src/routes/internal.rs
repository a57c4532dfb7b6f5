// ABOUTME: Service-to-service endpoints consumed by the edge proxy deployer
// ABOUTME: Guarded by a shared bearer token; never exposed through the public gateway

use crate::constants::settings_keys;
use crate::context::ServerResources;
use crate::services::SettingService;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;
use std::sync::Arc;
use subtle::ConstantTimeEq;

pub fn router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .route("/internal/active-tunnel-token", get(active_tunnel_token))
        .route("/internal/active-service-token", get(active_service_token))
        .route("/internal/worker-deploy-config", get(worker_deploy_config))
        .with_state(resources)
}

/// Bearer check against the shared internal token, constant-time. No token
/// configured means the internal surface is disabled entirely.
fn authorize(resources: &ServerResources, headers: &HeaderMap) -> Result<(), Response> {
    let denied = || (StatusCode::FORBIDDEN, "Forbidden").into_response();

    let Some(expected) = resources.config.internal_api_token.as_deref() else {
        return Err(denied());
    };

    let presented = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));

    match presented {
        Some(token) if bool::from(token.as_bytes().ct_eq(expected.as_bytes())) => Ok(()),
        _ => Err(denied()),
    }
}

async fn active_tunnel_token(
    State(resources): State<Arc<ServerResources>>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&resources, &headers) {
        return denied;
    }

    let settings = SettingService::new(resources.database.clone());
    let body = match settings.get_tunnel_token(&resources.cipher).await {
        Ok(Some(token)) => json!({ "token": token }),
        Ok(None) => json!({ "token": null, "error": "No active tunnel configuration" }),
        Err(err) => json!({ "token": null, "error": err.message }),
    };
    Json(body).into_response()
}

async fn active_service_token(
    State(resources): State<Arc<ServerResources>>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&resources, &headers) {
        return denied;
    }

    let settings = SettingService::new(resources.database.clone());
    let body = match settings.get_service_token(&resources.cipher).await {
        Ok(Some(token)) => json!({ "token": token }),
        Ok(None) => json!({ "token": null, "error": "No active service token" }),
        Err(err) => json!({ "token": null, "error": err.message }),
    };
    Json(body).into_response()
}

async fn worker_deploy_config(
    State(resources): State<Arc<ServerResources>>,
    headers: HeaderMap,
) -> Response {
    if let Err(denied) = authorize(&resources, &headers) {
        return denied;
    }

    let settings = SettingService::new(resources.database.clone());

    let hostname = settings
        .get_value(settings_keys::EDGE_HOSTNAME)
        .await
        .ok()
        .flatten();
    let Some(hostname) = hostname else {
        return Json(json!({ "error": "No active edge configuration" })).into_response();
    };

    let worker_name = settings
        .get_value_or(settings_keys::EDGE_WORKER_NAME, "mcpbox-proxy")
        .await
        .unwrap_or_else(|_| "mcpbox-proxy".into());

    let has_service_token = matches!(
        settings.get_service_token(&resources.cipher).await,
        Ok(Some(_))
    );

    let policy_type = settings
        .get_value(settings_keys::ACCESS_POLICY_TYPE)
        .await
        .ok()
        .flatten();
    let allowed_emails = match policy_type.as_deref() {
        Some("emails") => settings
            .get_value(settings_keys::ACCESS_POLICY_EMAILS)
            .await
            .ok()
            .flatten()
            .and_then(|raw| serde_json::from_str::<Vec<String>>(&raw).ok())
            .map(|emails| emails.join(","))
            .unwrap_or_default(),
        _ => String::new(),
    };
    let allowed_email_domain = match policy_type.as_deref() {
        Some("email_domain") => settings
            .get_value(settings_keys::ACCESS_POLICY_EMAIL_DOMAIN)
            .await
            .ok()
            .flatten()
            .unwrap_or_default(),
        _ => String::new(),
    };

    Json(json!({
        "hostname": hostname,
        "worker_name": worker_name,
        "has_service_token": has_service_token,
        "allowed_emails": allowed_emails,
        "allowed_email_domain": allowed_email_domain,
    }))
    .into_response()
}

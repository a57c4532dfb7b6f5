// ABOUTME: OAuth routes for external MCP sources: start the browser flow, handle the callback
// ABOUTME: Tokens are encrypted with the oauth_tokens AAD and stored on the source row

use crate::context::ServerResources;
use crate::errors::AppError;
use crate::models::AuthType;
use crate::oauth;
use axum::extract::{Path, Query, State};
use axum::response::Html;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

pub fn router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .route(
            "/api/external-sources/:source_id/oauth/authorize",
            post(start_authorization),
        )
        .route("/oauth/callback", get(oauth_callback))
        .with_state(resources)
}

async fn start_authorization(
    State(resources): State<Arc<ServerResources>>,
    Path(source_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let source = resources
        .database
        .get_external_source(source_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| AppError::not_found(format!("External source {source_id} not found")))?;

    if source.auth_type != AuthType::Oauth {
        return Err(AppError::invalid_state(
            "External source is not configured for OAuth authentication",
        ));
    }

    let callback_url = format!("{}/oauth/callback", resources.config.oauth_callback_base);
    let authorization = oauth::start_oauth_flow(
        &resources.oauth_flows,
        source.id,
        &source.url,
        &callback_url,
        source.oauth_client_id.as_deref(),
    )
    .await
    .map_err(|err| AppError::invalid_state(err.to_string()))?;

    Ok(Json(json!({
        "auth_url": authorization.auth_url,
        "issuer": authorization.issuer,
    })))
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    state: Option<String>,
    code: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

async fn oauth_callback(
    State(resources): State<Arc<ServerResources>>,
    Query(query): Query<CallbackQuery>,
) -> Result<Html<String>, AppError> {
    if let Some(error) = query.error {
        let detail = query.error_description.unwrap_or_default();
        tracing::warn!(error, detail, "OAuth authorization denied");
        return Ok(Html(callback_page(
            "Authorization failed",
            "The authorization server reported an error. You can close this window and retry.",
        )));
    }

    let (Some(state), Some(code)) = (query.state, query.code) else {
        return Err(AppError::invalid_input("Missing state or code parameter"));
    };

    let (source_id, tokens) = oauth::exchange_code(&resources.oauth_flows, &state, &code)
        .await
        .map_err(|err| {
            tracing::warn!(error = %err, "OAuth code exchange failed");
            AppError::invalid_input("Authorization could not be completed")
        })?;

    let source = resources
        .database
        .get_external_source(source_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| AppError::not_found("External source no longer exists"))?;

    let encrypted = oauth::encrypt_tokens(
        &resources.cipher,
        &tokens,
        source.oauth_client_id.as_deref(),
    );
    resources
        .database
        .update_source_oauth_tokens(source_id, &encrypted, source.oauth_issuer.as_deref(), None)
        .await
        .map_err(internal)?;

    tracing::info!(%source_id, "OAuth authorization completed");
    Ok(Html(callback_page(
        "Authorization complete",
        "MCPbox is now connected to the external server. You can close this window.",
    )))
}

fn callback_page(title: &str, body: &str) -> String {
    format!(
        "<!doctype html><html><head><title>{title}</title></head>\
         <body><h1>{title}</h1><p>{body}</p></body></html>"
    )
}

fn internal(err: impl std::fmt::Display) -> AppError {
    tracing::error!(error = %err, "OAuth route failure");
    AppError::internal()
}

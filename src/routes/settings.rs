// ABOUTME: Settings API: masked listing, security policy, and the global module allowlist
// ABOUTME: Module additions trigger best-effort sandbox installs; resets trigger a full sync

use crate::context::ServerResources;
use crate::errors::AppError;
use crate::services::setting::SecurityPolicyUpdate;
use crate::services::{GlobalConfigService, SettingService};
use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

pub fn router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .route("/settings", get(list_settings))
        .route(
            "/settings/security-policy",
            get(get_security_policy).patch(update_security_policy),
        )
        .route(
            "/settings/modules",
            get(get_module_config).patch(update_modules),
        )
        .with_state(resources)
}

async fn list_settings(
    State(resources): State<Arc<ServerResources>>,
) -> Result<Json<Value>, AppError> {
    let service = SettingService::new(resources.database.clone());
    let settings = service.list_masked().await.map_err(internal)?;

    Ok(Json(json!({
        "settings": settings.iter().map(|s| json!({
            "id": s.id.to_string(),
            "key": s.key,
            "value": s.value,
            "encrypted": s.encrypted,
            "description": s.description,
            "updated_at": s.updated_at.to_rfc3339(),
        })).collect::<Vec<_>>(),
    })))
}

async fn get_security_policy(
    State(resources): State<Arc<ServerResources>>,
) -> Result<Json<Value>, AppError> {
    let service = SettingService::new(resources.database.clone());
    let policy = service.get_security_policy().await.map_err(internal)?;
    Ok(Json(serde_json::to_value(policy).map_err(internal)?))
}

async fn update_security_policy(
    State(resources): State<Arc<ServerResources>>,
    Json(update): Json<SecurityPolicyUpdate>,
) -> Result<Json<Value>, AppError> {
    let service = SettingService::new(resources.database.clone());
    let policy = service.update_security_policy(&update).await?;
    Ok(Json(serde_json::to_value(policy).map_err(internal)?))
}

async fn get_module_config(
    State(resources): State<Arc<ServerResources>>,
) -> Result<Json<Value>, AppError> {
    let config = GlobalConfigService::new(resources.database.clone());
    let mut allowed = config.get_allowed_modules().await.map_err(internal)?;
    allowed.sort();
    let is_custom = !config.is_using_defaults().await.map_err(internal)?;
    let mut defaults = GlobalConfigService::default_modules();
    defaults.sort();

    Ok(Json(json!({
        "allowed_modules": allowed,
        "default_modules": defaults,
        "is_custom": is_custom,
    })))
}

#[derive(Debug, Deserialize)]
struct UpdateModulesRequest {
    add_modules: Option<Vec<String>>,
    remove_modules: Option<Vec<String>>,
    reset_to_defaults: Option<bool>,
}

async fn update_modules(
    State(resources): State<Arc<ServerResources>>,
    Json(request): Json<UpdateModulesRequest>,
) -> Result<Json<Value>, AppError> {
    let config = GlobalConfigService::new(resources.database.clone());

    if request.reset_to_defaults == Some(true) {
        config.reset_to_defaults().await.map_err(internal)?;
        let allowed = config.get_allowed_modules().await.map_err(internal)?;
        resources.sandbox.sync_packages(&allowed).await;

        let mut sorted = allowed;
        sorted.sort();
        let mut defaults = GlobalConfigService::default_modules();
        defaults.sort();
        return Ok(Json(json!({
            "allowed_modules": sorted,
            "default_modules": defaults,
            "is_custom": false,
        })));
    }

    if let Some(add_modules) = &request.add_modules {
        for module in add_modules {
            config.add_module(module).await.map_err(internal)?;
            let install = resources.sandbox.install_package(module, None).await;
            if install.get("status").and_then(Value::as_str) == Some("failed") {
                tracing::warn!(
                    module,
                    error = ?install.get("error_message"),
                    "package installation failed"
                );
            }
        }
    }

    if let Some(remove_modules) = &request.remove_modules {
        for module in remove_modules {
            config.remove_module(module).await.map_err(internal)?;
        }
    }

    get_module_config(State(resources)).await
}

fn internal(err: impl std::fmt::Display) -> AppError {
    tracing::error!(error = %err, "settings API failure");
    AppError::internal()
}

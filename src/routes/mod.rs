// ABOUTME: Admin-facing HTTP routers outside the MCP gateway
// ABOUTME: Activity observability, settings, internal edge endpoints, and OAuth callbacks

pub mod activity;
pub mod approvals;
pub mod internal;
pub mod oauth;
pub mod settings;

use crate::context::ServerResources;
use axum::Router;
use std::sync::Arc;

/// All non-gateway routes assembled into one router.
pub fn router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .merge(activity::router(Arc::clone(&resources)))
        .merge(approvals::router(Arc::clone(&resources)))
        .merge(internal::router(Arc::clone(&resources)))
        .merge(oauth::router(Arc::clone(&resources)))
        .merge(settings::router(resources))
}

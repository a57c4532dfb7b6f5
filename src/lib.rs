// ABOUTME: MCPbox library root: a self-hosted control plane for LLM-authored tools over MCP
// ABOUTME: The gateway, auth pipeline, approval workflows, sandbox client, and activity logging

//! # MCPbox
//!
//! MCPbox exposes a curated set of tools to external LLM clients over the
//! Model Context Protocol, a JSON-RPC 2.0 dialect. Tool code is written in
//! Python, executed inside a separate sandbox service, and gated behind
//! admin approval before it becomes reachable.
//!
//! The crate is organized leaves-first:
//!
//! - [`crypto`]: authenticated encryption of secrets at rest.
//! - [`activity`]: non-blocking batched logging with live fan-out.
//! - [`retry`] + [`sandbox`]: resilient RPC to the sandbox (retry, circuit
//!   breaker, pooled HTTP).
//! - [`auth`]: local/remote classification, the service-token and
//!   email-policy caches, per-IP failure budgets.
//! - [`services`]: the approval state machine, tool versioning, secrets,
//!   settings, and external-source management.
//! - [`mcp`]: the gateway dispatch and the `mcpbox_*` management surface.
//! - [`routes`]: the activity/observability API, internal edge endpoints,
//!   settings, and OAuth callbacks.

pub mod activity;
pub mod auth;
pub mod config;
pub mod constants;
pub mod context;
pub mod crypto;
pub mod database;
pub mod errors;
pub mod jsonrpc;
pub mod mcp;
pub mod models;
pub mod notify;
pub mod oauth;
pub mod retry;
pub mod routes;
pub mod sandbox;
pub mod services;

use axum::Router;
use context::ServerResources;
use std::sync::Arc;

/// The complete application router: gateway plus admin surfaces.
#[must_use]
pub fn app_router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .merge(mcp::gateway::router(Arc::clone(&resources)))
        .merge(routes::router(resources))
        .layer(tower_http::trace::TraceLayer::new_for_http())
}

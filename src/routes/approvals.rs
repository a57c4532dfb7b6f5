// ABOUTME: Admin approval API: review queues, approve/reject/revoke, bulk actions, dashboard
// ABOUTME: Approval changes re-register the owning server so the exposed tool set stays truthful

use crate::context::ServerResources;
use crate::errors::AppError;
use crate::mcp::management::registration;
use crate::models::{ApprovalStatus, RequestStatus};
use crate::services::{ApprovalService, GlobalConfigService};
use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

pub fn router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .route("/approvals/dashboard", get(dashboard))
        .route("/approvals/tools", get(list_pending_tools))
        .route("/approvals/tools/:tool_id/approve", post(approve_tool))
        .route("/approvals/tools/:tool_id/reject", post(reject_tool))
        .route("/approvals/tools/:tool_id/revoke", post(revoke_tool))
        .route("/approvals/tools/bulk-approve", post(bulk_approve_tools))
        .route("/approvals/tools/bulk-reject", post(bulk_reject_tools))
        .route("/approvals/modules", get(list_module_requests))
        .route("/approvals/modules/:request_id/approve", post(approve_module))
        .route("/approvals/modules/:request_id/reject", post(reject_module))
        .route("/approvals/modules/:request_id/revoke", post(revoke_module))
        .route("/approvals/modules/bulk-approve", post(bulk_approve_modules))
        .route("/approvals/modules/bulk-reject", post(bulk_reject_modules))
        .route("/approvals/network", get(list_network_requests))
        .route("/approvals/network/:request_id/approve", post(approve_network))
        .route("/approvals/network/:request_id/reject", post(reject_network))
        .route("/approvals/network/:request_id/revoke", post(revoke_network))
        .route("/approvals/network/bulk-approve", post(bulk_approve_network))
        .route("/approvals/network/bulk-reject", post(bulk_reject_network))
        .with_state(resources)
}

#[derive(Debug, Deserialize)]
struct ReviewBody {
    reviewed_by: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BulkBody {
    ids: Vec<Uuid>,
    reviewed_by: String,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ListQuery {
    status: Option<String>,
    search: Option<String>,
    #[serde(default = "default_page")]
    page: i64,
    #[serde(default = "default_page_size")]
    page_size: i64,
}

const fn default_page() -> i64 {
    1
}

const fn default_page_size() -> i64 {
    20
}

async fn dashboard(
    State(resources): State<Arc<ServerResources>>,
) -> Result<Json<Value>, AppError> {
    let approval = ApprovalService::new(resources.database.clone());
    let stats = approval.get_dashboard_stats().await?;
    Ok(Json(serde_json::to_value(stats).map_err(internal)?))
}

async fn list_pending_tools(
    State(resources): State<Arc<ServerResources>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, AppError> {
    let status = match query.status.as_deref() {
        None | Some("pending_review") => ApprovalStatus::PendingReview,
        Some(other) => other
            .parse()
            .map_err(|_| AppError::invalid_input(format!("Invalid status '{other}'")))?,
    };

    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 100);
    let (items, total) = resources
        .database
        .list_tools_by_approval(status, page_size, (page - 1) * page_size)
        .await
        .map_err(internal)?;

    Ok(Json(json!({
        "items": items.iter().map(|(tool, server_name)| json!({
            "id": tool.id.to_string(),
            "server_id": tool.server_id.to_string(),
            "server_name": server_name,
            "name": tool.name,
            "description": tool.description,
            "python_code": tool.python_code,
            "created_by": tool.created_by,
            "publish_notes": tool.publish_notes,
            "approval_status": tool.approval_status.as_str(),
            "approval_requested_at": tool.approval_requested_at.map(|t| t.to_rfc3339()),
            "rejection_reason": tool.rejection_reason,
            "current_version": tool.current_version,
        })).collect::<Vec<_>>(),
        "total": total,
        "page": page,
        "page_size": page_size,
    })))
}

async fn approve_tool(
    State(resources): State<Arc<ServerResources>>,
    Path(tool_id): Path<Uuid>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<Value>, AppError> {
    let approval = ApprovalService::new(resources.database.clone());
    let tool = approval.approve_tool(tool_id, &body.reviewed_by).await?;

    // An approval changes the observable tool set of a running server.
    registration::refresh_if_running(&resources, tool.server_id).await;

    Ok(Json(json!({
        "id": tool.id.to_string(),
        "name": tool.name,
        "approval_status": tool.approval_status.as_str(),
        "approved_by": tool.approved_by,
    })))
}

async fn reject_tool(
    State(resources): State<Arc<ServerResources>>,
    Path(tool_id): Path<Uuid>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<Value>, AppError> {
    let reason = body
        .reason
        .ok_or_else(|| AppError::invalid_input("reason is required"))?;
    let approval = ApprovalService::new(resources.database.clone());
    let tool = approval
        .reject_tool(tool_id, &body.reviewed_by, &reason)
        .await?;
    Ok(Json(json!({
        "id": tool.id.to_string(),
        "name": tool.name,
        "approval_status": tool.approval_status.as_str(),
        "rejection_reason": tool.rejection_reason,
    })))
}

async fn revoke_tool(
    State(resources): State<Arc<ServerResources>>,
    Path(tool_id): Path<Uuid>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<Value>, AppError> {
    let approval = ApprovalService::new(resources.database.clone());
    let tool = approval
        .revoke_tool_approval(tool_id, &body.reviewed_by)
        .await?;

    registration::refresh_if_running(&resources, tool.server_id).await;

    Ok(Json(json!({
        "id": tool.id.to_string(),
        "name": tool.name,
        "approval_status": tool.approval_status.as_str(),
    })))
}

async fn bulk_approve_tools(
    State(resources): State<Arc<ServerResources>>,
    Json(body): Json<BulkBody>,
) -> Result<Json<Value>, AppError> {
    let approval = ApprovalService::new(resources.database.clone());
    let outcome = approval
        .bulk_approve_tools(&body.ids, &body.reviewed_by)
        .await;

    // One refresh per affected server would be ideal; re-registering each
    // tool's server is already idempotent, so keep it simple.
    for tool_id in &body.ids {
        if let Ok(Some(tool)) = resources.database.get_tool(*tool_id).await {
            registration::refresh_if_running(&resources, tool.server_id).await;
        }
    }

    Ok(Json(serde_json::to_value(outcome).map_err(internal)?))
}

async fn bulk_reject_tools(
    State(resources): State<Arc<ServerResources>>,
    Json(body): Json<BulkBody>,
) -> Result<Json<Value>, AppError> {
    let reason = body
        .reason
        .ok_or_else(|| AppError::invalid_input("reason is required"))?;
    let approval = ApprovalService::new(resources.database.clone());
    let outcome = approval
        .bulk_reject_tools(&body.ids, &body.reviewed_by, &reason)
        .await;
    Ok(Json(serde_json::to_value(outcome).map_err(internal)?))
}

fn parse_request_status(raw: Option<&str>) -> Result<Option<RequestStatus>, AppError> {
    match raw {
        None => Ok(None),
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| AppError::invalid_input(format!("Invalid status '{value}'"))),
    }
}

async fn list_module_requests(
    State(resources): State<Arc<ServerResources>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, AppError> {
    let status = parse_request_status(query.status.as_deref())?;
    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 100);

    let (items, total) = resources
        .database
        .list_module_requests(
            status,
            query.search.as_deref(),
            page_size,
            (page - 1) * page_size,
        )
        .await
        .map_err(internal)?;

    Ok(Json(json!({
        "items": items,
        "total": total,
        "page": page,
        "page_size": page_size,
    })))
}

async fn approve_module(
    State(resources): State<Arc<ServerResources>>,
    Path(request_id): Path<Uuid>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<Value>, AppError> {
    let approval = ApprovalService::new(resources.database.clone());
    let config = GlobalConfigService::new(resources.database.clone());
    let request = approval
        .approve_module_request(&config, &resources.sandbox, request_id, &body.reviewed_by)
        .await?;
    Ok(Json(serde_json::to_value(request).map_err(internal)?))
}

async fn reject_module(
    State(resources): State<Arc<ServerResources>>,
    Path(request_id): Path<Uuid>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<Value>, AppError> {
    let reason = body
        .reason
        .ok_or_else(|| AppError::invalid_input("reason is required"))?;
    let approval = ApprovalService::new(resources.database.clone());
    let request = approval
        .reject_module_request(request_id, &body.reviewed_by, &reason)
        .await?;
    Ok(Json(serde_json::to_value(request).map_err(internal)?))
}

async fn revoke_module(
    State(resources): State<Arc<ServerResources>>,
    Path(request_id): Path<Uuid>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<Value>, AppError> {
    let approval = ApprovalService::new(resources.database.clone());
    let config = GlobalConfigService::new(resources.database.clone());
    let request = approval
        .revoke_module_request(&config, request_id, &body.reviewed_by)
        .await?;
    Ok(Json(serde_json::to_value(request).map_err(internal)?))
}

async fn bulk_approve_modules(
    State(resources): State<Arc<ServerResources>>,
    Json(body): Json<BulkBody>,
) -> Result<Json<Value>, AppError> {
    let approval = ApprovalService::new(resources.database.clone());
    let config = GlobalConfigService::new(resources.database.clone());
    let outcome = approval
        .bulk_approve_module_requests(&config, &resources.sandbox, &body.ids, &body.reviewed_by)
        .await;
    Ok(Json(serde_json::to_value(outcome).map_err(internal)?))
}

async fn bulk_reject_modules(
    State(resources): State<Arc<ServerResources>>,
    Json(body): Json<BulkBody>,
) -> Result<Json<Value>, AppError> {
    let reason = body
        .reason
        .ok_or_else(|| AppError::invalid_input("reason is required"))?;
    let approval = ApprovalService::new(resources.database.clone());
    let outcome = approval
        .bulk_reject_module_requests(&body.ids, &body.reviewed_by, &reason)
        .await;
    Ok(Json(serde_json::to_value(outcome).map_err(internal)?))
}

async fn list_network_requests(
    State(resources): State<Arc<ServerResources>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, AppError> {
    let status = parse_request_status(query.status.as_deref())?;
    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 100);

    let (items, total) = resources
        .database
        .list_network_requests(
            status,
            query.search.as_deref(),
            page_size,
            (page - 1) * page_size,
        )
        .await
        .map_err(internal)?;

    Ok(Json(json!({
        "items": items,
        "total": total,
        "page": page,
        "page_size": page_size,
    })))
}

async fn approve_network(
    State(resources): State<Arc<ServerResources>>,
    Path(request_id): Path<Uuid>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<Value>, AppError> {
    let approval = ApprovalService::new(resources.database.clone());
    let request = approval
        .approve_network_request(request_id, &body.reviewed_by)
        .await?;

    // Allowed hosts changed: a running server needs the fresh allowlist.
    if let Ok(Some(tool)) = resources.database.get_tool(request.tool_id).await {
        registration::refresh_if_running(&resources, tool.server_id).await;
    }

    Ok(Json(serde_json::to_value(request).map_err(internal)?))
}

async fn reject_network(
    State(resources): State<Arc<ServerResources>>,
    Path(request_id): Path<Uuid>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<Value>, AppError> {
    let reason = body
        .reason
        .ok_or_else(|| AppError::invalid_input("reason is required"))?;
    let approval = ApprovalService::new(resources.database.clone());
    let request = approval
        .reject_network_request(request_id, &body.reviewed_by, &reason)
        .await?;
    Ok(Json(serde_json::to_value(request).map_err(internal)?))
}

async fn revoke_network(
    State(resources): State<Arc<ServerResources>>,
    Path(request_id): Path<Uuid>,
    Json(body): Json<ReviewBody>,
) -> Result<Json<Value>, AppError> {
    let approval = ApprovalService::new(resources.database.clone());
    let request = approval
        .revoke_network_request(request_id, &body.reviewed_by)
        .await?;

    if let Ok(Some(tool)) = resources.database.get_tool(request.tool_id).await {
        registration::refresh_if_running(&resources, tool.server_id).await;
    }

    Ok(Json(serde_json::to_value(request).map_err(internal)?))
}

async fn bulk_approve_network(
    State(resources): State<Arc<ServerResources>>,
    Json(body): Json<BulkBody>,
) -> Result<Json<Value>, AppError> {
    let approval = ApprovalService::new(resources.database.clone());
    let outcome = approval
        .bulk_approve_network_requests(&body.ids, &body.reviewed_by)
        .await;

    // Allowed hosts changed on every affected server; re-registration is
    // idempotent, so refresh per request.
    for request_id in &body.ids {
        if let Ok(Some(request)) = resources.database.get_network_request(*request_id).await {
            if let Ok(Some(tool)) = resources.database.get_tool(request.tool_id).await {
                registration::refresh_if_running(&resources, tool.server_id).await;
            }
        }
    }

    Ok(Json(serde_json::to_value(outcome).map_err(internal)?))
}

async fn bulk_reject_network(
    State(resources): State<Arc<ServerResources>>,
    Json(body): Json<BulkBody>,
) -> Result<Json<Value>, AppError> {
    let reason = body
        .reason
        .ok_or_else(|| AppError::invalid_input("reason is required"))?;
    let approval = ApprovalService::new(resources.database.clone());
    let outcome = approval
        .bulk_reject_network_requests(&body.ids, &body.reviewed_by, &reason)
        .await;
    Ok(Json(serde_json::to_value(outcome).map_err(internal)?))
}

fn internal(err: impl std::fmt::Display) -> AppError {
    tracing::error!(error = %err, "approvals API failure");
    AppError::internal()
}

// ABOUTME: Approval state machine for tool publishing, module requests, and network access
// ABOUTME: Duplicate pending requests are rejected by the database constraint, not a pre-check

use super::global_config::GlobalConfigService;
use super::setting::SettingService;
use crate::constants::settings_keys;
use crate::database::{is_unique_violation, Database};
use crate::errors::AppError;
use crate::models::{
    ApprovalStatus, ModuleRequest, NetworkAccessRequest, NetworkMode, RequestStatus, Tool,
};
use crate::sandbox::SandboxClient;
use chrono::{Duration, Utc};
use serde_json::Value;
use uuid::Uuid;

/// Counters for the approval dashboard.
#[derive(Debug, Clone, serde::Serialize)]
pub struct DashboardStats {
    pub pending_tools: i64,
    pub pending_module_requests: i64,
    pub pending_network_requests: i64,
    pub approved_tools: i64,
    pub approved_module_requests: i64,
    pub approved_network_requests: i64,
    pub recently_approved: i64,
    pub recently_rejected: i64,
}

/// Result of a bulk approve/reject pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BulkOutcome {
    pub success: bool,
    pub processed_count: usize,
    pub failed: Vec<Value>,
}

/// Service governing the three approval workflows.
#[derive(Clone)]
pub struct ApprovalService {
    database: Database,
}

impl ApprovalService {
    #[must_use]
    pub const fn new(database: Database) -> Self {
        Self { database }
    }

    // =====================================================================
    // Tool approval lifecycle
    // =====================================================================

    /// Submit a tool for review. `draft | rejected → pending_review`, or
    /// straight to `approved` when the admin runs in auto-approve mode.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown tool, `InvalidState` when not in
    /// draft/rejected, or a database error.
    pub async fn request_publish(
        &self,
        settings: &SettingService,
        tool_id: Uuid,
        notes: Option<String>,
        requested_by: Option<String>,
    ) -> Result<Tool, AppError> {
        let mut tool = self.get_tool(tool_id).await?;

        if !matches!(
            tool.approval_status,
            ApprovalStatus::Draft | ApprovalStatus::Rejected
        ) {
            return Err(AppError::invalid_state(format!(
                "Tool must be in 'draft' or 'rejected' status to request publish. Current status: {}",
                tool.approval_status
            )));
        }

        tool.approval_requested_at = Some(Utc::now());
        tool.publish_notes = notes;
        tool.rejection_reason = None;
        if tool.created_by.is_none() {
            tool.created_by = requested_by.clone();
        }

        let approval_mode = settings
            .get_value_or(settings_keys::TOOL_APPROVAL_MODE, "require_approval")
            .await
            .map_err(internal)?;

        if approval_mode == "auto_approve" {
            tool.approval_status = ApprovalStatus::Approved;
            tool.approved_at = Some(Utc::now());
            tool.approved_by = Some("auto_approve".into());
            tracing::info!(tool = %tool.name, "tool auto-approved");
        } else {
            tool.approval_status = ApprovalStatus::PendingReview;
            tracing::info!(tool = %tool.name, requested_by = ?requested_by, "publish requested");
        }

        self.database
            .update_tool_approval(&tool)
            .await
            .map_err(internal)?;
        Ok(tool)
    }

    /// `pending_review → approved`.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState`, or a database error.
    pub async fn approve_tool(&self, tool_id: Uuid, approved_by: &str) -> Result<Tool, AppError> {
        let mut tool = self.get_tool(tool_id).await?;
        self.require_status(&tool, ApprovalStatus::PendingReview, "approve")?;

        tool.approval_status = ApprovalStatus::Approved;
        tool.approved_at = Some(Utc::now());
        tool.approved_by = Some(approved_by.to_string());
        tool.rejection_reason = None;

        self.database
            .update_tool_approval(&tool)
            .await
            .map_err(internal)?;
        tracing::info!(tool = %tool.name, approved_by, "tool approved");
        Ok(tool)
    }

    /// `pending_review → rejected`, reason required.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState`, or a database error.
    pub async fn reject_tool(
        &self,
        tool_id: Uuid,
        rejected_by: &str,
        reason: &str,
    ) -> Result<Tool, AppError> {
        let mut tool = self.get_tool(tool_id).await?;
        self.require_status(&tool, ApprovalStatus::PendingReview, "reject")?;

        tool.approval_status = ApprovalStatus::Rejected;
        tool.approved_at = None;
        tool.approved_by = None;
        tool.rejection_reason = Some(reason.to_string());

        self.database
            .update_tool_approval(&tool)
            .await
            .map_err(internal)?;
        tracing::info!(tool = %tool.name, rejected_by, reason, "tool rejected");
        Ok(tool)
    }

    /// `approved → pending_review`; the tool drops out of the gateway's
    /// exposed set on the next registration.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState`, or a database error.
    pub async fn revoke_tool_approval(
        &self,
        tool_id: Uuid,
        revoked_by: &str,
    ) -> Result<Tool, AppError> {
        let mut tool = self.get_tool(tool_id).await?;
        self.require_status(&tool, ApprovalStatus::Approved, "revoke")?;

        tool.approval_status = ApprovalStatus::PendingReview;
        tool.approved_at = None;
        tool.approved_by = None;

        self.database
            .update_tool_approval(&tool)
            .await
            .map_err(internal)?;
        tracing::info!(tool = %tool.name, revoked_by, "tool approval revoked");
        Ok(tool)
    }

    // =====================================================================
    // Module requests
    // =====================================================================

    /// Create a pending module request. Relies on the partial unique index
    /// to reject duplicates race-safely.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown tool, `AlreadyPending` on the constraint
    /// violation, or a database error.
    pub async fn create_module_request(
        &self,
        tool_id: Uuid,
        module_name: &str,
        justification: &str,
        requested_by: Option<String>,
    ) -> Result<ModuleRequest, AppError> {
        let tool = self.get_tool(tool_id).await?;

        let request = ModuleRequest {
            id: Uuid::new_v4(),
            tool_id,
            module_name: module_name.to_string(),
            justification: justification.to_string(),
            requested_by,
            status: RequestStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            rejection_reason: None,
            created_at: Utc::now(),
        };

        match self.database.insert_module_request(&request).await {
            Ok(()) => {
                tracing::info!(module = module_name, tool = %tool.name, "module request created");
                Ok(request)
            }
            Err(err) if is_unique_violation(&err) => Err(AppError::already_pending(format!(
                "A pending request for module '{module_name}' already exists for this tool"
            ))),
            Err(err) => Err(internal(err)),
        }
    }

    /// Approve a module request: mark reviewed, add the module to the
    /// global allowlist, and best-effort install the package in the
    /// sandbox (failure logs, never blocks the approval).
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState`, or a database error.
    pub async fn approve_module_request(
        &self,
        config: &GlobalConfigService,
        sandbox: &SandboxClient,
        request_id: Uuid,
        approved_by: &str,
    ) -> Result<ModuleRequest, AppError> {
        let mut request = self.get_module_request(request_id).await?;
        self.require_request_status(request.status, RequestStatus::Pending)?;

        request.status = RequestStatus::Approved;
        request.reviewed_at = Some(Utc::now());
        request.reviewed_by = Some(approved_by.to_string());

        config
            .add_module(&request.module_name)
            .await
            .map_err(internal)?;
        self.database
            .update_module_request(&request)
            .await
            .map_err(internal)?;

        tracing::info!(module = %request.module_name, approved_by, "module request approved");

        let install = sandbox.install_package(&request.module_name, None).await;
        match install.get("status").and_then(Value::as_str) {
            Some("installed") => tracing::info!(
                module = %request.module_name,
                version = ?install.get("version"),
                "package installed"
            ),
            Some("not_required") => {
                tracing::info!(module = %request.module_name, "stdlib module, no install needed");
            }
            other => tracing::warn!(
                module = %request.module_name,
                status = ?other,
                error = ?install.get("error_message"),
                "package installation did not complete"
            ),
        }

        Ok(request)
    }

    /// Reject a module request with a reason.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState`, or a database error.
    pub async fn reject_module_request(
        &self,
        request_id: Uuid,
        rejected_by: &str,
        reason: &str,
    ) -> Result<ModuleRequest, AppError> {
        let mut request = self.get_module_request(request_id).await?;
        self.require_request_status(request.status, RequestStatus::Pending)?;

        request.status = RequestStatus::Rejected;
        request.reviewed_at = Some(Utc::now());
        request.reviewed_by = Some(rejected_by.to_string());
        request.rejection_reason = Some(reason.to_string());

        self.database
            .update_module_request(&request)
            .await
            .map_err(internal)?;
        tracing::info!(module = %request.module_name, rejected_by, "module request rejected");
        Ok(request)
    }

    /// `approved → pending`; the module leaves the global allowlist.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState`, or a database error.
    pub async fn revoke_module_request(
        &self,
        config: &GlobalConfigService,
        request_id: Uuid,
        revoked_by: &str,
    ) -> Result<ModuleRequest, AppError> {
        let mut request = self.get_module_request(request_id).await?;
        self.require_request_status(request.status, RequestStatus::Approved)?;

        request.status = RequestStatus::Pending;
        request.reviewed_at = None;
        request.reviewed_by = None;
        request.rejection_reason = None;

        config
            .remove_module(&request.module_name)
            .await
            .map_err(internal)?;
        self.database
            .update_module_request(&request)
            .await
            .map_err(internal)?;
        tracing::info!(module = %request.module_name, revoked_by, "module request revoked");
        Ok(request)
    }

    // =====================================================================
    // Network access requests
    // =====================================================================

    /// Create a pending network-access request; duplicates per
    /// `(tool, host, port)` hit the partial unique index.
    ///
    /// # Errors
    ///
    /// `NotFound`, `AlreadyPending`, or a database error.
    pub async fn create_network_request(
        &self,
        tool_id: Uuid,
        host: &str,
        port: Option<i64>,
        justification: &str,
        requested_by: Option<String>,
    ) -> Result<NetworkAccessRequest, AppError> {
        let tool = self.get_tool(tool_id).await?;

        let request = NetworkAccessRequest {
            id: Uuid::new_v4(),
            tool_id,
            host: host.to_string(),
            port,
            justification: justification.to_string(),
            requested_by,
            status: RequestStatus::Pending,
            reviewed_by: None,
            reviewed_at: None,
            rejection_reason: None,
            created_at: Utc::now(),
        };

        match self.database.insert_network_request(&request).await {
            Ok(()) => {
                tracing::info!(host, tool = %tool.name, "network access request created");
                Ok(request)
            }
            Err(err) if is_unique_violation(&err) => {
                let port_str = port.map(|p| format!(":{p}")).unwrap_or_default();
                Err(AppError::already_pending(format!(
                    "A pending request for host '{host}{port_str}' already exists for this tool"
                )))
            }
            Err(err) => Err(internal(err)),
        }
    }

    /// Approve a network request: add the host to the owning server's
    /// allowed hosts and flip an isolated server to allowlist mode.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState`, or a database error.
    pub async fn approve_network_request(
        &self,
        request_id: Uuid,
        approved_by: &str,
    ) -> Result<NetworkAccessRequest, AppError> {
        let mut request = self.get_network_request(request_id).await?;
        self.require_request_status(request.status, RequestStatus::Pending)?;

        let tool = self.get_tool(request.tool_id).await?;
        let server = self
            .database
            .get_server(tool.server_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| AppError::not_found("Owning server not found"))?;

        request.status = RequestStatus::Approved;
        request.reviewed_at = Some(Utc::now());
        request.reviewed_by = Some(approved_by.to_string());

        let mut hosts = server.allowed_hosts.clone();
        if !hosts.iter().any(|h| h == &request.host) {
            hosts.push(request.host.clone());
        }
        self.database
            .update_server_network(server.id, NetworkMode::Allowlist, &hosts)
            .await
            .map_err(internal)?;
        self.database
            .update_network_request(&request)
            .await
            .map_err(internal)?;

        tracing::info!(
            host = %request.host,
            server = %server.name,
            approved_by,
            "network access approved"
        );
        Ok(request)
    }

    /// Reject a network request with a reason.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState`, or a database error.
    pub async fn reject_network_request(
        &self,
        request_id: Uuid,
        rejected_by: &str,
        reason: &str,
    ) -> Result<NetworkAccessRequest, AppError> {
        let mut request = self.get_network_request(request_id).await?;
        self.require_request_status(request.status, RequestStatus::Pending)?;

        request.status = RequestStatus::Rejected;
        request.reviewed_at = Some(Utc::now());
        request.reviewed_by = Some(rejected_by.to_string());
        request.rejection_reason = Some(reason.to_string());

        self.database
            .update_network_request(&request)
            .await
            .map_err(internal)?;
        tracing::info!(host = %request.host, rejected_by, "network access rejected");
        Ok(request)
    }

    /// `approved → pending`; the host leaves the server's allowed list.
    ///
    /// # Errors
    ///
    /// `NotFound`, `InvalidState`, or a database error.
    pub async fn revoke_network_request(
        &self,
        request_id: Uuid,
        revoked_by: &str,
    ) -> Result<NetworkAccessRequest, AppError> {
        let mut request = self.get_network_request(request_id).await?;
        self.require_request_status(request.status, RequestStatus::Approved)?;

        request.status = RequestStatus::Pending;
        request.reviewed_at = None;
        request.reviewed_by = None;
        request.rejection_reason = None;

        let tool = self.get_tool(request.tool_id).await?;
        if let Some(server) = self
            .database
            .get_server(tool.server_id)
            .await
            .map_err(internal)?
        {
            let hosts: Vec<String> = server
                .allowed_hosts
                .iter()
                .filter(|h| **h != request.host)
                .cloned()
                .collect();
            self.database
                .update_server_network(server.id, server.network_mode, &hosts)
                .await
                .map_err(internal)?;
        }

        self.database
            .update_network_request(&request)
            .await
            .map_err(internal)?;
        tracing::info!(host = %request.host, revoked_by, "network access revoked");
        Ok(request)
    }

    // =====================================================================
    // Bulk actions
    // =====================================================================

    /// Approve many tools; failures are reported per item.
    pub async fn bulk_approve_tools(&self, tool_ids: &[Uuid], approved_by: &str) -> BulkOutcome {
        let mut processed = 0;
        let mut failed = Vec::new();
        for &tool_id in tool_ids {
            match self.approve_tool(tool_id, approved_by).await {
                Ok(_) => processed += 1,
                Err(err) => failed.push(serde_json::json!({
                    "id": tool_id.to_string(),
                    "error": err.message,
                })),
            }
        }
        BulkOutcome {
            success: failed.is_empty(),
            processed_count: processed,
            failed,
        }
    }

    /// Reject many tools with one shared reason.
    pub async fn bulk_reject_tools(
        &self,
        tool_ids: &[Uuid],
        rejected_by: &str,
        reason: &str,
    ) -> BulkOutcome {
        let mut processed = 0;
        let mut failed = Vec::new();
        for &tool_id in tool_ids {
            match self.reject_tool(tool_id, rejected_by, reason).await {
                Ok(_) => processed += 1,
                Err(err) => failed.push(serde_json::json!({
                    "id": tool_id.to_string(),
                    "error": err.message,
                })),
            }
        }
        BulkOutcome {
            success: failed.is_empty(),
            processed_count: processed,
            failed,
        }
    }

    /// Approve many module requests; each carries its own allowlist update
    /// and best-effort package install.
    pub async fn bulk_approve_module_requests(
        &self,
        config: &GlobalConfigService,
        sandbox: &SandboxClient,
        request_ids: &[Uuid],
        approved_by: &str,
    ) -> BulkOutcome {
        let mut processed = 0;
        let mut failed = Vec::new();
        for &request_id in request_ids {
            match self
                .approve_module_request(config, sandbox, request_id, approved_by)
                .await
            {
                Ok(_) => processed += 1,
                Err(err) => failed.push(serde_json::json!({
                    "id": request_id.to_string(),
                    "error": err.message,
                })),
            }
        }
        BulkOutcome {
            success: failed.is_empty(),
            processed_count: processed,
            failed,
        }
    }

    /// Reject many module requests with one shared reason.
    pub async fn bulk_reject_module_requests(
        &self,
        request_ids: &[Uuid],
        rejected_by: &str,
        reason: &str,
    ) -> BulkOutcome {
        let mut processed = 0;
        let mut failed = Vec::new();
        for &request_id in request_ids {
            match self
                .reject_module_request(request_id, rejected_by, reason)
                .await
            {
                Ok(_) => processed += 1,
                Err(err) => failed.push(serde_json::json!({
                    "id": request_id.to_string(),
                    "error": err.message,
                })),
            }
        }
        BulkOutcome {
            success: failed.is_empty(),
            processed_count: processed,
            failed,
        }
    }

    /// Approve many network requests; each updates its server's allowlist.
    pub async fn bulk_approve_network_requests(
        &self,
        request_ids: &[Uuid],
        approved_by: &str,
    ) -> BulkOutcome {
        let mut processed = 0;
        let mut failed = Vec::new();
        for &request_id in request_ids {
            match self.approve_network_request(request_id, approved_by).await {
                Ok(_) => processed += 1,
                Err(err) => failed.push(serde_json::json!({
                    "id": request_id.to_string(),
                    "error": err.message,
                })),
            }
        }
        BulkOutcome {
            success: failed.is_empty(),
            processed_count: processed,
            failed,
        }
    }

    /// Reject many network requests with one shared reason.
    pub async fn bulk_reject_network_requests(
        &self,
        request_ids: &[Uuid],
        rejected_by: &str,
        reason: &str,
    ) -> BulkOutcome {
        let mut processed = 0;
        let mut failed = Vec::new();
        for &request_id in request_ids {
            match self
                .reject_network_request(request_id, rejected_by, reason)
                .await
            {
                Ok(_) => processed += 1,
                Err(err) => failed.push(serde_json::json!({
                    "id": request_id.to_string(),
                    "error": err.message,
                })),
            }
        }
        BulkOutcome {
            success: failed.is_empty(),
            processed_count: processed,
            failed,
        }
    }

    // =====================================================================
    // Dashboard
    // =====================================================================

    /// Pending counts, approved totals, and recent review activity.
    ///
    /// # Errors
    ///
    /// Returns an error if any query fails.
    pub async fn get_dashboard_stats(&self) -> Result<DashboardStats, AppError> {
        let pending_tools = self
            .database
            .count_tools_by_approval(ApprovalStatus::PendingReview)
            .await
            .map_err(internal)?;
        let approved_tools = self
            .database
            .count_tools_by_approval(ApprovalStatus::Approved)
            .await
            .map_err(internal)?;
        let (pending_modules, pending_network) = self
            .database
            .count_requests_by_status(RequestStatus::Pending)
            .await
            .map_err(internal)?;
        let (approved_modules, approved_network) = self
            .database
            .count_requests_by_status(RequestStatus::Approved)
            .await
            .map_err(internal)?;

        let seven_days_ago = Utc::now() - Duration::days(7);
        let recently_approved = self
            .database
            .count_tools_approved_since(seven_days_ago)
            .await
            .map_err(internal)?;
        let recently_rejected = self
            .database
            .count_tools_rejected_since(seven_days_ago)
            .await
            .map_err(internal)?;

        Ok(DashboardStats {
            pending_tools,
            pending_module_requests: pending_modules,
            pending_network_requests: pending_network,
            approved_tools,
            approved_module_requests: approved_modules,
            approved_network_requests: approved_network,
            recently_approved,
            recently_rejected,
        })
    }

    // =====================================================================
    // Internals
    // =====================================================================

    async fn get_tool(&self, tool_id: Uuid) -> Result<Tool, AppError> {
        self.database
            .get_tool(tool_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| AppError::not_found(format!("Tool {tool_id} not found")))
    }

    async fn get_module_request(&self, request_id: Uuid) -> Result<ModuleRequest, AppError> {
        self.database
            .get_module_request(request_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| AppError::not_found(format!("Module request {request_id} not found")))
    }

    async fn get_network_request(
        &self,
        request_id: Uuid,
    ) -> Result<NetworkAccessRequest, AppError> {
        self.database
            .get_network_request(request_id)
            .await
            .map_err(internal)?
            .ok_or_else(|| {
                AppError::not_found(format!("Network access request {request_id} not found"))
            })
    }

    fn require_status(
        &self,
        tool: &Tool,
        expected: ApprovalStatus,
        action: &str,
    ) -> Result<(), AppError> {
        if tool.approval_status == expected {
            Ok(())
        } else {
            Err(AppError::invalid_state(format!(
                "Tool must be in '{expected}' status to {action}. Current status: {}",
                tool.approval_status
            )))
        }
    }

    fn require_request_status(
        &self,
        current: RequestStatus,
        expected: RequestStatus,
    ) -> Result<(), AppError> {
        if current == expected {
            Ok(())
        } else {
            Err(AppError::invalid_state(format!(
                "Request must be in '{expected}' status. Current: {current}"
            )))
        }
    }
}

fn internal(err: impl std::fmt::Display) -> AppError {
    tracing::error!(error = %err, "approval service failure");
    AppError::internal()
}

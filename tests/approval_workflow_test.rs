// ABOUTME: Approval state machine tests: tool lifecycle, duplicate-pending constraint, revocation
// ABOUTME: Exercises the integrity-error path for duplicates instead of pre-checking

mod common;

use common::{create_python_tool, create_server, test_resources};
use mcpbox::errors::ErrorCode;
use mcpbox::models::{ApprovalStatus, NetworkMode, RequestStatus};
use mcpbox::services::{ApprovalService, GlobalConfigService, SettingService};

#[tokio::test]
async fn publish_lifecycle_draft_to_approved() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let tool = create_python_tool(&resources.database, &server, "t1").await;

    let approval = ApprovalService::new(resources.database.clone());
    let settings = SettingService::new(resources.database.clone());

    let pending = approval
        .request_publish(&settings, tool.id, Some("please review".into()), None)
        .await
        .unwrap();
    assert_eq!(pending.approval_status, ApprovalStatus::PendingReview);
    assert!(pending.approval_requested_at.is_some());

    let approved = approval
        .approve_tool(tool.id, "admin@example.com")
        .await
        .unwrap();
    assert_eq!(approved.approval_status, ApprovalStatus::Approved);
    assert_eq!(approved.approved_by.as_deref(), Some("admin@example.com"));
    assert!(approved.approved_at.is_some());
}

#[tokio::test]
async fn auto_approve_mode_skips_review() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let tool = create_python_tool(&resources.database, &server, "t1").await;

    let settings = SettingService::new(resources.database.clone());
    settings
        .set_value("tool_approval_mode", "auto_approve", None)
        .await
        .unwrap();

    let approval = ApprovalService::new(resources.database.clone());
    let approved = approval
        .request_publish(&settings, tool.id, None, None)
        .await
        .unwrap();

    assert_eq!(approved.approval_status, ApprovalStatus::Approved);
    assert_eq!(approved.approved_by.as_deref(), Some("auto_approve"));
}

#[tokio::test]
async fn reject_requires_pending_and_records_reason() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let tool = create_python_tool(&resources.database, &server, "t1").await;

    let approval = ApprovalService::new(resources.database.clone());
    let settings = SettingService::new(resources.database.clone());

    // Draft cannot be rejected directly.
    let err = approval
        .reject_tool(tool.id, "admin", "nope")
        .await
        .unwrap_err();
    assert_eq!(err.code, ErrorCode::InvalidState);

    approval
        .request_publish(&settings, tool.id, None, None)
        .await
        .unwrap();
    let rejected = approval
        .reject_tool(tool.id, "admin", "does not meet policy")
        .await
        .unwrap();
    assert_eq!(rejected.approval_status, ApprovalStatus::Rejected);
    assert_eq!(
        rejected.rejection_reason.as_deref(),
        Some("does not meet policy")
    );

    // Rejected tools can re-request publish, clearing the reason.
    let again = approval
        .request_publish(&settings, tool.id, None, None)
        .await
        .unwrap();
    assert_eq!(again.approval_status, ApprovalStatus::PendingReview);
    assert!(again.rejection_reason.is_none());
}

#[tokio::test]
async fn revoke_returns_approved_tool_to_pending() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let tool = create_python_tool(&resources.database, &server, "t1").await;

    let approval = ApprovalService::new(resources.database.clone());
    let settings = SettingService::new(resources.database.clone());
    approval
        .request_publish(&settings, tool.id, None, None)
        .await
        .unwrap();
    approval.approve_tool(tool.id, "admin").await.unwrap();

    let revoked = approval
        .revoke_tool_approval(tool.id, "admin")
        .await
        .unwrap();
    assert_eq!(revoked.approval_status, ApprovalStatus::PendingReview);
    assert!(revoked.approved_at.is_none());
    assert!(revoked.approved_by.is_none());
}

// --- Module requests ---

#[tokio::test]
async fn duplicate_pending_module_request_hits_the_constraint() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let tool = create_python_tool(&resources.database, &server, "t1").await;

    let approval = ApprovalService::new(resources.database.clone());
    approval
        .create_module_request(tool.id, "yaml", "need YAML parsing", None)
        .await
        .unwrap();

    let duplicate = approval
        .create_module_request(tool.id, "yaml", "still need it", None)
        .await
        .unwrap_err();
    assert_eq!(duplicate.code, ErrorCode::AlreadyPending);
    assert!(duplicate.message.contains("already exists"));

    // A different module for the same tool is fine.
    approval
        .create_module_request(tool.id, "lxml", "need XML too", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn approving_module_request_updates_global_allowlist() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let tool = create_python_tool(&resources.database, &server, "t1").await;

    let approval = ApprovalService::new(resources.database.clone());
    let config = GlobalConfigService::new(resources.database.clone());

    let request = approval
        .create_module_request(tool.id, "yaml", "need YAML", None)
        .await
        .unwrap();

    // The sandbox is unreachable in tests; install is best-effort and the
    // approval must survive it.
    let approved = approval
        .approve_module_request(&config, &resources.sandbox, request.id, "admin")
        .await
        .unwrap();
    assert_eq!(approved.status, RequestStatus::Approved);
    assert!(config
        .get_allowed_modules()
        .await
        .unwrap()
        .contains(&"yaml".to_string()));

    // Revoking removes the module and reopens the request.
    let revoked = approval
        .revoke_module_request(&config, request.id, "admin")
        .await
        .unwrap();
    assert_eq!(revoked.status, RequestStatus::Pending);
    assert!(!config
        .get_allowed_modules()
        .await
        .unwrap()
        .contains(&"yaml".to_string()));
}

#[tokio::test]
async fn rejected_module_request_allows_a_new_pending_one() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let tool = create_python_tool(&resources.database, &server, "t1").await;

    let approval = ApprovalService::new(resources.database.clone());
    let request = approval
        .create_module_request(tool.id, "yaml", "first ask", None)
        .await
        .unwrap();
    approval
        .reject_module_request(request.id, "admin", "too broad")
        .await
        .unwrap();

    // The partial index only covers pending rows.
    approval
        .create_module_request(tool.id, "yaml", "second ask", None)
        .await
        .unwrap();
}

// --- Network access requests ---

#[tokio::test]
async fn duplicate_pending_network_request_includes_null_port() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let tool = create_python_tool(&resources.database, &server, "t1").await;

    let approval = ApprovalService::new(resources.database.clone());
    approval
        .create_network_request(tool.id, "api.example.com", None, "need the API", None)
        .await
        .unwrap();

    // COALESCE(port, 0): a second port-less request is a duplicate.
    let duplicate = approval
        .create_network_request(tool.id, "api.example.com", None, "again", None)
        .await
        .unwrap_err();
    assert_eq!(duplicate.code, ErrorCode::AlreadyPending);

    // A concrete port is a different key.
    approval
        .create_network_request(tool.id, "api.example.com", Some(8443), "alt port", None)
        .await
        .unwrap();
}

#[tokio::test]
async fn approving_network_request_updates_server_allowlist() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let tool = create_python_tool(&resources.database, &server, "t1").await;
    assert_eq!(server.network_mode, NetworkMode::Isolated);

    let approval = ApprovalService::new(resources.database.clone());
    let request = approval
        .create_network_request(tool.id, "api.example.com", None, "need it", None)
        .await
        .unwrap();
    approval
        .approve_network_request(request.id, "admin")
        .await
        .unwrap();

    let server = resources
        .database
        .get_server(server.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.network_mode, NetworkMode::Allowlist);
    assert!(server.allowed_hosts.contains(&"api.example.com".to_string()));

    // Revoking removes the host again.
    approval
        .revoke_network_request(request.id, "admin")
        .await
        .unwrap();
    let server = resources
        .database
        .get_server(server.id)
        .await
        .unwrap()
        .unwrap();
    assert!(!server.allowed_hosts.contains(&"api.example.com".to_string()));
}

// --- Dashboard & bulk ---

#[tokio::test]
async fn dashboard_counts_pending_work() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let t1 = create_python_tool(&resources.database, &server, "t1").await;
    let t2 = create_python_tool(&resources.database, &server, "t2").await;

    let approval = ApprovalService::new(resources.database.clone());
    let settings = SettingService::new(resources.database.clone());

    approval
        .request_publish(&settings, t1.id, None, None)
        .await
        .unwrap();
    approval
        .request_publish(&settings, t2.id, None, None)
        .await
        .unwrap();
    approval.approve_tool(t2.id, "admin").await.unwrap();
    approval
        .create_module_request(t1.id, "yaml", "need it", None)
        .await
        .unwrap();
    approval
        .create_network_request(t1.id, "api.example.com", None, "need it", None)
        .await
        .unwrap();

    let stats = approval.get_dashboard_stats().await.unwrap();
    assert_eq!(stats.pending_tools, 1);
    assert_eq!(stats.pending_module_requests, 1);
    assert_eq!(stats.pending_network_requests, 1);
    assert_eq!(stats.approved_tools, 1);
    assert_eq!(stats.recently_approved, 1);
}

#[tokio::test]
async fn bulk_module_requests_mirror_single_item_semantics() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let tool = create_python_tool(&resources.database, &server, "t1").await;

    let approval = ApprovalService::new(resources.database.clone());
    let config = GlobalConfigService::new(resources.database.clone());

    let yaml = approval
        .create_module_request(tool.id, "yaml", "need it", None)
        .await
        .unwrap();
    let lxml = approval
        .create_module_request(tool.id, "lxml", "need it too", None)
        .await
        .unwrap();
    // Already reviewed: must fail inside the bulk pass, not abort it.
    approval
        .reject_module_request(lxml.id, "admin", "no")
        .await
        .unwrap();

    let outcome = approval
        .bulk_approve_module_requests(&config, &resources.sandbox, &[yaml.id, lxml.id], "admin")
        .await;
    assert!(!outcome.success);
    assert_eq!(outcome.processed_count, 1);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(
        outcome.failed[0]["id"].as_str().unwrap(),
        lxml.id.to_string()
    );
    // The approved half took its side effect.
    assert!(config
        .get_allowed_modules()
        .await
        .unwrap()
        .contains(&"yaml".to_string()));
}

#[tokio::test]
async fn bulk_network_requests_update_allowlists_per_item() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let tool = create_python_tool(&resources.database, &server, "t1").await;

    let approval = ApprovalService::new(resources.database.clone());
    let first = approval
        .create_network_request(tool.id, "api.example.com", None, "need it", None)
        .await
        .unwrap();
    let second = approval
        .create_network_request(tool.id, "cdn.example.com", Some(443), "need it", None)
        .await
        .unwrap();

    let outcome = approval
        .bulk_approve_network_requests(&[first.id, second.id], "admin")
        .await;
    assert!(outcome.success);
    assert_eq!(outcome.processed_count, 2);

    let server = resources
        .database
        .get_server(server.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(server.network_mode, NetworkMode::Allowlist);
    assert!(server.allowed_hosts.contains(&"api.example.com".to_string()));
    assert!(server.allowed_hosts.contains(&"cdn.example.com".to_string()));

    // Bulk reject on already-approved requests reports every failure.
    let rejected = approval
        .bulk_reject_network_requests(&[first.id, second.id], "admin", "changed my mind")
        .await;
    assert!(!rejected.success);
    assert_eq!(rejected.processed_count, 0);
    assert_eq!(rejected.failed.len(), 2);
}

#[tokio::test]
async fn bulk_approve_reports_per_item_failures() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let pending = create_python_tool(&resources.database, &server, "pending").await;
    let draft = create_python_tool(&resources.database, &server, "draft").await;

    let approval = ApprovalService::new(resources.database.clone());
    let settings = SettingService::new(resources.database.clone());
    approval
        .request_publish(&settings, pending.id, None, None)
        .await
        .unwrap();

    // draft was never submitted, so bulk approval fails for it alone.
    let outcome = approval
        .bulk_approve_tools(&[pending.id, draft.id], "admin")
        .await;
    assert!(!outcome.success);
    assert_eq!(outcome.processed_count, 1);
    assert_eq!(outcome.failed.len(), 1);
    assert_eq!(
        outcome.failed[0]["id"].as_str().unwrap(),
        draft.id.to_string()
    );
}

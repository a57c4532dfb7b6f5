// ABOUTME: Tool service tests: version counting, change summaries, rollback, approval reset
// ABOUTME: The safety invariant: edited or rolled-back code is never still approved

mod common;

use common::{create_python_tool, create_server, SAMPLE_CODE_V1, SAMPLE_CODE_V2};
use mcpbox::database::Database;
use mcpbox::models::{ApprovalStatus, ChangeSource, ToolType};
use mcpbox::services::tool::{ToolCreate, ToolUpdate};
use mcpbox::services::ToolService;

async fn setup() -> (Database, ToolService, mcpbox::models::Server) {
    let database = Database::in_memory().await.expect("db");
    let service = ToolService::new(database.clone());
    let server = create_server(&database, "test_server").await;
    (database, service, server)
}

#[tokio::test]
async fn create_writes_initial_version() {
    let (database, _service, server) = setup().await;
    let tool = create_python_tool(&database, &server, "hello").await;

    assert_eq!(tool.current_version, 1);
    assert_eq!(tool.approval_status, ApprovalStatus::Draft);

    let (versions, total) = database.list_tool_versions(tool.id, 10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(versions[0].version_number, 1);
    assert_eq!(versions[0].change_source, ChangeSource::Manual);
    assert_eq!(versions[0].python_code.as_deref(), Some(SAMPLE_CODE_V1));
}

#[tokio::test]
async fn create_derives_schema_and_dependencies() {
    let (_database, service, server) = setup().await;
    let tool = service
        .create(
            server.id,
            ToolCreate {
                name: "weather".into(),
                description: None,
                python_code: Some(
                    "import json\nimport httpx\n\nasync def main(city: str, days: int = 3):\n    return city\n"
                        .into(),
                ),
                tool_type: ToolType::PythonCode,
                external_source_id: None,
                external_tool_name: None,
                input_schema: None,
                timeout_ms: None,
                created_by: None,
                change_source: ChangeSource::Llm,
            },
        )
        .await
        .unwrap();

    let schema = tool.input_schema.unwrap();
    assert_eq!(schema["properties"]["city"]["type"], "string");
    assert_eq!(schema["properties"]["days"]["type"], "integer");
    assert_eq!(schema["required"], serde_json::json!(["city"]));
    assert_eq!(tool.code_dependencies, vec!["httpx", "json"]);
}

#[tokio::test]
async fn update_description_bumps_version_with_summary() {
    let (database, service, server) = setup().await;
    let tool = create_python_tool(&database, &server, "hello").await;

    let updated = service
        .update(
            tool.id,
            ToolUpdate {
                description: Some("new description".into()),
                ..ToolUpdate::default()
            },
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.current_version, 2);
    assert_eq!(updated.description.as_deref(), Some("new description"));

    let (versions, total) = database.list_tool_versions(tool.id, 10, 0).await.unwrap();
    assert_eq!(total, 2);
    assert_eq!(
        versions[0].change_summary.as_deref(),
        Some("Updated description")
    );
}

#[tokio::test]
async fn update_with_identical_values_skips_versioning() {
    let (database, service, server) = setup().await;
    let tool = create_python_tool(&database, &server, "hello").await;

    let unchanged = service
        .update(
            tool.id,
            ToolUpdate {
                description: Some("test tool".into()),
                python_code: Some(SAMPLE_CODE_V1.into()),
                ..ToolUpdate::default()
            },
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(unchanged.current_version, 1);
    let (_versions, total) = database.list_tool_versions(tool.id, 10, 0).await.unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn version_count_matches_current_version() {
    let (database, service, server) = setup().await;
    let tool = create_python_tool(&database, &server, "hello").await;

    for i in 0..3 {
        service
            .update(
                tool.id,
                ToolUpdate {
                    description: Some(format!("edit {i}")),
                    ..ToolUpdate::default()
                },
            )
            .await
            .unwrap();
    }

    let current = database.get_tool(tool.id).await.unwrap().unwrap();
    let (_versions, total) = database.list_tool_versions(tool.id, 50, 0).await.unwrap();
    assert_eq!(current.current_version, 4);
    assert_eq!(total, 4);
}

#[tokio::test]
async fn update_nonexistent_tool_returns_none() {
    let (_database, service, _server) = setup().await;
    let missing = service
        .update(uuid::Uuid::new_v4(), ToolUpdate::default())
        .await
        .unwrap();
    assert!(missing.is_none());
}

// --- Approval safety coupling ---

#[tokio::test]
async fn code_change_resets_approved_tool_to_pending() {
    let (database, service, server) = setup().await;
    let mut tool = create_python_tool(&database, &server, "hello").await;

    // Simulate the admin approving the tool.
    tool.approval_status = ApprovalStatus::Approved;
    tool.approved_at = Some(chrono::Utc::now());
    tool.approved_by = Some("admin@example.com".into());
    database.update_tool_approval(&tool).await.unwrap();

    let updated = service
        .update(
            tool.id,
            ToolUpdate {
                python_code: Some(SAMPLE_CODE_V2.into()),
                ..ToolUpdate::default()
            },
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.approval_status, ApprovalStatus::PendingReview);
    assert!(updated.approved_at.is_none());
    assert!(updated.approved_by.is_none());
    assert_eq!(updated.current_version, 2);

    let (versions, _) = database.list_tool_versions(tool.id, 10, 0).await.unwrap();
    assert!(versions[0]
        .change_summary
        .as_deref()
        .unwrap()
        .contains("python_code"));
}

#[tokio::test]
async fn non_code_update_preserves_approval() {
    let (database, service, server) = setup().await;
    let mut tool = create_python_tool(&database, &server, "hello").await;

    tool.approval_status = ApprovalStatus::Approved;
    database.update_tool_approval(&tool).await.unwrap();

    let updated = service
        .update(
            tool.id,
            ToolUpdate {
                description: Some("cosmetic change".into()),
                ..ToolUpdate::default()
            },
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.approval_status, ApprovalStatus::Approved);
}

#[tokio::test]
async fn identical_code_update_preserves_approval() {
    let (database, service, server) = setup().await;
    let mut tool = create_python_tool(&database, &server, "hello").await;

    tool.approval_status = ApprovalStatus::Approved;
    database.update_tool_approval(&tool).await.unwrap();

    let updated = service
        .update(
            tool.id,
            ToolUpdate {
                python_code: Some(SAMPLE_CODE_V1.into()),
                ..ToolUpdate::default()
            },
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(updated.approval_status, ApprovalStatus::Approved);
    assert_eq!(updated.current_version, 1);
}

// --- Rollback ---

#[tokio::test]
async fn rollback_restores_content_and_resets_approval() {
    let (database, service, server) = setup().await;
    let mut tool = create_python_tool(&database, &server, "hello").await;

    service
        .update(
            tool.id,
            ToolUpdate {
                description: Some("second revision".into()),
                python_code: Some(SAMPLE_CODE_V2.into()),
                ..ToolUpdate::default()
            },
        )
        .await
        .unwrap();

    // Approve the edited state before rolling back.
    tool = database.get_tool(tool.id).await.unwrap().unwrap();
    tool.approval_status = ApprovalStatus::Approved;
    database.update_tool_approval(&tool).await.unwrap();

    let rolled = service.rollback(tool.id, 1).await.unwrap().unwrap();

    assert_eq!(rolled.current_version, 3);
    assert_eq!(rolled.python_code.as_deref(), Some(SAMPLE_CODE_V1));
    assert_eq!(rolled.description.as_deref(), Some("test tool"));
    assert_eq!(rolled.approval_status, ApprovalStatus::PendingReview);

    let (versions, _) = database.list_tool_versions(tool.id, 10, 0).await.unwrap();
    assert_eq!(versions[0].change_source, ChangeSource::Rollback);
    assert_eq!(
        versions[0].change_summary.as_deref(),
        Some("Rolled back to version 1")
    );
}

#[tokio::test]
async fn rollback_to_missing_version_returns_none() {
    let (database, service, server) = setup().await;
    let tool = create_python_tool(&database, &server, "hello").await;

    assert!(service.rollback(tool.id, 99).await.unwrap().is_none());
    assert!(service
        .rollback(uuid::Uuid::new_v4(), 1)
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn compare_versions_reports_changed_fields() {
    let (database, service, server) = setup().await;
    let tool = create_python_tool(&database, &server, "hello").await;

    service
        .update(
            tool.id,
            ToolUpdate {
                python_code: Some(SAMPLE_CODE_V2.into()),
                ..ToolUpdate::default()
            },
        )
        .await
        .unwrap();

    let diffs = service.compare_versions(tool.id, 1, 2).await.unwrap().unwrap();
    assert_eq!(diffs.len(), 1);
    assert_eq!(diffs[0].field, "python_code");

    let identical = service.compare_versions(tool.id, 1, 1).await.unwrap().unwrap();
    assert!(identical.is_empty());
}

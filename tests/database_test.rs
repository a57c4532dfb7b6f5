// ABOUTME: Database-level tests: file-backed creation, cascade rules, approved-name query
// ABOUTME: Deleting a server removes its tools and secrets but preserves activity history

mod common;

use common::{create_python_tool, create_server};
use mcpbox::activity::{ActivityLogger, LogParams};
use mcpbox::database::activity_logs::ActivityLogFilter;
use mcpbox::database::Database;
use mcpbox::models::{ApprovalStatus, LogType};

#[tokio::test]
async fn creates_the_database_file_on_first_connect() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("mcpbox.db");
    let url = format!("sqlite:{}", path.display());

    let database = Database::new(&url).await.expect("file-backed db");
    assert!(path.exists());

    // Schema is usable immediately.
    let server = create_server(&database, "srv").await;
    assert_eq!(server.name, "srv");
}

#[tokio::test]
async fn deleting_a_server_cascades_to_tools_and_secrets() {
    let database = Database::in_memory().await.unwrap();
    let server = create_server(&database, "srv").await;
    let tool = create_python_tool(&database, &server, "t1").await;
    database
        .insert_secret(server.id, "API_KEY", None, None)
        .await
        .unwrap();

    assert!(database.delete_server(server.id).await.unwrap());

    assert!(database.get_tool(tool.id).await.unwrap().is_none());
    let (versions, total) = database.list_tool_versions(tool.id, 10, 0).await.unwrap();
    assert!(versions.is_empty());
    assert_eq!(total, 0);
    assert!(database.list_secrets(server.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn deleting_a_tool_cascades_to_versions_and_requests() {
    let database = Database::in_memory().await.unwrap();
    let server = create_server(&database, "srv").await;
    let tool = create_python_tool(&database, &server, "t1").await;

    let request = mcpbox::models::ModuleRequest {
        id: uuid::Uuid::new_v4(),
        tool_id: tool.id,
        module_name: "yaml".into(),
        justification: "needed".into(),
        requested_by: None,
        status: mcpbox::models::RequestStatus::Pending,
        reviewed_by: None,
        reviewed_at: None,
        rejection_reason: None,
        created_at: chrono::Utc::now(),
    };
    database.insert_module_request(&request).await.unwrap();

    assert!(database.delete_tool(tool.id).await.unwrap());
    let (_versions, total) = database.list_tool_versions(tool.id, 10, 0).await.unwrap();
    assert_eq!(total, 0);
    assert!(database
        .module_requests_for_tool(tool.id)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn activity_logs_survive_server_deletion_with_null_server_id() {
    let database = Database::in_memory().await.unwrap();
    let logger = ActivityLogger::new(database.clone());
    let server = create_server(&database, "srv").await;

    logger
        .log(
            LogType::System,
            "server event",
            LogParams {
                server_id: Some(server.id),
                ..LogParams::default()
            },
        )
        .await;
    logger.flush_pending().await;

    database.delete_server(server.id).await.unwrap();

    let (items, total) = database
        .list_activity_logs(&ActivityLogFilter::default(), 10, 0)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(items[0].message, "server event");
    assert!(items[0].server_id.is_none());
}

#[tokio::test]
async fn approved_tool_names_use_the_sandbox_naming_scheme() {
    let database = Database::in_memory().await.unwrap();
    let server = create_server(&database, "weather").await;
    let mut approved = create_python_tool(&database, &server, "forecast").await;
    let _draft = create_python_tool(&database, &server, "draft_tool").await;
    let mut disabled = create_python_tool(&database, &server, "disabled_tool").await;

    approved.approval_status = ApprovalStatus::Approved;
    database.update_tool_approval(&approved).await.unwrap();

    disabled.approval_status = ApprovalStatus::Approved;
    database.update_tool_approval(&disabled).await.unwrap();
    database.set_tool_enabled(disabled.id, false).await.unwrap();

    let names = database.approved_tool_names().await.unwrap();
    assert!(names.contains("weather__forecast"));
    assert!(!names.contains("weather__draft_tool"));
    assert!(!names.contains("weather__disabled_tool"));
    assert_eq!(names.len(), 1);
}

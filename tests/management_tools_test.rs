// ABOUTME: Management dispatcher tests: CRUD semantics, validation, secrets, unknown tools
// ABOUTME: Drives the dispatcher directly with JSON arguments, the way the gateway does

mod common;

use common::{create_python_tool, create_server, test_resources, SAMPLE_CODE_V2};
use mcpbox::mcp::management::{management_tools, ManagementService};
use mcpbox::models::ApprovalStatus;
use serde_json::{json, Value};

#[tokio::test]
async fn unknown_tool_is_reported() {
    let resources = test_resources().await;
    let service = ManagementService::new(&resources);

    let result = service.execute_tool("mcpbox_frobnicate", &json!({})).await;
    assert_eq!(
        result["error"].as_str().unwrap(),
        "Unknown tool: mcpbox_frobnicate"
    );
}

#[tokio::test]
async fn create_and_list_servers() {
    let resources = test_resources().await;
    let service = ManagementService::new(&resources);

    let empty = service.execute_tool("mcpbox_list_servers", &json!({})).await;
    assert_eq!(empty["total"], json!(0));
    assert_eq!(empty["servers"], json!([]));

    let created = service
        .execute_tool(
            "mcpbox_create_server",
            &json!({"name": "weather_api", "description": "Weather tools"}),
        )
        .await;
    assert_eq!(created["success"], json!(true));

    let listed = service.execute_tool("mcpbox_list_servers", &json!({})).await;
    assert_eq!(listed["total"], json!(1));
    assert_eq!(listed["servers"][0]["name"], json!("weather_api"));
    assert_eq!(listed["servers"][0]["status"], json!("ready"));
}

#[tokio::test]
async fn server_name_format_is_enforced() {
    let resources = test_resources().await;
    let service = ManagementService::new(&resources);

    for bad in ["Weather", "9tools", "has-dash", ""] {
        let result = service
            .execute_tool("mcpbox_create_server", &json!({"name": bad}))
            .await;
        assert!(result.get("error").is_some(), "{bad:?} should be rejected");
    }
}

#[tokio::test]
async fn create_tool_validates_code_and_starts_as_draft() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let service = ManagementService::new(&resources);

    let missing_main = service
        .execute_tool(
            "mcpbox_create_tool",
            &json!({
                "server_id": server.id.to_string(),
                "name": "broken",
                "python_code": "def main():\n    return 1\n",
            }),
        )
        .await;
    assert!(missing_main["error"]
        .as_str()
        .unwrap()
        .contains("async def main"));

    let created = service
        .execute_tool(
            "mcpbox_create_tool",
            &json!({
                "server_id": server.id.to_string(),
                "name": "get_weather",
                "description": "Fetch weather",
                "python_code": "async def main(city: str):\n    return city\n",
            }),
        )
        .await;
    assert_eq!(created["success"], json!(true));

    let tool_id = created["id"].as_str().unwrap();
    let detail = service
        .execute_tool("mcpbox_get_tool", &json!({"tool_id": tool_id}))
        .await;
    assert_eq!(detail["approval_status"], json!("draft"));
    assert_eq!(detail["current_version"], json!(1));
    assert_eq!(
        detail["input_schema"]["properties"]["city"]["type"],
        json!("string")
    );
}

#[tokio::test]
async fn update_tool_code_resets_approval_and_bumps_version() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let mut tool = create_python_tool(&resources.database, &server, "get_weather").await;

    tool.approval_status = ApprovalStatus::Approved;
    resources.database.update_tool_approval(&tool).await.unwrap();

    let service = ManagementService::new(&resources);
    let updated = service
        .execute_tool(
            "mcpbox_update_tool",
            &json!({
                "tool_id": tool.id.to_string(),
                "python_code": SAMPLE_CODE_V2,
            }),
        )
        .await;

    assert_eq!(updated["success"], json!(true));
    assert_eq!(updated["approval_status"], json!("pending_review"));
    assert_eq!(updated["current_version"], json!(2));
}

#[tokio::test]
async fn update_without_fields_is_an_error() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let tool = create_python_tool(&resources.database, &server, "t").await;

    let service = ManagementService::new(&resources);
    let result = service
        .execute_tool("mcpbox_update_tool", &json!({"tool_id": tool.id.to_string()}))
        .await;
    assert_eq!(result["error"], json!("No fields to update"));
}

#[tokio::test]
async fn validate_code_returns_schema_for_valid_main() {
    let resources = test_resources().await;
    let service = ManagementService::new(&resources);

    let result = service
        .execute_tool(
            "mcpbox_validate_code",
            &json!({"code": "async def main(q: str, limit: int = 5):\n    return q\n"}),
        )
        .await;

    assert_eq!(result["valid"], json!(true));
    assert_eq!(result["has_main"], json!(true));
    assert_eq!(result["parameters"], json!(["q", "limit"]));
    assert_eq!(result["input_schema"]["required"], json!(["q"]));
}

#[tokio::test]
async fn start_server_requires_approved_and_enabled_tools() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let service = ManagementService::new(&resources);

    // No tools at all: distinct message.
    let no_tools = service
        .execute_tool(
            "mcpbox_start_server",
            &json!({"server_id": server.id.to_string()}),
        )
        .await;
    assert!(no_tools["error"].as_str().unwrap().contains("no tools"));

    // A draft tool does not count as startable.
    create_python_tool(&resources.database, &server, "draft_tool").await;
    let unapproved = service
        .execute_tool(
            "mcpbox_start_server",
            &json!({"server_id": server.id.to_string()}),
        )
        .await;
    assert!(unapproved["error"]
        .as_str()
        .unwrap()
        .contains("no approved and enabled tools"));
}

#[tokio::test]
async fn test_code_is_blocked_for_unapproved_tools() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let tool = create_python_tool(&resources.database, &server, "t").await;

    let service = ManagementService::new(&resources);
    let blocked = service
        .execute_tool("mcpbox_test_code", &json!({"tool_id": tool.id.to_string()}))
        .await;

    let error = blocked["error"].as_str().unwrap();
    assert!(error.contains("cannot be tested until it is approved"));
    assert!(error.contains("draft"));
}

#[tokio::test]
async fn secret_placeholders_never_carry_values() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let service = ManagementService::new(&resources);

    let created = service
        .execute_tool(
            "mcpbox_create_server_secret",
            &json!({
                "server_id": server.id.to_string(),
                "key": "WEATHER_API_KEY",
                "description": "API key for the weather provider",
            }),
        )
        .await;
    assert_eq!(created["success"], json!(true));
    assert_eq!(created["has_value"], json!(false));

    let duplicate = service
        .execute_tool(
            "mcpbox_create_server_secret",
            &json!({"server_id": server.id.to_string(), "key": "WEATHER_API_KEY"}),
        )
        .await;
    assert!(duplicate["error"].as_str().unwrap().contains("already exists"));

    let listed = service
        .execute_tool(
            "mcpbox_list_server_secrets",
            &json!({"server_id": server.id.to_string()}),
        )
        .await;
    assert_eq!(listed["total"], json!(1));
    assert_eq!(listed["secrets"][0]["key"], json!("WEATHER_API_KEY"));
    assert_eq!(listed["secrets"][0]["has_value"], json!(false));
    // The listing shape has no value field at all.
    assert!(listed["secrets"][0].get("value").is_none());
}

#[tokio::test]
async fn rollback_via_dispatcher_reports_new_version() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let tool = create_python_tool(&resources.database, &server, "t").await;

    let service = ManagementService::new(&resources);
    service
        .execute_tool(
            "mcpbox_update_tool",
            &json!({"tool_id": tool.id.to_string(), "python_code": SAMPLE_CODE_V2}),
        )
        .await;

    let rolled = service
        .execute_tool(
            "mcpbox_rollback_tool",
            &json!({"tool_id": tool.id.to_string(), "version": 1}),
        )
        .await;
    assert_eq!(rolled["success"], json!(true));
    assert_eq!(rolled["current_version"], json!(3));
    assert_eq!(rolled["approval_status"], json!("pending_review"));

    let versions = service
        .execute_tool(
            "mcpbox_list_tool_versions",
            &json!({"tool_id": tool.id.to_string()}),
        )
        .await;
    assert_eq!(versions["total_versions"], json!(3));
    assert_eq!(versions["versions"][0]["change_source"], json!("rollback"));
}

#[tokio::test]
async fn pending_requests_overview_groups_all_workflows() {
    let resources = test_resources().await;
    let server = create_server(&resources.database, "srv").await;
    let tool = create_python_tool(&resources.database, &server, "t").await;
    let service = ManagementService::new(&resources);

    service
        .execute_tool(
            "mcpbox_request_publish",
            &json!({"tool_id": tool.id.to_string(), "notes": "ready"}),
        )
        .await;
    service
        .execute_tool(
            "mcpbox_request_module",
            &json!({
                "tool_id": tool.id.to_string(),
                "module_name": "yaml",
                "justification": "parse configs",
            }),
        )
        .await;
    service
        .execute_tool(
            "mcpbox_request_network_access",
            &json!({
                "tool_id": tool.id.to_string(),
                "host": "api.example.com",
                "justification": "fetch data",
            }),
        )
        .await;

    let overview = service
        .execute_tool("mcpbox_list_pending_requests", &json!({}))
        .await;
    assert_eq!(overview["summary"]["tools"], json!(1));
    assert_eq!(overview["summary"]["modules"], json!(1));
    assert_eq!(overview["summary"]["network"], json!(1));
    assert_eq!(overview["summary"]["total"], json!(3));
    assert_eq!(
        overview["pending_module_requests"][0]["module_name"],
        json!("yaml")
    );
    assert_eq!(
        overview["pending_network_requests"][0]["host"],
        json!("api.example.com")
    );
}

#[tokio::test]
async fn catalog_names_match_dispatcher() {
    let resources = test_resources().await;
    let service = ManagementService::new(&resources);

    // Every cataloged tool must dispatch somewhere: probing each with empty
    // args must never produce the "Unknown tool" error.
    for tool in management_tools() {
        let name = tool["name"].as_str().unwrap();
        let result = service.execute_tool(name, &json!({})).await;
        if let Some(error) = result.get("error").and_then(Value::as_str) {
            assert!(
                !error.starts_with("Unknown tool"),
                "{name} is cataloged but not dispatched"
            );
        }
    }
}

// ABOUTME: Activity logger tests: batching, requeue-on-failure, ring buffer, stats, retention
// ABOUTME: DB failure is simulated by dropping the table; re-migration lets the retry succeed

mod common;

use mcpbox::activity::{ActivityLogger, LogParams};
use mcpbox::database::activity_logs::ActivityLogFilter;
use mcpbox::database::Database;
use mcpbox::models::{LogLevel, LogType};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

async fn setup() -> (Database, ActivityLogger) {
    let database = Database::in_memory().await.expect("db");
    let logger = ActivityLogger::new(database.clone());
    (database, logger)
}

#[tokio::test]
async fn log_is_batched_then_persisted() {
    let (database, logger) = setup().await;

    for i in 0..5 {
        logger
            .log(LogType::System, format!("event {i}"), LogParams::default())
            .await;
    }
    assert_eq!(logger.pending_count().await, 5);

    // Wait past the batch interval for the scheduled flush.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(logger.pending_count().await, 0);

    let (items, total) = database
        .list_activity_logs(&ActivityLogFilter::default(), 50, 0)
        .await
        .unwrap();
    assert_eq!(total, 5);
    assert_eq!(items.len(), 5);
}

#[tokio::test]
async fn request_response_share_a_correlation_id() {
    let (database, logger) = setup().await;

    let request_id = logger
        .log_mcp_request(
            "tools/call",
            Some(&json!({"name": "srv__tool", "arguments": {"q": "x"}})),
            None,
        )
        .await;
    assert_eq!(request_id.len(), 8);

    logger
        .log_mcp_response(&request_id, true, 42, Some("tools/call"), None, None)
        .await;
    logger.flush_pending().await;

    let chain = database
        .activity_logs_for_request(&request_id)
        .await
        .unwrap();
    assert_eq!(chain.len(), 2);
    assert_eq!(chain[0].log_type, LogType::McpRequest);
    assert_eq!(chain[1].log_type, LogType::McpResponse);
    assert_eq!(chain[1].duration_ms, Some(42));
}

#[tokio::test]
async fn request_params_are_sanitized_before_logging() {
    let (database, logger) = setup().await;

    let request_id = logger
        .log_mcp_request(
            "tools/call",
            Some(&json!({
                "name": "srv__tool",
                "arguments": {"api_key": "sk-secret", "city": "Berlin"},
            })),
            None,
        )
        .await;
    logger.flush_pending().await;

    let chain = database
        .activity_logs_for_request(&request_id)
        .await
        .unwrap();
    let details = chain[0].details.as_ref().unwrap();
    assert_eq!(
        details["params"]["arguments"]["api_key"],
        json!("[REDACTED]")
    );
    assert_eq!(details["params"]["arguments"]["city"], json!("Berlin"));
    assert_eq!(details["tool_name"], json!("srv__tool"));
}

#[tokio::test]
async fn failed_flush_requeues_and_later_succeeds() {
    let (database, logger) = setup().await;

    logger
        .log(LogType::System, "survives failure", LogParams::default())
        .await;

    // Break the table underneath the logger, then flush: entries must stay
    // queued instead of being lost.
    sqlx::query("DROP TABLE activity_logs")
        .execute(database.pool())
        .await
        .unwrap();
    logger.flush_pending().await;
    assert_eq!(logger.pending_count().await, 1);

    // Restore the schema; the next flush drains the queue.
    database.migrate().await.unwrap();
    logger.flush_pending().await;
    assert_eq!(logger.pending_count().await, 0);

    let (_items, total) = database
        .list_activity_logs(&ActivityLogFilter::default(), 50, 0)
        .await
        .unwrap();
    assert_eq!(total, 1);
}

#[tokio::test]
async fn ring_buffer_returns_most_recent_entries() {
    let (_database, logger) = setup().await;

    for i in 0..10 {
        logger
            .log(LogType::System, format!("entry {i}"), LogParams::default())
            .await;
    }

    let recent = logger.get_recent_logs(3).await;
    assert_eq!(recent.len(), 3);
    assert_eq!(recent[0].message, "entry 7");
    assert_eq!(recent[2].message, "entry 9");
}

#[tokio::test]
async fn listeners_receive_new_entries() {
    let (_database, logger) = setup().await;

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    logger.add_listener(Arc::new(move |entry| {
        let tx = tx.clone();
        Box::pin(async move {
            let _ = tx.send(entry.message);
        })
    }));

    logger
        .log(LogType::Alert, "listener test", LogParams::default())
        .await;

    let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("listener notified")
        .expect("channel open");
    assert_eq!(received, "listener test");
}

#[tokio::test]
async fn stats_aggregate_by_type_and_level() {
    let (database, logger) = setup().await;

    logger
        .log(LogType::McpRequest, "req", LogParams::default())
        .await;
    logger
        .log(
            LogType::McpResponse,
            "resp",
            LogParams {
                duration_ms: Some(100),
                ..LogParams::default()
            },
        )
        .await;
    logger
        .log(
            LogType::Error,
            "boom",
            LogParams {
                level: Some(LogLevel::Error),
                ..LogParams::default()
            },
        )
        .await;
    logger.flush_pending().await;

    let stats = database.activity_log_stats(None, None).await.unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.errors, 1);
    assert!((stats.avg_duration_ms - 100.0).abs() < f64::EPSILON);
    assert_eq!(stats.by_type.get("mcp_request"), Some(&1));
    assert_eq!(stats.by_level.get("error"), Some(&1));
}

#[tokio::test]
async fn time_window_filters_respect_intraday_boundaries() {
    let (database, logger) = setup().await;

    logger
        .log(LogType::System, "before", LogParams::default())
        .await;
    logger.flush_pending().await;

    // Same day, minutes apart: the window must exclude the earlier entry.
    let boundary = chrono::Utc::now();
    tokio::time::sleep(Duration::from_millis(20)).await;
    logger
        .log(LogType::System, "after", LogParams::default())
        .await;
    logger.flush_pending().await;

    let filter = ActivityLogFilter {
        since: Some(boundary),
        ..ActivityLogFilter::default()
    };
    let (items, total) = database.list_activity_logs(&filter, 10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(items[0].message, "after");

    let filter = ActivityLogFilter {
        until: Some(boundary),
        ..ActivityLogFilter::default()
    };
    let (items, total) = database.list_activity_logs(&filter, 10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(items[0].message, "before");

    let stats = database
        .activity_log_stats(None, Some(boundary))
        .await
        .unwrap();
    assert_eq!(stats.total, 1);
}

#[tokio::test]
async fn retention_cleanup_deletes_only_old_rows() {
    let (database, logger) = setup().await;

    logger
        .log(LogType::System, "fresh", LogParams::default())
        .await;
    logger.flush_pending().await;

    // Backdate one row past the retention window.
    sqlx::query("UPDATE activity_logs SET created_at = '2020-01-01 00:00:00+00:00'")
        .execute(database.pool())
        .await
        .unwrap();
    logger
        .log(LogType::System, "recent", LogParams::default())
        .await;
    logger.flush_pending().await;

    let deleted = database.delete_activity_logs_before(7).await.unwrap();
    assert_eq!(deleted, 1);

    let (items, total) = database
        .list_activity_logs(&ActivityLogFilter::default(), 50, 0)
        .await
        .unwrap();
    assert_eq!(total, 1);
    assert_eq!(items[0].message, "recent");
}

#[tokio::test]
async fn alert_wrapper_tags_type_and_level() {
    let (database, logger) = setup().await;

    logger
        .log_alert(
            "error_spike",
            "too many failures",
            None,
            Some(json!({"window": "5m"})),
        )
        .await;
    logger.flush_pending().await;

    let filter = ActivityLogFilter {
        log_type: Some(LogType::Alert),
        ..ActivityLogFilter::default()
    };
    let (items, total) = database.list_activity_logs(&filter, 10, 0).await.unwrap();
    assert_eq!(total, 1);
    assert_eq!(items[0].level, LogLevel::Warning);
    let details = items[0].details.as_ref().unwrap();
    assert_eq!(details["alert_type"], json!("error_spike"));
    assert_eq!(details["window"], json!("5m"));
}

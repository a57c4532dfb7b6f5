// ABOUTME: Activity observability API: filtered log listing, stats, retention, and the live stream
// ABOUTME: The stream endpoint upgrades to WebSocket with per-connection filters and ping/pong

use crate::activity::{StreamConnection, StreamFilters};
use crate::context::ServerResources;
use crate::database::activity_logs::ActivityLogFilter;
use crate::errors::AppError;
use crate::models::{LogLevel, LogType};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Duration, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use uuid::Uuid;

pub fn router(resources: Arc<ServerResources>) -> Router {
    Router::new()
        .route("/activity/logs", get(list_logs).delete(cleanup_logs))
        .route("/activity/logs/:log_id", get(get_log))
        .route("/activity/stats", get(get_stats))
        .route("/activity/recent", get(get_recent))
        .route("/activity/request/:request_id", get(get_request_chain))
        .route("/activity/stream", get(activity_stream))
        .with_state(resources)
}

#[derive(Debug, Deserialize)]
struct LogListQuery {
    server_id: Option<Uuid>,
    log_type: Option<String>,
    level: Option<String>,
    request_id: Option<String>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
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
    50
}

async fn list_logs(
    State(resources): State<Arc<ServerResources>>,
    Query(query): Query<LogListQuery>,
) -> Result<Json<Value>, AppError> {
    let filter = ActivityLogFilter {
        server_id: query.server_id,
        log_type: parse_enum::<LogType>(query.log_type.as_deref(), "log_type")?,
        level: parse_enum::<LogLevel>(query.level.as_deref(), "level")?,
        request_id: query.request_id,
        since: query.since,
        until: query.until,
        search: query.search,
    };

    let page = query.page.max(1);
    let page_size = query.page_size.clamp(1, 200);

    let (items, total) = resources
        .database
        .list_activity_logs(&filter, page_size, (page - 1) * page_size)
        .await
        .map_err(internal)?;

    let pages = if total > 0 {
        (total + page_size - 1) / page_size
    } else {
        0
    };

    Ok(Json(json!({
        "items": items,
        "total": total,
        "page": page,
        "page_size": page_size,
        "pages": pages,
    })))
}

async fn get_log(
    State(resources): State<Arc<ServerResources>>,
    Path(log_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let log = resources
        .database
        .get_activity_log(log_id)
        .await
        .map_err(internal)?
        .ok_or_else(|| AppError::not_found("Activity log not found"))?;
    Ok(Json(serde_json::to_value(log).map_err(internal)?))
}

#[derive(Debug, Deserialize)]
struct StatsQuery {
    server_id: Option<Uuid>,
    #[serde(default = "default_period")]
    period: String,
}

fn default_period() -> String {
    "1h".into()
}

async fn get_stats(
    State(resources): State<Arc<ServerResources>>,
    Query(query): Query<StatsQuery>,
) -> Result<Json<Value>, AppError> {
    let window = match query.period.as_str() {
        "1h" => Duration::hours(1),
        "6h" => Duration::hours(6),
        "24h" => Duration::hours(24),
        "7d" => Duration::days(7),
        other => {
            return Err(AppError::invalid_input(format!(
                "Invalid period '{other}'; expected 1h, 6h, 24h, or 7d"
            )))
        }
    };
    let since = Utc::now() - window;

    let stats = resources
        .activity
        .get_stats(query.server_id, Some(since))
        .await
        .map_err(internal)?;

    let total_minutes = window.num_seconds() as f64 / 60.0;
    let requests_per_minute = if total_minutes > 0.0 {
        (stats.total as f64 / total_minutes * 100.0).round() / 100.0
    } else {
        0.0
    };

    Ok(Json(json!({
        "total": stats.total,
        "errors": stats.errors,
        "avg_duration_ms": stats.avg_duration_ms,
        "by_type": stats.by_type,
        "by_level": stats.by_level,
        "requests_per_minute": requests_per_minute,
    })))
}

#[derive(Debug, Deserialize)]
struct RecentQuery {
    #[serde(default = "default_recent_count")]
    count: usize,
}

const fn default_recent_count() -> usize {
    100
}

async fn get_recent(
    State(resources): State<Arc<ServerResources>>,
    Query(query): Query<RecentQuery>,
) -> Json<Value> {
    let logs = resources
        .activity
        .get_recent_logs(query.count.clamp(1, 1000))
        .await;
    Json(json!({ "logs": logs, "count": logs.len() }))
}

#[derive(Debug, Deserialize)]
struct CleanupQuery {
    #[serde(default = "default_retention")]
    retention_days: i64,
}

const fn default_retention() -> i64 {
    7
}

async fn cleanup_logs(
    State(resources): State<Arc<ServerResources>>,
    Query(query): Query<CleanupQuery>,
) -> Result<Json<Value>, AppError> {
    let retention_days = query.retention_days.clamp(1, 90);
    let deleted = resources
        .activity
        .cleanup_old_logs(retention_days)
        .await
        .map_err(internal)?;
    Ok(Json(json!({
        "deleted_count": deleted,
        "retention_days": retention_days,
    })))
}

async fn get_request_chain(
    State(resources): State<Arc<ServerResources>>,
    Path(request_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let logs = resources
        .database
        .activity_logs_for_request(&request_id)
        .await
        .map_err(internal)?;
    Ok(Json(json!({
        "request_id": request_id,
        "logs": logs,
        "count": logs.len(),
    })))
}

// --- Live stream ---

#[derive(Debug, Deserialize)]
struct StreamQuery {
    server_id: Option<Uuid>,
    /// Comma-separated log types.
    log_types: Option<String>,
    /// Comma-separated levels.
    levels: Option<String>,
}

async fn activity_stream(
    State(resources): State<Arc<ServerResources>>,
    Query(query): Query<StreamQuery>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let filters = StreamFilters {
        server_id: query.server_id,
        log_types: parse_csv::<LogType>(query.log_types.as_deref()),
        levels: parse_csv::<LogLevel>(query.levels.as_deref()),
    };

    upgrade.on_upgrade(move |socket| handle_stream(resources, socket, filters))
}

async fn handle_stream(
    resources: Arc<ServerResources>,
    socket: WebSocket,
    filters: StreamFilters,
) {
    let (connection, mut receiver) = resources.streams.register(filters).await;
    let (mut writer, mut reader) = socket.split();

    let connected = json!({
        "type": "connected",
        "message": "Activity stream connected",
        "filters": filters_json(&connection),
    });
    if writer
        .send(Message::Text(connected.to_string()))
        .await
        .is_err()
    {
        resources.streams.unregister(&connection).await;
        return;
    }

    // Writer and reader run under one select loop; whichever side finishes
    // first ends the connection and the other is dropped with it.
    loop {
        tokio::select! {
            entry = receiver.recv() => {
                let Some(entry) = entry else { break };
                let frame = json!({ "type": "log", "data": entry });
                if writer.send(Message::Text(frame.to_string())).await.is_err() {
                    break;
                }
            }
            inbound = reader.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        if handle_control_message(&connection, &mut writer, &text)
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        tracing::warn!(error = %err, "live stream receive error");
                        break;
                    }
                }
            }
        }
    }

    resources.streams.unregister(&connection).await;
}

async fn handle_control_message(
    connection: &Arc<StreamConnection>,
    writer: &mut futures_util::stream::SplitSink<WebSocket, Message>,
    text: &str,
) -> Result<(), axum::Error> {
    let Ok(message) = serde_json::from_str::<Value>(text) else {
        return Ok(());
    };

    match message.get("type").and_then(Value::as_str) {
        Some("ping") => {
            writer
                .send(Message::Text(json!({ "type": "pong" }).to_string()))
                .await
        }
        Some("filter") => {
            let filters = StreamFilters {
                server_id: message
                    .get("server_id")
                    .and_then(Value::as_str)
                    .and_then(|raw| Uuid::parse_str(raw).ok()),
                log_types: message
                    .get("log_types")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .filter_map(|raw| raw.parse().ok())
                            .collect()
                    }),
                levels: message
                    .get("levels")
                    .and_then(Value::as_array)
                    .map(|items| {
                        items
                            .iter()
                            .filter_map(Value::as_str)
                            .filter_map(|raw| raw.parse().ok())
                            .collect()
                    }),
            };
            connection.set_filters(filters);
            writer
                .send(Message::Text(
                    json!({
                        "type": "filter_updated",
                        "filters": filters_json(connection),
                    })
                    .to_string(),
                ))
                .await
        }
        _ => Ok(()),
    }
}

fn filters_json(connection: &Arc<StreamConnection>) -> Value {
    let filters = connection.current_filters();
    json!({
        "server_id": filters.server_id.map(|id| id.to_string()),
        "log_types": filters.log_types,
        "levels": filters.levels,
    })
}

fn parse_csv<T: std::str::FromStr>(raw: Option<&str>) -> Option<Vec<T>> {
    raw.map(|csv| {
        csv.split(',')
            .filter_map(|part| part.trim().parse().ok())
            .collect()
    })
}

fn parse_enum<T: std::str::FromStr>(
    raw: Option<&str>,
    field: &str,
) -> Result<Option<T>, AppError> {
    raw.map(|value| {
        value
            .parse()
            .map_err(|_| AppError::invalid_input(format!("Invalid {field} '{value}'")))
    })
    .transpose()
}

fn internal(err: impl std::fmt::Display) -> AppError {
    tracing::error!(error = %err, "activity API failure");
    AppError::internal()
}

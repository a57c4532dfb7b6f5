// ABOUTME: Non-blocking activity logging with batched durable writes and live broadcast
// ABOUTME: One flush task in flight at a time; failed batches requeue up to BATCH_SIZE * 10

use crate::constants::{
    BATCH_INTERVAL_MS, BATCH_SIZE, BROADCAST_BUFFER_SIZE, MAX_NOTIFICATION_TASKS,
};
use crate::database::Database;
use crate::models::{ActivityLog, LogLevel, LogType};
use chrono::Utc;
use futures_util::future::BoxFuture;
use serde_json::{json, Map, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Callback invoked for every new log entry (live stream broadcast).
pub type LogListener = Arc<dyn Fn(ActivityLog) -> BoxFuture<'static, ()> + Send + Sync>;

/// Optional fields for [`ActivityLogger::log`].
#[derive(Debug, Clone, Default)]
pub struct LogParams {
    pub server_id: Option<Uuid>,
    pub level: Option<LogLevel>,
    pub details: Option<Value>,
    pub request_id: Option<String>,
    pub duration_ms: Option<i64>,
}

struct BatchState {
    pending: Vec<ActivityLog>,
    flush_scheduled: bool,
    ring: VecDeque<ActivityLog>,
}

struct LoggerInner {
    database: Database,
    batch: Mutex<BatchState>,
    listeners: std::sync::RwLock<Vec<LogListener>>,
    notification_tasks: AtomicUsize,
}

/// Batched, broadcasting activity logger. Cheap to clone.
#[derive(Clone)]
pub struct ActivityLogger {
    inner: Arc<LoggerInner>,
}

impl ActivityLogger {
    #[must_use]
    pub fn new(database: Database) -> Self {
        Self {
            inner: Arc::new(LoggerInner {
                database,
                batch: Mutex::new(BatchState {
                    pending: Vec::new(),
                    flush_scheduled: false,
                    ring: VecDeque::with_capacity(BROADCAST_BUFFER_SIZE),
                }),
                listeners: std::sync::RwLock::new(Vec::new()),
                notification_tasks: AtomicUsize::new(0),
            }),
        }
    }

    /// Register a listener for real-time log events.
    pub fn add_listener(&self, listener: LogListener) {
        if let Ok(mut listeners) = self.inner.listeners.write() {
            listeners.push(listener);
        }
    }

    /// Last `count` entries from the broadcast ring, oldest first.
    pub async fn get_recent_logs(&self, count: usize) -> Vec<ActivityLog> {
        let batch = self.inner.batch.lock().await;
        let skip = batch.ring.len().saturating_sub(count);
        batch.ring.iter().skip(skip).cloned().collect()
    }

    /// Entries waiting for the next flush. Test and shutdown visibility.
    pub async fn pending_count(&self) -> usize {
        self.inner.batch.lock().await.pending.len()
    }

    /// Log an activity event. Appends to the pending batch and the ring
    /// under one mutex, schedules the flush task if none is in flight, and
    /// fans out to listeners without blocking the caller.
    pub async fn log(
        &self,
        log_type: LogType,
        message: impl Into<String>,
        params: LogParams,
    ) -> ActivityLog {
        let entry = ActivityLog {
            id: Uuid::new_v4(),
            server_id: params.server_id,
            log_type,
            level: params.level.unwrap_or(LogLevel::Info),
            message: message.into(),
            details: params.details,
            request_id: params.request_id,
            duration_ms: params.duration_ms,
            created_at: Utc::now(),
        };

        {
            let mut batch = self.inner.batch.lock().await;
            batch.pending.push(entry.clone());
            if batch.ring.len() == BROADCAST_BUFFER_SIZE {
                batch.ring.pop_front();
            }
            batch.ring.push_back(entry.clone());

            // The scheduled flag is only touched under this mutex; at most
            // one flush task exists at any moment.
            if !batch.flush_scheduled {
                batch.flush_scheduled = true;
                let logger = self.clone();
                tokio::spawn(async move {
                    logger.flush_after_interval().await;
                });
            }
        }

        self.notify_listeners(entry.clone());
        entry
    }

    /// Log an MCP request and return the correlation id for the response.
    pub async fn log_mcp_request(
        &self,
        method: &str,
        params: Option<&Value>,
        server_id: Option<Uuid>,
    ) -> String {
        let request_id = Uuid::new_v4().to_string()[..8].to_string();

        let tool_name = if method == "tools/call" {
            params
                .and_then(|p| p.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string)
        } else {
            None
        };

        let message = tool_name
            .as_ref()
            .map_or_else(|| method.to_string(), |tool| format!("{method}: {tool}"));

        let mut details = Map::new();
        details.insert("method".into(), json!(method));
        details.insert(
            "params".into(),
            params.map_or(Value::Null, sanitize_params),
        );
        if let Some(tool) = &tool_name {
            details.insert("tool_name".into(), json!(tool));
        }

        self.log(
            LogType::McpRequest,
            message,
            LogParams {
                server_id,
                details: Some(Value::Object(details)),
                request_id: Some(request_id.clone()),
                ..LogParams::default()
            },
        )
        .await;

        request_id
    }

    /// Log the response half of a correlation pair.
    pub async fn log_mcp_response(
        &self,
        request_id: &str,
        success: bool,
        duration_ms: i64,
        method: Option<&str>,
        error: Option<&str>,
        server_id: Option<Uuid>,
    ) {
        let (mut message, level) = if success {
            (format!("completed in {duration_ms}ms"), LogLevel::Info)
        } else {
            (
                format!(
                    "failed after {duration_ms}ms: {}",
                    error.unwrap_or("unknown error")
                ),
                LogLevel::Error,
            )
        };
        if let Some(method) = method {
            message = format!("{method} {message}");
        }

        let mut details = Map::new();
        details.insert("success".into(), json!(success));
        details.insert("duration_ms".into(), json!(duration_ms));
        if let Some(error) = error {
            details.insert("error".into(), json!(error));
        }
        if let Some(method) = method {
            details.insert("method".into(), json!(method));
        }

        self.log(
            LogType::McpResponse,
            message,
            LogParams {
                server_id,
                level: Some(level),
                details: Some(Value::Object(details)),
                request_id: Some(request_id.to_string()),
                duration_ms: Some(duration_ms),
            },
        )
        .await;
    }

    /// Log an alert event.
    pub async fn log_alert(
        &self,
        alert_type: &str,
        message: impl Into<String>,
        server_id: Option<Uuid>,
        details: Option<Value>,
    ) {
        let mut merged = match details {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        merged.insert("alert_type".into(), json!(alert_type));

        self.log(
            LogType::Alert,
            message,
            LogParams {
                server_id,
                level: Some(LogLevel::Warning),
                details: Some(Value::Object(merged)),
                ..LogParams::default()
            },
        )
        .await;
    }

    /// Log an error event.
    pub async fn log_error(
        &self,
        message: impl Into<String>,
        server_id: Option<Uuid>,
        error: Option<&dyn std::fmt::Display>,
        details: Option<Value>,
    ) {
        let mut merged = match details {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        if let Some(error) = error {
            merged.insert("error_message".into(), json!(error.to_string()));
        }

        self.log(
            LogType::Error,
            message,
            LogParams {
                server_id,
                level: Some(LogLevel::Error),
                details: Some(Value::Object(merged)),
                ..LogParams::default()
            },
        )
        .await;
    }

    /// Drain and persist everything pending right now. Used by tests and by
    /// graceful shutdown; the periodic flush path calls the same logic.
    pub async fn flush_pending(&self) {
        self.flush_once().await;
    }

    /// Bulk-delete entries older than the retention window.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub async fn cleanup_old_logs(&self, retention_days: i64) -> anyhow::Result<u64> {
        let deleted = self
            .inner
            .database
            .delete_activity_logs_before(retention_days)
            .await?;
        if deleted > 0 {
            tracing::info!(deleted, retention_days, "cleaned up old activity logs");
        }
        Ok(deleted)
    }

    /// Aggregate statistics, optionally scoped to a server and time window.
    ///
    /// # Errors
    ///
    /// Returns an error if a query fails.
    pub async fn get_stats(
        &self,
        server_id: Option<Uuid>,
        since: Option<chrono::DateTime<Utc>>,
    ) -> anyhow::Result<crate::database::activity_logs::ActivityStats> {
        self.inner.database.activity_log_stats(server_id, since).await
    }

    fn flush_after_interval(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            tokio::time::sleep(std::time::Duration::from_millis(BATCH_INTERVAL_MS)).await;
            self.flush_once().await;

            // Reset the flag and reschedule inside the mutex so a log() racing
            // with us cannot observe "scheduled" while nothing is running.
            let mut batch = self.inner.batch.lock().await;
            batch.flush_scheduled = false;
            if !batch.pending.is_empty() {
                batch.flush_scheduled = true;
                let logger = self.clone();
                tokio::spawn(async move {
                    logger.flush_after_interval().await;
                });
            }
        })
    }

    async fn flush_once(&self) {
        let to_write = {
            let mut batch = self.inner.batch.lock().await;
            if batch.pending.is_empty() {
                return;
            }
            std::mem::take(&mut batch.pending)
        };

        match self.inner.database.insert_activity_logs(&to_write).await {
            Ok(()) => {
                tracing::debug!(count = to_write.len(), "flushed activity logs");
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to flush activity logs");
                // Re-prepend the failed batch, oldest first, bounded so a
                // dead database cannot grow memory without limit.
                let mut batch = self.inner.batch.lock().await;
                let cap = BATCH_SIZE * 10;
                let current = batch.pending.len();
                if current < cap {
                    let available = cap - current;
                    let readd = to_write.len().min(available);
                    let dropped = to_write.len() - readd;
                    let mut requeued: Vec<ActivityLog> =
                        to_write.into_iter().take(readd).collect();
                    requeued.append(&mut batch.pending);
                    batch.pending = requeued;
                    if dropped > 0 {
                        tracing::warn!(requeued = readd, dropped, "re-queued failed log batch");
                    }
                } else {
                    tracing::error!(
                        dropped = to_write.len(),
                        cap,
                        "dropping log batch, pending queue at capacity"
                    );
                }
            }
        }
    }

    /// Spawn one notification task for this entry, bounded by
    /// `MAX_NOTIFICATION_TASKS`. At the cap, the notification is dropped
    /// with a warning instead of growing the task set without bound.
    fn notify_listeners(&self, entry: ActivityLog) {
        let listeners: Vec<LogListener> = match self.inner.listeners.read() {
            Ok(listeners) if !listeners.is_empty() => listeners.clone(),
            _ => return,
        };

        let reserve = self
            .inner
            .notification_tasks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                (count < MAX_NOTIFICATION_TASKS).then_some(count + 1)
            });

        if reserve.is_err() {
            tracing::warn!(
                limit = MAX_NOTIFICATION_TASKS,
                "notification task limit reached, skipping listener notification"
            );
            return;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            for listener in listeners {
                listener(entry.clone()).await;
            }
            inner.notification_tasks.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

/// Sensitive-key fragments whose values are never logged.
const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "secret",
    "token",
    "api_key",
    "apikey",
    "api-key",
    "authorization",
    "auth",
    "credential",
    "credentials",
    "key",
    "private_key",
    "access_token",
    "refresh_token",
    "bearer",
    "client_secret",
    "client_id",
    "session",
    "cookie",
];

const TRUNCATE_AT: usize = 200;

/// Redact sensitive values and truncate long strings before logging.
/// Applied recursively to nested objects.
#[must_use]
pub fn sanitize_params(params: &Value) -> Value {
    match params {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, value)| (key.clone(), sanitize_value(key, value)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn sanitize_value(key: &str, value: &Value) -> Value {
    let key_lower = key.to_lowercase();
    if SENSITIVE_KEYS
        .iter()
        .any(|sensitive| key_lower.contains(sensitive))
    {
        return json!("[REDACTED]");
    }
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_value(k, v)))
                .collect(),
        ),
        Value::String(s) if s.chars().count() > TRUNCATE_AT => {
            let truncated: String = s.chars().take(TRUNCATE_AT).collect();
            json!(format!("{truncated}...[truncated]"))
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_redacts_sensitive_keys() {
        let params = json!({
            "name": "tool",
            "api_key": "sk-12345",
            "nested": {"password": "hunter2", "plain": "ok"},
        });
        let clean = sanitize_params(&params);
        assert_eq!(clean["api_key"], json!("[REDACTED]"));
        assert_eq!(clean["nested"]["password"], json!("[REDACTED]"));
        assert_eq!(clean["nested"]["plain"], json!("ok"));
        assert_eq!(clean["name"], json!("tool"));
    }

    #[test]
    fn sanitize_truncates_long_strings() {
        let long = "x".repeat(500);
        let clean = sanitize_params(&json!({ "body": long }));
        let text = clean["body"].as_str().unwrap();
        assert!(text.ends_with("...[truncated]"));
        assert!(text.len() < 250);
    }
}

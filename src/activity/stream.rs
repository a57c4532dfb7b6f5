// ABOUTME: Live-stream connection registry with per-connection filters and lossy bounded queues
// ABOUTME: Broadcast snapshots the list under its lock and enqueues outside it; never blocks the logger

use crate::constants::STREAM_QUEUE_CAPACITY;
use crate::models::{ActivityLog, LogLevel, LogType};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use uuid::Uuid;

/// Per-connection filters. All present filters must match.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StreamFilters {
    pub server_id: Option<Uuid>,
    pub log_types: Option<Vec<LogType>>,
    pub levels: Option<Vec<LogLevel>>,
}

impl StreamFilters {
    #[must_use]
    pub fn matches(&self, entry: &ActivityLog) -> bool {
        if let Some(server_id) = self.server_id {
            if entry.server_id != Some(server_id) {
                return false;
            }
        }
        if let Some(log_types) = &self.log_types {
            if !log_types.contains(&entry.log_type) {
                return false;
            }
        }
        if let Some(levels) = &self.levels {
            if !levels.contains(&entry.level) {
                return false;
            }
        }
        true
    }
}

/// One live-stream consumer: filters plus a bounded queue feeding its
/// writer task.
pub struct StreamConnection {
    id: Uuid,
    /// std Mutex: filter checks and updates never cross an await point.
    filters: std::sync::Mutex<StreamFilters>,
    sender: mpsc::Sender<ActivityLog>,
}

impl StreamConnection {
    fn new(filters: StreamFilters) -> (Arc<Self>, mpsc::Receiver<ActivityLog>) {
        let (sender, receiver) = mpsc::channel(STREAM_QUEUE_CAPACITY);
        (
            Arc::new(Self {
                id: Uuid::new_v4(),
                filters: std::sync::Mutex::new(filters),
                sender,
            }),
            receiver,
        )
    }

    /// Replace this connection's filters (the `filter` control message).
    pub fn set_filters(&self, filters: StreamFilters) {
        if let Ok(mut current) = self.filters.lock() {
            *current = filters;
        }
    }

    #[must_use]
    pub fn current_filters(&self) -> StreamFilters {
        self.filters
            .lock()
            .map(|f| f.clone())
            .unwrap_or_default()
    }

    fn matches(&self, entry: &ActivityLog) -> bool {
        self.filters.lock().is_ok_and(|f| f.matches(entry))
    }
}

/// Registry of live-stream connections, broadcast target of the activity
/// logger listener.
#[derive(Default)]
pub struct StreamRegistry {
    connections: Mutex<Vec<Arc<StreamConnection>>>,
}

impl StreamRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new consumer; returns the connection handle and the
    /// receiving end for its writer task.
    pub async fn register(
        &self,
        filters: StreamFilters,
    ) -> (Arc<StreamConnection>, mpsc::Receiver<ActivityLog>) {
        let (connection, receiver) = StreamConnection::new(filters);
        let mut connections = self.connections.lock().await;
        connections.push(Arc::clone(&connection));
        tracing::info!(total = connections.len(), "live stream connected");
        (connection, receiver)
    }

    /// Remove a consumer on disconnect.
    pub async fn unregister(&self, connection: &Arc<StreamConnection>) {
        let mut connections = self.connections.lock().await;
        connections.retain(|c| c.id != connection.id);
        tracing::info!(remaining = connections.len(), "live stream disconnected");
    }

    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    /// Fan an entry out to every matching consumer. The connection list is
    /// snapshotted under the lock; sends happen outside it and are lossy so
    /// a slow consumer can only lose its own entries.
    pub async fn broadcast(&self, entry: &ActivityLog) {
        let snapshot: Vec<Arc<StreamConnection>> = {
            let connections = self.connections.lock().await;
            connections.clone()
        };

        for connection in snapshot {
            if !connection.matches(entry) {
                continue;
            }
            if let Err(mpsc::error::TrySendError::Full(_)) =
                connection.sender.try_send(entry.clone())
            {
                tracing::warn!(
                    connection = %connection.id,
                    "live stream queue full, dropping log entry"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(log_type: LogType, level: LogLevel, server_id: Option<Uuid>) -> ActivityLog {
        ActivityLog {
            id: Uuid::new_v4(),
            server_id,
            log_type,
            level,
            message: "m".into(),
            details: None,
            request_id: None,
            duration_ms: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_filters_match_everything() {
        let filters = StreamFilters::default();
        assert!(filters.matches(&entry(LogType::Alert, LogLevel::Warning, None)));
    }

    #[test]
    fn filters_are_conjunctive() {
        let server = Uuid::new_v4();
        let filters = StreamFilters {
            server_id: Some(server),
            log_types: Some(vec![LogType::McpRequest]),
            levels: None,
        };
        assert!(filters.matches(&entry(LogType::McpRequest, LogLevel::Info, Some(server))));
        assert!(!filters.matches(&entry(LogType::McpResponse, LogLevel::Info, Some(server))));
        assert!(!filters.matches(&entry(LogType::McpRequest, LogLevel::Info, None)));
    }

    #[tokio::test]
    async fn slow_consumer_drops_without_blocking() {
        let registry = StreamRegistry::new();
        let (_connection, _receiver) = registry.register(StreamFilters::default()).await;

        // Fill past queue capacity without draining the receiver; broadcast
        // must return promptly every time.
        for _ in 0..(STREAM_QUEUE_CAPACITY + 10) {
            registry
                .broadcast(&entry(LogType::System, LogLevel::Info, None))
                .await;
        }
        assert_eq!(registry.connection_count().await, 1);
    }
}

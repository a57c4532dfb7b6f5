// ABOUTME: Activity log table schema, batch insert, filtered listing, stats, and retention
// ABOUTME: Append-only; server_id is nullable and survives server deletion

use super::Database;
use crate::models::{ActivityLog, LogLevel, LogType};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sqlx::Row;
use std::collections::HashMap;
use uuid::Uuid;

/// Filters for the activity log listing endpoint.
#[derive(Debug, Clone, Default)]
pub struct ActivityLogFilter {
    pub server_id: Option<Uuid>,
    pub log_type: Option<LogType>,
    pub level: Option<LogLevel>,
    pub request_id: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub search: Option<String>,
}

/// Aggregate log statistics.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ActivityStats {
    pub total: i64,
    pub errors: i64,
    pub avg_duration_ms: f64,
    pub by_type: HashMap<String, i64>,
    pub by_level: HashMap<String, i64>,
}

impl Database {
    pub(super) async fn migrate_activity_logs(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS activity_logs (
                id TEXT PRIMARY KEY,
                server_id TEXT,
                log_type TEXT NOT NULL,
                level TEXT NOT NULL DEFAULT 'info',
                message TEXT NOT NULL,
                details TEXT,
                request_id TEXT,
                duration_ms INTEGER,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        for statement in [
            "CREATE INDEX IF NOT EXISTS idx_activity_server_created ON activity_logs(server_id, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_activity_type_created ON activity_logs(log_type, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_activity_level_created ON activity_logs(level, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_activity_request_id ON activity_logs(request_id)",
        ] {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        Ok(())
    }

    /// Insert a batch of log entries in one transaction. All-or-nothing so
    /// the logger can re-queue the whole batch on failure.
    ///
    /// # Errors
    ///
    /// Returns an error if any insert or the commit fails; nothing is
    /// persisted in that case.
    pub async fn insert_activity_logs(&self, entries: &[ActivityLog]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            sqlx::query(
                r"
                INSERT INTO activity_logs (id, server_id, log_type, level, message, details,
                                           request_id, duration_ms, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                ",
            )
            .bind(entry.id.to_string())
            .bind(entry.server_id.map(|id| id.to_string()))
            .bind(entry.log_type.as_str())
            .bind(entry.level.as_str())
            .bind(&entry.message)
            .bind(entry.details.as_ref().map(serde_json::Value::to_string))
            .bind(&entry.request_id)
            .bind(entry.duration_ms)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Filtered, paginated listing, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_activity_logs(
        &self,
        filter: &ActivityLogFilter,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<ActivityLog>, i64)> {
        let (where_clause, binds) = build_filter(filter);

        let count_sql = format!("SELECT COUNT(*) FROM activity_logs {where_clause}");
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for bind in &binds {
            count_query = bind.apply_scalar(count_query);
        }
        let total = count_query.fetch_one(&self.pool).await?;

        let list_sql = format!(
            "SELECT * FROM activity_logs {where_clause} ORDER BY created_at DESC, id LIMIT {limit} OFFSET {offset}"
        );
        let mut list_query = sqlx::query(&list_sql);
        for bind in &binds {
            list_query = bind.apply(list_query);
        }
        let rows = list_query.fetch_all(&self.pool).await?;

        let logs = rows.iter().map(row_to_activity_log).collect::<Result<_>>()?;
        Ok((logs, total))
    }

    /// Fetch one log entry by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_activity_log(&self, id: Uuid) -> Result<Option<ActivityLog>> {
        let row = sqlx::query("SELECT * FROM activity_logs WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_activity_log).transpose()
    }

    /// All entries sharing one correlation id, oldest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn activity_logs_for_request(&self, request_id: &str) -> Result<Vec<ActivityLog>> {
        let rows = sqlx::query(
            "SELECT * FROM activity_logs WHERE request_id = $1 ORDER BY created_at, id",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_activity_log).collect()
    }

    /// Delete entries older than the retention window. Returns the count.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn delete_activity_logs_before(&self, retention_days: i64) -> Result<u64> {
        let cutoff = Utc::now() - Duration::days(retention_days);
        let result = sqlx::query("DELETE FROM activity_logs WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Aggregate statistics, optionally scoped to a server and time window.
    ///
    /// # Errors
    ///
    /// Returns an error if any query fails.
    pub async fn activity_log_stats(
        &self,
        server_id: Option<Uuid>,
        since: Option<DateTime<Utc>>,
    ) -> Result<ActivityStats> {
        let filter = ActivityLogFilter {
            server_id,
            since,
            ..ActivityLogFilter::default()
        };
        let (where_clause, binds) = build_filter(&filter);

        let stats_sql = format!(
            r"
            SELECT COUNT(*) AS total,
                   COUNT(CASE WHEN level = 'error' THEN 1 END) AS errors,
                   AVG(duration_ms) AS avg_duration
            FROM activity_logs {where_clause}
            "
        );
        let mut stats_query = sqlx::query(&stats_sql);
        for bind in &binds {
            stats_query = bind.apply(stats_query);
        }
        let row = stats_query.fetch_one(&self.pool).await?;
        let total: i64 = row.get("total");
        let errors: i64 = row.get("errors");
        let avg_duration: Option<f64> = row.get("avg_duration");

        let by_type = self
            .grouped_counts("log_type", &where_clause, &binds)
            .await?;
        let by_level = self.grouped_counts("level", &where_clause, &binds).await?;

        Ok(ActivityStats {
            total,
            errors,
            avg_duration_ms: (avg_duration.unwrap_or(0.0) * 100.0).round() / 100.0,
            by_type,
            by_level,
        })
    }

    async fn grouped_counts(
        &self,
        column: &str,
        where_clause: &str,
        binds: &[FilterBind],
    ) -> Result<HashMap<String, i64>> {
        let sql = format!(
            "SELECT {column} AS k, COUNT(*) AS c FROM activity_logs {where_clause} GROUP BY {column}"
        );
        let mut query = sqlx::query(&sql);
        for bind in binds {
            query = bind.apply(query);
        }
        let rows = query.fetch_all(&self.pool).await?;
        Ok(rows
            .iter()
            .map(|row| (row.get::<String, _>("k"), row.get::<i64, _>("c")))
            .collect())
    }
}

/// A positional bind for the dynamic filter. Timestamps must be bound as
/// `DateTime<Utc>` so comparisons use the same text encoding sqlx writes on
/// insert; a hand-formatted string would not collate against it.
enum FilterBind {
    Text(String),
    Timestamp(DateTime<Utc>),
}

type SqliteQuery<'q> =
    sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>;
type SqliteScalar<'q, T> =
    sqlx::query::QueryScalar<'q, sqlx::Sqlite, T, sqlx::sqlite::SqliteArguments<'q>>;

impl FilterBind {
    fn apply<'q>(&self, query: SqliteQuery<'q>) -> SqliteQuery<'q> {
        match self {
            Self::Text(value) => query.bind(value.clone()),
            Self::Timestamp(ts) => query.bind(*ts),
        }
    }

    fn apply_scalar<'q, T>(&self, query: SqliteScalar<'q, T>) -> SqliteScalar<'q, T> {
        match self {
            Self::Text(value) => query.bind(value.clone()),
            Self::Timestamp(ts) => query.bind(*ts),
        }
    }
}

/// Build a WHERE clause with positional binds.
fn build_filter(filter: &ActivityLogFilter) -> (String, Vec<FilterBind>) {
    let mut clauses = Vec::new();
    let mut binds = Vec::new();

    if let Some(server_id) = filter.server_id {
        binds.push(FilterBind::Text(server_id.to_string()));
        clauses.push(format!("server_id = ${}", binds.len()));
    }
    if let Some(log_type) = filter.log_type {
        binds.push(FilterBind::Text(log_type.as_str().to_string()));
        clauses.push(format!("log_type = ${}", binds.len()));
    }
    if let Some(level) = filter.level {
        binds.push(FilterBind::Text(level.as_str().to_string()));
        clauses.push(format!("level = ${}", binds.len()));
    }
    if let Some(request_id) = &filter.request_id {
        binds.push(FilterBind::Text(request_id.clone()));
        clauses.push(format!("request_id = ${}", binds.len()));
    }
    if let Some(since) = filter.since {
        binds.push(FilterBind::Timestamp(since));
        clauses.push(format!("created_at >= ${}", binds.len()));
    }
    if let Some(until) = filter.until {
        binds.push(FilterBind::Timestamp(until));
        clauses.push(format!("created_at <= ${}", binds.len()));
    }
    if let Some(search) = &filter.search {
        // Escape LIKE metacharacters so user input cannot act as a pattern
        let escaped = search
            .replace('\\', "\\\\")
            .replace('%', "\\%")
            .replace('_', "\\_");
        binds.push(FilterBind::Text(format!("%{escaped}%")));
        clauses.push(format!("message LIKE ${} ESCAPE '\\'", binds.len()));
    }

    if clauses.is_empty() {
        (String::new(), binds)
    } else {
        (format!("WHERE {}", clauses.join(" AND ")), binds)
    }
}

fn row_to_activity_log(row: &sqlx::sqlite::SqliteRow) -> Result<ActivityLog> {
    let id: String = row.get("id");
    let server_id: Option<String> = row.get("server_id");
    let log_type: String = row.get("log_type");
    let level: String = row.get("level");
    let details: Option<String> = row.get("details");
    let created_at: DateTime<Utc> = row.get("created_at");

    Ok(ActivityLog {
        id: Uuid::parse_str(&id)?,
        server_id: server_id.as_deref().map(Uuid::parse_str).transpose()?,
        log_type: log_type.parse::<LogType>().map_err(anyhow::Error::msg)?,
        level: level.parse::<LogLevel>().map_err(anyhow::Error::msg)?,
        message: row.get("message"),
        details: details.as_deref().map(serde_json::from_str).transpose()?,
        request_id: row.get("request_id"),
        duration_ms: row.get("duration_ms"),
        created_at,
    })
}

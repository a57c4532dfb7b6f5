// ABOUTME: Module and network-access request tables with partial unique indexes
// ABOUTME: Duplicate pending requests are rejected by the index, not by pre-checking

use super::Database;
use crate::models::{ModuleRequest, NetworkAccessRequest, RequestStatus};
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::Row;
use uuid::Uuid;

/// A workflow request row joined with its tool and server names for
/// listings and the pending-requests overview.
#[derive(Debug, Clone, serde::Serialize)]
pub struct RequestWithContext<T> {
    #[serde(flatten)]
    pub request: T,
    pub tool_name: String,
    pub server_id: Option<Uuid>,
    pub server_name: String,
}

impl Database {
    pub(super) async fn migrate_requests(&self) -> Result<()> {
        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS module_requests (
                id TEXT PRIMARY KEY,
                tool_id TEXT NOT NULL REFERENCES tools(id) ON DELETE CASCADE,
                module_name TEXT NOT NULL,
                justification TEXT NOT NULL,
                requested_by TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                reviewed_by TEXT,
                reviewed_at TIMESTAMP,
                rejection_reason TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        // Race-safe duplicate prevention: only one pending request per
        // (tool, module); approved/rejected history rows are unconstrained.
        sqlx::query(
            r"
            CREATE UNIQUE INDEX IF NOT EXISTS uq_module_requests_pending
            ON module_requests(tool_id, module_name) WHERE status = 'pending'
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS network_access_requests (
                id TEXT PRIMARY KEY,
                tool_id TEXT NOT NULL REFERENCES tools(id) ON DELETE CASCADE,
                host TEXT NOT NULL,
                port INTEGER,
                justification TEXT NOT NULL,
                requested_by TEXT,
                status TEXT NOT NULL DEFAULT 'pending',
                reviewed_by TEXT,
                reviewed_at TIMESTAMP,
                rejection_reason TEXT,
                created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            ",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r"
            CREATE UNIQUE INDEX IF NOT EXISTS uq_network_requests_pending
            ON network_access_requests(tool_id, host, COALESCE(port, 0))
            WHERE status = 'pending'
            ",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a pending module request. A duplicate pending `(tool, module)`
    /// pair surfaces as a unique violation from the partial index.
    ///
    /// # Errors
    ///
    /// Returns the raw `sqlx::Error` so the service can distinguish the
    /// unique violation from other failures.
    pub async fn insert_module_request(
        &self,
        request: &ModuleRequest,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            INSERT INTO module_requests (id, tool_id, module_name, justification, requested_by,
                                         status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(request.id.to_string())
        .bind(request.tool_id.to_string())
        .bind(&request.module_name)
        .bind(&request.justification)
        .bind(&request.requested_by)
        .bind(request.status.as_str())
        .bind(request.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert a pending network-access request; duplicates per
    /// `(tool, host, COALESCE(port, 0))` surface as unique violations.
    ///
    /// # Errors
    ///
    /// Returns the raw `sqlx::Error` so the service can inspect it.
    pub async fn insert_network_request(
        &self,
        request: &NetworkAccessRequest,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r"
            INSERT INTO network_access_requests (id, tool_id, host, port, justification,
                                                 requested_by, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ",
        )
        .bind(request.id.to_string())
        .bind(request.tool_id.to_string())
        .bind(&request.host)
        .bind(request.port)
        .bind(&request.justification)
        .bind(&request.requested_by)
        .bind(request.status.as_str())
        .bind(request.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Fetch a module request by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_module_request(&self, id: Uuid) -> Result<Option<ModuleRequest>> {
        let row = sqlx::query("SELECT * FROM module_requests WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_module_request).transpose()
    }

    /// Fetch a network request by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn get_network_request(&self, id: Uuid) -> Result<Option<NetworkAccessRequest>> {
        let row = sqlx::query("SELECT * FROM network_access_requests WHERE id = $1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(row_to_network_request).transpose()
    }

    /// Update review fields of a module request.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn update_module_request(&self, request: &ModuleRequest) -> Result<()> {
        sqlx::query(
            r"
            UPDATE module_requests SET status = $2, reviewed_by = $3, reviewed_at = $4,
                                       rejection_reason = $5
            WHERE id = $1
            ",
        )
        .bind(request.id.to_string())
        .bind(request.status.as_str())
        .bind(&request.reviewed_by)
        .bind(request.reviewed_at)
        .bind(&request.rejection_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Update review fields of a network request.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn update_network_request(&self, request: &NetworkAccessRequest) -> Result<()> {
        sqlx::query(
            r"
            UPDATE network_access_requests SET status = $2, reviewed_by = $3, reviewed_at = $4,
                                               rejection_reason = $5
            WHERE id = $1
            ",
        )
        .bind(request.id.to_string())
        .bind(request.status.as_str())
        .bind(&request.reviewed_by)
        .bind(request.reviewed_at)
        .bind(&request.rejection_reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Module requests filtered by status (None = pending only), newest
    /// first, with tool and server names joined in.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_module_requests(
        &self,
        status: Option<RequestStatus>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<RequestWithContext<ModuleRequest>>, i64)> {
        let status = status.unwrap_or(RequestStatus::Pending);
        let pattern = search.map(|s| format!("%{s}%"));

        let total: i64 = if let Some(pattern) = &pattern {
            sqlx::query_scalar(
                r"
                SELECT COUNT(*) FROM module_requests
                WHERE status = $1 AND (module_name LIKE $2 OR justification LIKE $2)
                ",
            )
            .bind(status.as_str())
            .bind(pattern)
            .fetch_one(&self.pool)
            .await?
        } else {
            sqlx::query_scalar("SELECT COUNT(*) FROM module_requests WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?
        };

        let sql = if pattern.is_some() {
            r"
            SELECT mr.*, tools.name AS ctx_tool_name, tools.server_id AS ctx_server_id,
                   servers.name AS ctx_server_name
            FROM module_requests mr
            JOIN tools ON mr.tool_id = tools.id
            JOIN servers ON tools.server_id = servers.id
            WHERE mr.status = $1 AND (mr.module_name LIKE $2 OR mr.justification LIKE $2)
            ORDER BY mr.created_at DESC, mr.id LIMIT $3 OFFSET $4
            "
        } else {
            r"
            SELECT mr.*, tools.name AS ctx_tool_name, tools.server_id AS ctx_server_id,
                   servers.name AS ctx_server_name
            FROM module_requests mr
            JOIN tools ON mr.tool_id = tools.id
            JOIN servers ON tools.server_id = servers.id
            WHERE mr.status = $1
            ORDER BY mr.created_at DESC, mr.id LIMIT $2 OFFSET $3
            "
        };

        let mut query = sqlx::query(sql).bind(status.as_str());
        if let Some(pattern) = &pattern {
            query = query.bind(pattern);
        }
        let rows = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;

        let items = rows
            .iter()
            .map(|row| {
                Ok(RequestWithContext {
                    request: row_to_module_request(row)?,
                    tool_name: row.get("ctx_tool_name"),
                    server_id: parse_optional_uuid(row.get("ctx_server_id"))?,
                    server_name: row.get("ctx_server_name"),
                })
            })
            .collect::<Result<_>>()?;
        Ok((items, total))
    }

    /// Network requests filtered by status, same shape as module listing.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn list_network_requests(
        &self,
        status: Option<RequestStatus>,
        search: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<(Vec<RequestWithContext<NetworkAccessRequest>>, i64)> {
        let status = status.unwrap_or(RequestStatus::Pending);
        let pattern = search.map(|s| format!("%{s}%"));

        let total: i64 = if let Some(pattern) = &pattern {
            sqlx::query_scalar(
                r"
                SELECT COUNT(*) FROM network_access_requests
                WHERE status = $1 AND (host LIKE $2 OR justification LIKE $2)
                ",
            )
            .bind(status.as_str())
            .bind(pattern)
            .fetch_one(&self.pool)
            .await?
        } else {
            sqlx::query_scalar("SELECT COUNT(*) FROM network_access_requests WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?
        };

        let sql = if pattern.is_some() {
            r"
            SELECT nr.*, tools.name AS ctx_tool_name, tools.server_id AS ctx_server_id,
                   servers.name AS ctx_server_name
            FROM network_access_requests nr
            JOIN tools ON nr.tool_id = tools.id
            JOIN servers ON tools.server_id = servers.id
            WHERE nr.status = $1 AND (nr.host LIKE $2 OR nr.justification LIKE $2)
            ORDER BY nr.created_at DESC, nr.id LIMIT $3 OFFSET $4
            "
        } else {
            r"
            SELECT nr.*, tools.name AS ctx_tool_name, tools.server_id AS ctx_server_id,
                   servers.name AS ctx_server_name
            FROM network_access_requests nr
            JOIN tools ON nr.tool_id = tools.id
            JOIN servers ON tools.server_id = servers.id
            WHERE nr.status = $1
            ORDER BY nr.created_at DESC, nr.id LIMIT $2 OFFSET $3
            "
        };

        let mut query = sqlx::query(sql).bind(status.as_str());
        if let Some(pattern) = &pattern {
            query = query.bind(pattern);
        }
        let rows = query.bind(limit).bind(offset).fetch_all(&self.pool).await?;

        let items = rows
            .iter()
            .map(|row| {
                Ok(RequestWithContext {
                    request: row_to_network_request(row)?,
                    tool_name: row.get("ctx_tool_name"),
                    server_id: parse_optional_uuid(row.get("ctx_server_id"))?,
                    server_name: row.get("ctx_server_name"),
                })
            })
            .collect::<Result<_>>()?;
        Ok((items, total))
    }

    /// All module requests for one tool, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn module_requests_for_tool(&self, tool_id: Uuid) -> Result<Vec<ModuleRequest>> {
        let rows = sqlx::query(
            "SELECT * FROM module_requests WHERE tool_id = $1 ORDER BY created_at DESC, id",
        )
        .bind(tool_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_module_request).collect()
    }

    /// All network requests for one tool, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn network_requests_for_tool(
        &self,
        tool_id: Uuid,
    ) -> Result<Vec<NetworkAccessRequest>> {
        let rows = sqlx::query(
            "SELECT * FROM network_access_requests WHERE tool_id = $1 ORDER BY created_at DESC, id",
        )
        .bind(tool_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_network_request).collect()
    }

    /// Count requests for a server's tools in the given status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_requests_for_server(
        &self,
        server_id: Uuid,
        status: RequestStatus,
    ) -> Result<(i64, i64)> {
        let modules: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM module_requests mr
            JOIN tools ON mr.tool_id = tools.id
            WHERE tools.server_id = $1 AND mr.status = $2
            ",
        )
        .bind(server_id.to_string())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        let network: i64 = sqlx::query_scalar(
            r"
            SELECT COUNT(*) FROM network_access_requests nr
            JOIN tools ON nr.tool_id = tools.id
            WHERE tools.server_id = $1 AND nr.status = $2
            ",
        )
        .bind(server_id.to_string())
        .bind(status.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok((modules, network))
    }

    /// Global request counts by status, for the dashboard.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub async fn count_requests_by_status(
        &self,
        status: RequestStatus,
    ) -> Result<(i64, i64)> {
        let modules: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM module_requests WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;
        let network: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM network_access_requests WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok((modules, network))
    }
}

fn parse_optional_uuid(raw: Option<String>) -> Result<Option<Uuid>> {
    raw.as_deref().map(Uuid::parse_str).transpose().map_err(Into::into)
}

fn row_to_module_request(row: &sqlx::sqlite::SqliteRow) -> Result<ModuleRequest> {
    let id: String = row.get("id");
    let tool_id: String = row.get("tool_id");
    let status: String = row.get("status");
    let created_at: DateTime<Utc> = row.get("created_at");

    Ok(ModuleRequest {
        id: Uuid::parse_str(&id)?,
        tool_id: Uuid::parse_str(&tool_id)?,
        module_name: row.get("module_name"),
        justification: row.get("justification"),
        requested_by: row.get("requested_by"),
        status: status.parse::<RequestStatus>().map_err(anyhow::Error::msg)?,
        reviewed_by: row.get("reviewed_by"),
        reviewed_at: row.get("reviewed_at"),
        rejection_reason: row.get("rejection_reason"),
        created_at,
    })
}

fn row_to_network_request(row: &sqlx::sqlite::SqliteRow) -> Result<NetworkAccessRequest> {
    let id: String = row.get("id");
    let tool_id: String = row.get("tool_id");
    let status: String = row.get("status");
    let created_at: DateTime<Utc> = row.get("created_at");

    Ok(NetworkAccessRequest {
        id: Uuid::parse_str(&id)?,
        tool_id: Uuid::parse_str(&tool_id)?,
        host: row.get("host"),
        port: row.get("port"),
        justification: row.get("justification"),
        requested_by: row.get("requested_by"),
        status: status.parse::<RequestStatus>().map_err(anyhow::Error::msg)?,
        reviewed_by: row.get("reviewed_by"),
        reviewed_at: row.get("reviewed_at"),
        rejection_reason: row.get("rejection_reason"),
        created_at,
    })
}

// ABOUTME: Database handle over SQLite with per-module schema migration
// ABOUTME: Each entity module adds its tables, indexes, and queries to the shared Database struct

pub mod activity_logs;
pub mod execution_logs;
pub mod external_sources;
pub mod requests;
pub mod secrets;
pub mod servers;
pub mod settings;
pub mod tools;

use anyhow::Result;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::str::FromStr;

/// Shared database handle. Cheap to clone; all state lives in the pool.
#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    /// Connect and run migrations.
    ///
    /// Foreign keys are enabled per connection (SQLite default is off), and
    /// the cascade rules in the schema depend on them. An in-memory database
    /// is pinned to a single pooled connection; every pooled connection
    /// would otherwise get its own empty `:memory:` instance.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection fails or any migration statement
    /// cannot be applied.
    pub async fn new(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true);

        let in_memory = database_url.contains(":memory:");
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = pool_options.connect_with(options).await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// In-memory database for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if migration fails.
    pub async fn in_memory() -> Result<Self> {
        Self::new("sqlite::memory:").await
    }

    /// Raw pool access for queries that live outside the entity modules.
    #[must_use]
    pub const fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    /// Run all schema migrations.
    ///
    /// # Errors
    ///
    /// Returns an error if any migration fails.
    pub async fn migrate(&self) -> Result<()> {
        self.migrate_servers().await?;
        self.migrate_tools().await?;
        self.migrate_secrets().await?;
        self.migrate_external_sources().await?;
        self.migrate_activity_logs().await?;
        self.migrate_execution_logs().await?;
        self.migrate_requests().await?;
        self.migrate_settings().await?;
        Ok(())
    }
}

/// True when the error is a unique-constraint violation. The workflow
/// services rely on this to turn duplicate pending requests into
/// user-visible "already pending" errors without pre-checking.
#[must_use]
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .is_some_and(|db_err| db_err.is_unique_violation())
}

// ABOUTME: MCPbox server binary: configuration, tracing, startup wiring, and serving
// ABOUTME: Runs the gateway, admin API, and the background log-retention task

#![forbid(unsafe_code)]

//! # MCPbox Server Binary
//!
//! Starts the MCP gateway and admin API against a SQLite database and the
//! sandbox service configured through the environment.

use anyhow::{Context, Result};
use clap::Parser;
use mcpbox::config::ServerConfig;
use mcpbox::constants::settings_keys;
use mcpbox::context::ServerResources;
use mcpbox::database::Database;
use mcpbox::services::SettingService;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "mcpbox-server")]
#[command(about = "MCPbox - self-hosted MCP control plane")]
struct Args {
    /// Override HTTP port
    #[arg(long)]
    http_port: Option<u16>,

    /// Override database URL
    #[arg(long)]
    database_url: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut config = ServerConfig::from_env()?;
    if let Some(http_port) = args.http_port {
        config.http_port = http_port;
    }
    if let Some(database_url) = args.database_url {
        config.database_url = database_url;
    }

    info!(
        port = config.http_port,
        database = %config.database_url,
        sandbox = %config.sandbox_url,
        "starting MCPbox"
    );

    let database = Database::new(&config.database_url)
        .await
        .context("database initialization failed")?;

    let bind = format!("{}:{}", config.bind_address, config.http_port);
    let resources = ServerResources::new(config, database);

    spawn_retention_task(Arc::clone(&resources));

    let app = mcpbox::app_router(Arc::clone(&resources));
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("cannot bind {bind}"))?;
    info!(%bind, "MCPbox listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal(Arc::clone(&resources)))
    .await
    .context("server error")?;

    Ok(())
}

/// Purge old activity logs once a day, honoring the configured retention.
fn spawn_retention_task(resources: Arc<ServerResources>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(24 * 60 * 60));
        interval.tick().await;
        loop {
            interval.tick().await;

            let settings = SettingService::new(resources.database.clone());
            let retention_days = settings
                .get_value_or(settings_keys::LOG_RETENTION_DAYS, "30")
                .await
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(30i64);

            if let Err(err) = resources.activity.cleanup_old_logs(retention_days).await {
                tracing::warn!(error = %err, "log retention cleanup failed");
            }
        }
    });
}

async fn shutdown_signal(resources: Arc<ServerResources>) {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut terminate =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .unwrap_or_else(|e| {
                    tracing::error!(error = %e, "cannot install SIGTERM handler");
                    std::process::exit(1);
                });
        tokio::select! {
            _ = ctrl_c => {}
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }

    info!("shutdown requested, flushing pending activity logs");
    resources.activity.flush_pending().await;
}

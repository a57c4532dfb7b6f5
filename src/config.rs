// ABOUTME: Environment-only server configuration loaded once at startup
// ABOUTME: Every tunable has a default except the master key, which is a startup fatal

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::env;
use std::time::Duration;

/// Server configuration assembled from environment variables.
///
/// MCPbox is configured through the environment only; there is no config
/// file. Defaults suit a single-host deployment next to the sandbox.
/// No derived `Debug`: the struct holds the master key. The manual `Debug`
/// impl below redacts it.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address the gateway binds to.
    pub bind_address: String,
    /// HTTP port for the gateway and admin API.
    pub http_port: u16,
    /// SQLite database URL.
    pub database_url: String,
    /// 32-byte master encryption key (decoded from base64).
    pub master_key: [u8; 32],
    /// Base URL of the sandbox service.
    pub sandbox_url: String,
    /// API key sent to the sandbox on every request.
    pub sandbox_api_key: Option<String>,
    /// Shared bearer token guarding the `/internal/*` endpoints.
    pub internal_api_token: Option<String>,
    /// Request timeout for sandbox HTTP calls.
    pub http_timeout: Duration,
    /// Idle connections kept per host in the sandbox client pool.
    pub http_keepalive_connections: usize,
    /// Public callback URL base for OAuth redirects.
    pub oauth_callback_base: String,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_address", &self.bind_address)
            .field("http_port", &self.http_port)
            .field("database_url", &self.database_url)
            .field("master_key", &"<redacted>")
            .field("sandbox_url", &self.sandbox_url)
            .field("sandbox_api_key", &self.sandbox_api_key.as_ref().map(|_| "<redacted>"))
            .field(
                "internal_api_token",
                &self.internal_api_token.as_ref().map(|_| "<redacted>"),
            )
            .field("http_timeout", &self.http_timeout)
            .field("http_keepalive_connections", &self.http_keepalive_connections)
            .field("oauth_callback_base", &self.oauth_callback_base)
            .finish()
    }
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if `MCPBOX_MASTER_KEY` is absent, not valid base64,
    /// or not exactly 32 bytes, or if any numeric variable fails to parse.
    pub fn from_env() -> Result<Self> {
        let master_key = Self::load_master_key()?;

        let http_port = env_parse("MCPBOX_HTTP_PORT", 8000u16)?;
        let http_timeout_secs = env_parse("MCPBOX_HTTP_TIMEOUT_SECS", 30u64)?;
        let http_keepalive_connections = env_parse("MCPBOX_HTTP_KEEPALIVE_CONNECTIONS", 10usize)?;

        Ok(Self {
            bind_address: env::var("MCPBOX_BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0".into()),
            http_port,
            database_url: env::var("MCPBOX_DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:mcpbox.db".into()),
            master_key,
            sandbox_url: env::var("MCPBOX_SANDBOX_URL")
                .unwrap_or_else(|_| "http://sandbox:8001".into()),
            sandbox_api_key: env::var("MCPBOX_SANDBOX_API_KEY").ok(),
            internal_api_token: env::var("MCPBOX_INTERNAL_API_TOKEN").ok(),
            http_timeout: Duration::from_secs(http_timeout_secs),
            http_keepalive_connections,
            oauth_callback_base: env::var("MCPBOX_OAUTH_CALLBACK_BASE")
                .unwrap_or_else(|_| format!("http://localhost:{http_port}")),
        })
    }

    /// The master key protects every secret at rest; refusing to start
    /// without it beats silently running unencrypted.
    fn load_master_key() -> Result<[u8; 32]> {
        let encoded = env::var("MCPBOX_MASTER_KEY")
            .map_err(|_| anyhow!("MCPBOX_MASTER_KEY is not set; refusing to start"))?;
        let bytes = BASE64
            .decode(encoded.trim())
            .context("MCPBOX_MASTER_KEY is not valid base64")?;
        if bytes.len() != 32 {
            return Err(anyhow!(
                "MCPBOX_MASTER_KEY must decode to exactly 32 bytes, got {}",
                bytes.len()
            ));
        }
        let mut key = [0u8; 32];
        key.copy_from_slice(&bytes);
        Ok(key)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("invalid value for {name}")),
        Err(_) => Ok(default),
    }
}

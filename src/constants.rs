// ABOUTME: Protocol literals, operational limits, and header names shared across the gateway
// ABOUTME: Single source of truth so handlers, services, and tests agree on every constant

/// MCP protocol version advertised by the `initialize` handshake.
pub const MCP_PROTOCOL_VERSION: &str = "2024-11-05";

/// Server identity reported in the `initialize` result.
pub const MCP_SERVER_NAME: &str = "mcpbox";

/// Crate version reported in the `initialize` result.
pub const MCP_SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prefix marking tools that are dispatched locally rather than forwarded
/// to the sandbox.
pub const MANAGEMENT_TOOL_PREFIX: &str = "mcpbox_";

/// Destructive management tools restricted to local callers.
pub const LOCAL_ONLY_TOOLS: &[&str] = &["mcpbox_delete_server", "mcpbox_delete_tool"];

/// Service-token header added by the edge proxy in remote mode.
pub const SERVICE_TOKEN_HEADER: &str = "x-mcpbox-service-token";

/// Verified-user email header, trusted only alongside a valid service token.
pub const USER_EMAIL_HEADER: &str = "x-mcpbox-user-email";

/// Failed auth attempts per source IP before 403 flips to 429.
pub const FAILED_AUTH_MAX: u32 = 10;

/// Window after which per-IP auth failure counters age out (seconds).
pub const FAILED_AUTH_WINDOW_SECS: u64 = 900;

/// Concurrent server-initiated SSE streams on `GET /mcp`.
pub const MAX_SSE_CONNECTIONS: usize = 50;

/// Keep-alive interval for the `GET /mcp` stream (seconds).
pub const SSE_KEEPALIVE_SECS: u64 = 15;

/// Activity logger batch flush interval.
pub const BATCH_INTERVAL_MS: u64 = 100;

/// Activity logger nominal batch size; the requeue cap is `BATCH_SIZE * 10`.
pub const BATCH_SIZE: usize = 100;

/// In-memory broadcast ring capacity.
pub const BROADCAST_BUFFER_SIZE: usize = 1000;

/// Concurrent listener-notification tasks before notifications are dropped.
pub const MAX_NOTIFICATION_TASKS: usize = 100;

/// Per-connection live-stream queue capacity.
pub const STREAM_QUEUE_CAPACITY: usize = 1000;

/// Pending OAuth flows older than this are purged (seconds).
pub const OAUTH_FLOW_EXPIRY_SECS: u64 = 600;

/// Hard ceiling on outbound OAuth HTTP operations (seconds).
pub const OAUTH_HTTP_TIMEOUT_SECS: u64 = 15;

/// Refresh the access token when expiry is within this buffer (seconds).
pub const OAUTH_REFRESH_BUFFER_SECS: i64 = 60;

/// User-Agent for OAuth metadata discovery.
pub const OAUTH_USER_AGENT: &str = concat!("MCPbox/", env!("CARGO_PKG_VERSION"), " (OAuth Client)");

/// Policy cache refresh interval (seconds).
pub const POLICY_CACHE_TTL_SECS: u64 = 30;

/// Default timeout handed to the sandbox for tool test runs (seconds).
pub const TEST_EXECUTION_TIMEOUT_SECS: u64 = 30;

/// Encryption AAD domains. A ciphertext produced under one domain cannot be
/// decrypted under another.
pub mod aad {
    /// Remote-mode service token at rest.
    pub const SERVICE_TOKEN: &str = "service_token";
    /// Tunnel credential served to the edge proxy.
    pub const TUNNEL_TOKEN: &str = "tunnel_token";
    /// Per-server secret values.
    pub const SERVER_SECRET: &str = "server_secret";
    /// External-source OAuth token bundles.
    pub const OAUTH_TOKENS: &str = "oauth_tokens";
}

/// Settings keys used by the core (the admin UI reads and writes the same
/// keys through the settings API).
pub mod settings_keys {
    pub const SERVICE_TOKEN: &str = "service_token";
    pub const TUNNEL_TOKEN: &str = "tunnel_token";
    pub const EDGE_HOSTNAME: &str = "edge_hostname";
    pub const EDGE_WORKER_NAME: &str = "edge_worker_name";
    pub const ACCESS_POLICY_TYPE: &str = "access_policy_type";
    pub const ACCESS_POLICY_EMAILS: &str = "access_policy_emails";
    pub const ACCESS_POLICY_EMAIL_DOMAIN: &str = "access_policy_email_domain";
    pub const ALLOWED_MODULES: &str = "allowed_modules";
    pub const TOOL_APPROVAL_MODE: &str = "tool_approval_mode";
    pub const MODULE_APPROVAL_MODE: &str = "module_approval_mode";
    pub const NETWORK_ACCESS_POLICY: &str = "network_access_policy";
    pub const REMOTE_TOOL_EDITING: &str = "remote_tool_editing";
    pub const REDACT_SECRETS_IN_OUTPUT: &str = "redact_secrets_in_output";
    pub const LOG_RETENTION_DAYS: &str = "log_retention_days";
    pub const MCP_RATE_LIMIT_RPM: &str = "mcp_rate_limit_rpm";
}

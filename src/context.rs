// ABOUTME: ServerResources: the explicit application context built once at startup
// ABOUTME: Replaces module-global singletons; tests construct as many contexts as they need

use crate::activity::{ActivityLogger, StreamRegistry};
use crate::auth::{AuthFailureTracker, EmailPolicyCache, ServiceTokenCache};
use crate::config::ServerConfig;
use crate::crypto::SecretCipher;
use crate::database::Database;
use crate::notify::ToolChangeNotifier;
use crate::oauth::OAuthFlowStore;
use crate::sandbox::SandboxClient;
use std::sync::atomic::AtomicUsize;
use std::sync::Arc;

/// Everything a request handler needs, threaded through axum state as one
/// `Arc`. One instance per process in production.
pub struct ServerResources {
    pub config: ServerConfig,
    pub database: Database,
    pub cipher: SecretCipher,
    pub sandbox: SandboxClient,
    pub activity: ActivityLogger,
    pub service_tokens: ServiceTokenCache,
    pub email_policy: EmailPolicyCache,
    pub auth_failures: AuthFailureTracker,
    pub tool_changes: ToolChangeNotifier,
    pub streams: Arc<StreamRegistry>,
    pub oauth_flows: OAuthFlowStore,
    /// Open `GET /mcp` SSE streams, bounded by `MAX_SSE_CONNECTIONS`.
    pub sse_connections: AtomicUsize,
}

impl ServerResources {
    /// Wire up the full context. The stream registry is registered as an
    /// activity-logger listener so live consumers see every entry.
    #[must_use]
    pub fn new(config: ServerConfig, database: Database) -> Arc<Self> {
        let cipher = SecretCipher::new(config.master_key);
        let sandbox = SandboxClient::new(
            config.sandbox_url.clone(),
            config.sandbox_api_key.clone(),
            config.http_timeout,
            config.http_keepalive_connections,
        );
        let activity = ActivityLogger::new(database.clone());
        let streams = Arc::new(StreamRegistry::new());
        crate::activity::register_stream_listener(&activity, Arc::clone(&streams));

        Arc::new(Self {
            service_tokens: ServiceTokenCache::new(database.clone(), cipher.clone()),
            email_policy: EmailPolicyCache::new(database.clone()),
            auth_failures: AuthFailureTracker::default(),
            tool_changes: ToolChangeNotifier::new(),
            oauth_flows: OAuthFlowStore::new(),
            sse_connections: AtomicUsize::new(0),
            streams,
            activity,
            sandbox,
            cipher,
            database,
            config,
        })
    }
}

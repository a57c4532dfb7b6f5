// ABOUTME: Persisted entities and their status enums for the MCPbox data model
// ABOUTME: Enums are string-backed so database TEXT columns and JSON payloads share one vocabulary

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Declares a string-backed enum: serde snake_case, `as_str`, `FromStr`,
/// and `Display` all agree on the same literals.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            #[must_use]
            pub const fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(format!(concat!("unknown ", stringify!($name), ": {}"), other)),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

string_enum! {
    /// Lifecycle status of a server. `Running` iff currently registered
    /// with the sandbox.
    ServerStatus {
        Imported => "imported",
        Ready => "ready",
        Running => "running",
        Stopped => "stopped",
        Error => "error",
    }
}

string_enum! {
    /// Network posture of a server's tools.
    NetworkMode {
        Isolated => "isolated",
        Allowlist => "allowlist",
    }
}

string_enum! {
    /// How a tool executes.
    ToolType {
        PythonCode => "python_code",
        McpPassthrough => "mcp_passthrough",
    }
}

string_enum! {
    /// Admin approval state gating gateway exposure.
    ApprovalStatus {
        Draft => "draft",
        PendingReview => "pending_review",
        Approved => "approved",
        Rejected => "rejected",
    }
}

string_enum! {
    /// State of a module or network-access request.
    RequestStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
    }
}

string_enum! {
    /// Origin of a tool version.
    ChangeSource {
        Manual => "manual",
        Llm => "llm",
        Import => "import",
        Rollback => "rollback",
    }
}

string_enum! {
    /// Category of an activity log entry.
    LogType {
        McpRequest => "mcp_request",
        McpResponse => "mcp_response",
        Network => "network",
        Alert => "alert",
        Error => "error",
        System => "system",
        Audit => "audit",
    }
}

string_enum! {
    /// Severity of an activity log entry.
    LogLevel {
        Debug => "debug",
        Info => "info",
        Warning => "warning",
        Error => "error",
    }
}

string_enum! {
    /// Authentication scheme for an external MCP source.
    AuthType {
        None => "none",
        Bearer => "bearer",
        Header => "header",
        Oauth => "oauth",
    }
}

string_enum! {
    /// MCP transport used by an external source.
    TransportType {
        StreamableHttp => "streamable_http",
        Sse => "sse",
    }
}

string_enum! {
    /// Health of an external MCP source.
    SourceStatus {
        Active => "active",
        Error => "error",
        Disabled => "disabled",
    }
}

/// A named container for tools.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: ServerStatus,
    pub network_mode: NetworkMode,
    /// Host literals tools in this server may reach (allowlist mode).
    pub allowed_hosts: Vec<String>,
    pub default_timeout_ms: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A tool exposed (once approved) through the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub id: Uuid,
    pub server_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub timeout_ms: Option<i64>,
    pub tool_type: ToolType,
    pub python_code: Option<String>,
    pub external_source_id: Option<Uuid>,
    pub external_tool_name: Option<String>,
    /// Parameter schema; derived from the code for `python_code` tools.
    pub input_schema: Option<Value>,
    /// Module names the code imports.
    pub code_dependencies: Vec<String>,
    pub current_version: i64,
    pub approval_status: ApprovalStatus,
    pub approval_requested_at: Option<DateTime<Utc>>,
    pub approved_at: Option<DateTime<Utc>>,
    pub approved_by: Option<String>,
    pub rejection_reason: Option<String>,
    pub created_by: Option<String>,
    pub publish_notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Tool {
    /// The gateway exposes a tool iff it is enabled, approved, and its
    /// server is running. Server status is checked by the caller.
    #[must_use]
    pub const fn is_publishable(&self) -> bool {
        self.enabled && matches!(self.approval_status, ApprovalStatus::Approved)
    }
}

/// Immutable snapshot of a tool's mutable content.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolVersion {
    pub id: Uuid,
    pub tool_id: Uuid,
    pub version_number: i64,
    pub name: String,
    pub description: Option<String>,
    pub enabled: bool,
    pub timeout_ms: Option<i64>,
    pub python_code: Option<String>,
    pub input_schema: Option<Value>,
    pub change_summary: Option<String>,
    pub change_source: ChangeSource,
    pub created_at: DateTime<Utc>,
}

/// A per-server secret. `encrypted_value` absent means placeholder: the key
/// exists but an admin has not supplied a value yet.
#[derive(Debug, Clone)]
pub struct ServerSecret {
    pub id: Uuid,
    pub server_id: Uuid,
    pub key_name: String,
    pub encrypted_value: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServerSecret {
    #[must_use]
    pub const fn has_value(&self) -> bool {
        self.encrypted_value.is_some()
    }
}

/// An upstream MCP endpoint whose tools can be proxied.
#[derive(Debug, Clone)]
pub struct ExternalMcpSource {
    pub id: Uuid,
    pub server_id: Uuid,
    pub name: String,
    pub url: String,
    pub auth_type: AuthType,
    /// Reference into `ServerSecret` by key name, same server.
    pub auth_secret_name: Option<String>,
    pub auth_header_name: Option<String>,
    pub transport_type: TransportType,
    pub status: SourceStatus,
    pub oauth_tokens_encrypted: Option<String>,
    pub oauth_issuer: Option<String>,
    pub oauth_client_id: Option<String>,
    pub tool_count: i64,
    pub discovered_tools_cache: Option<Value>,
    pub last_discovered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only activity record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityLog {
    pub id: Uuid,
    pub server_id: Option<Uuid>,
    pub log_type: LogType,
    pub level: LogLevel,
    pub message: String,
    pub details: Option<Value>,
    /// Short correlation string linking a request to its response.
    pub request_id: Option<String>,
    pub duration_ms: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Append-only record of one tool execution (production or test).
#[derive(Debug, Clone, Serialize)]
pub struct ToolExecutionLog {
    pub id: Uuid,
    pub tool_id: Option<Uuid>,
    pub server_id: Option<Uuid>,
    pub tool_name: String,
    pub input_args: Option<Value>,
    pub result: Option<Value>,
    pub error: Option<String>,
    pub stdout: Option<String>,
    pub duration_ms: Option<i64>,
    pub success: bool,
    pub is_test: bool,
    pub executed_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request to whitelist a Python module for a tool.
#[derive(Debug, Clone, Serialize)]
pub struct ModuleRequest {
    pub id: Uuid,
    pub tool_id: Uuid,
    pub module_name: String,
    pub justification: String,
    pub requested_by: Option<String>,
    pub status: RequestStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request to whitelist network access for a tool.
#[derive(Debug, Clone, Serialize)]
pub struct NetworkAccessRequest {
    pub id: Uuid,
    pub tool_id: Uuid,
    pub host: String,
    pub port: Option<i64>,
    pub justification: String,
    pub requested_by: Option<String>,
    pub status: RequestStatus,
    pub reviewed_by: Option<String>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Process-wide key/value setting. Encrypted values are opaque base64 blobs.
#[derive(Debug, Clone)]
pub struct Setting {
    pub id: Uuid,
    pub key: String,
    pub value: Option<String>,
    pub encrypted: bool,
    pub description: Option<String>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enum_text_round_trips() {
        assert_eq!(ApprovalStatus::PendingReview.as_str(), "pending_review");
        assert_eq!(
            "pending_review".parse::<ApprovalStatus>().unwrap(),
            ApprovalStatus::PendingReview
        );
        assert!("bogus".parse::<ApprovalStatus>().is_err());
    }

    #[test]
    fn publishable_requires_enabled_and_approved() {
        let mut tool = Tool {
            id: Uuid::new_v4(),
            server_id: Uuid::new_v4(),
            name: "t".into(),
            description: None,
            enabled: true,
            timeout_ms: None,
            tool_type: ToolType::PythonCode,
            python_code: None,
            external_source_id: None,
            external_tool_name: None,
            input_schema: None,
            code_dependencies: Vec::new(),
            current_version: 1,
            approval_status: ApprovalStatus::Approved,
            approval_requested_at: None,
            approved_at: None,
            approved_by: None,
            rejection_reason: None,
            created_by: None,
            publish_notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        assert!(tool.is_publishable());
        tool.enabled = false;
        assert!(!tool.is_publishable());
        tool.enabled = true;
        tool.approval_status = ApprovalStatus::PendingReview;
        assert!(!tool.is_publishable());
    }
}

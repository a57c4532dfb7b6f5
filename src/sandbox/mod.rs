// ABOUTME: Types and error classification for the sandbox RPC boundary
// ABOUTME: The client itself lives in client.rs; callers receive structured outcomes, not panics

pub mod client;

pub use client::SandboxClient;

use crate::retry::RetryableError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Failure classes for sandbox HTTP calls. Transport errors, timeouts, and
/// 5xx responses are transient and retried; everything else short-circuits.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("sandbox transport error: {0}")]
    Transport(String),

    #[error("sandbox request timed out")]
    Timeout,

    #[error("sandbox server error: {status}")]
    Server { status: u16, body: String },

    #[error("sandbox rejected request ({status}): {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid JSON response from sandbox")]
    InvalidJson,
}

impl RetryableError for SandboxError {
    fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport(_) | Self::Timeout | Self::Server { .. }
        )
    }
}

/// Tool definition pushed to the sandbox at registration.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxToolDefinition {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tool_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub python_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_source_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_tool_name: Option<String>,
}

/// External-source config pushed to the sandbox for passthrough tools.
/// Auth values arrive resolved (decrypted) because the sandbox opens the
/// upstream connection itself.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxExternalSource {
    pub name: String,
    pub url: String,
    pub transport_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_header_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_header_value: Option<String>,
}

/// Full registration payload for `POST /servers/register`.
#[derive(Debug, Clone, Serialize)]
pub struct RegisterServerRequest {
    pub server_id: String,
    pub server_name: String,
    pub tools: Vec<SandboxToolDefinition>,
    pub allowed_modules: Vec<String>,
    pub secrets: std::collections::HashMap<String, String>,
    pub external_sources: Vec<SandboxExternalSource>,
    pub allowed_hosts: Option<Vec<String>>,
}

/// Outcome of a server registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterOutcome {
    pub success: bool,
    #[serde(default)]
    pub tools_registered: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub circuit_breaker_open: bool,
}

impl RegisterOutcome {
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            tools_registered: 0,
            error: Some(error.into()),
            circuit_breaker_open: false,
        }
    }
}

/// Outcome of direct code execution (`POST /execute`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
}

impl ExecutionOutcome {
    #[must_use]
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            result: None,
            error: Some(error.into()),
            stdout: None,
            duration_ms: None,
        }
    }
}

/// Request body for direct code execution.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteCodeRequest {
    pub code: String,
    pub arguments: Value,
    pub secrets: std::collections::HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_hosts: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_modules: Option<Vec<String>>,
    pub timeout_seconds: u64,
}

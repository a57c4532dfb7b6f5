// ABOUTME: OAuth 2.1 client for authorizing against external MCP servers
// ABOUTME: Discovery (RFC 9728/8414), dynamic registration (RFC 7591), PKCE, refresh with buffer

//! When an external MCP source declares `auth_type = oauth`, a
//! browser-mediated authorization-code-with-PKCE flow runs against the
//! upstream's advertised authorization server:
//!
//! 1. Probe the MCP URL with `initialize`; expect 401 + `WWW-Authenticate`
//!    pointing at Protected Resource Metadata (RFC 9728).
//! 2. Follow `authorization_servers[0]` to Authorization Server Metadata
//!    (RFC 8414).
//! 3. Register dynamically (RFC 7591) when no client id is configured.
//! 4. Hand the authorization URL to the UI; the callback exchanges the code
//!    and stores the encrypted token bundle on the source row.
//! 5. Before each outbound call the bundle is refreshed inside a 60-second
//!    expiry buffer.
//!
//! Pending flows are held in memory, single-use, and purged after ten
//! minutes; this deployment is single-instance by design.

use crate::constants::{
    aad, OAUTH_FLOW_EXPIRY_SECS, OAUTH_HTTP_TIMEOUT_SECS, OAUTH_REFRESH_BUFFER_SECS,
    OAUTH_USER_AGENT,
};
use crate::crypto::SecretCipher;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rand::RngCore;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

/// Failures in the OAuth flow.
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("OAuth discovery failed: {0}")]
    Discovery(String),
    #[error("OAuth token operation failed: {0}")]
    Token(String),
    #[error("{0}")]
    Flow(String),
}

/// Discovered OAuth configuration for an external MCP server.
#[derive(Debug, Clone)]
pub struct OAuthMetadata {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    pub registration_endpoint: Option<String>,
    pub resource: Option<String>,
    pub scopes_supported: Vec<String>,
    pub issuer: Option<String>,
}

/// State held while a browser authorization is in flight.
#[derive(Debug, Clone)]
pub struct OAuthFlowState {
    pub source_id: Uuid,
    pub code_verifier: String,
    pub redirect_uri: String,
    pub token_endpoint: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub created_at: Instant,
}

/// Tokens received from the authorization server.
#[derive(Debug, Clone)]
pub struct OAuthTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub token_endpoint: String,
    pub expires_at: Option<String>,
    pub scope: Option<String>,
}

/// Authorization URL handed to the UI, plus the issuer for display.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuthorizationRequest {
    pub auth_url: String,
    pub issuer: String,
}

/// In-memory store of pending flows keyed by `state`. Entries are
/// single-use and purged on every access once older than the expiry.
#[derive(Default)]
pub struct OAuthFlowStore {
    flows: std::sync::Mutex<HashMap<String, OAuthFlowState>>,
}

impl OAuthFlowStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_expired(flows: &mut HashMap<String, OAuthFlowState>) {
        let expiry = Duration::from_secs(OAUTH_FLOW_EXPIRY_SECS);
        flows.retain(|_, flow| flow.created_at.elapsed() <= expiry);
    }

    /// Store a pending flow under its state parameter.
    pub fn insert(&self, state: String, flow: OAuthFlowState) {
        if let Ok(mut flows) = self.flows.lock() {
            Self::purge_expired(&mut flows);
            flows.insert(state, flow);
        }
    }

    /// Take a pending flow; each state is redeemable once.
    #[must_use]
    pub fn pop(&self, state: &str) -> Option<OAuthFlowState> {
        let mut flows = self.flows.lock().ok()?;
        Self::purge_expired(&mut flows);
        flows.remove(state)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.flows.lock().map(|f| f.len()).unwrap_or(0)
    }
}

fn http_client() -> Result<reqwest::Client, OAuthError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(OAUTH_HTTP_TIMEOUT_SECS))
        .user_agent(OAUTH_USER_AGENT)
        .build()
        .map_err(|e| OAuthError::Discovery(format!("cannot build HTTP client: {e}")))
}

/// Generate a PKCE verifier (128 url-safe chars) and its S256 challenge.
#[must_use]
pub fn generate_pkce() -> (String, String) {
    let mut bytes = [0u8; 96];
    rand::thread_rng().fill_bytes(&mut bytes);
    let verifier = URL_SAFE_NO_PAD.encode(bytes);
    let digest = Sha256::digest(verifier.as_bytes());
    let challenge = URL_SAFE_NO_PAD.encode(digest);
    (verifier, challenge)
}

/// Extract the `resource_metadata` URL from a `WWW-Authenticate` header,
/// falling back to the well-known path at the MCP server origin.
#[must_use]
pub fn parse_resource_metadata_url(www_authenticate: &str, mcp_url: &str) -> String {
    for part in www_authenticate.split(',') {
        let part = part.trim();
        if let Some(value) = part
            .split_once("resource_metadata=")
            .map(|(_, value)| value.trim())
        {
            return value.trim_matches('"').to_string();
        }
    }

    Url::parse(mcp_url).map_or_else(
        |_| format!("{mcp_url}/.well-known/oauth-protected-resource"),
        |parsed| {
            format!(
                "{}://{}/.well-known/oauth-protected-resource",
                parsed.scheme(),
                parsed.authority()
            )
        },
    )
}

/// Probe the MCP endpoint and walk RFC 9728 → RFC 8414 discovery.
///
/// # Errors
///
/// [`OAuthError::Discovery`] when the server is reachable but does not
/// advertise OAuth, or any metadata fetch fails.
pub async fn discover_oauth_metadata(mcp_url: &str) -> Result<OAuthMetadata, OAuthError> {
    let client = http_client()?;

    let probe = client
        .post(mcp_url)
        .json(&json!({"jsonrpc": "2.0", "id": "probe", "method": "initialize", "params": {}}))
        .header("Accept", "application/json")
        .send()
        .await
        .map_err(|e| OAuthError::Discovery(format!("cannot reach external server: {e}")))?;

    match probe.status().as_u16() {
        200 => {
            return Err(OAuthError::Discovery(
                "Server returned 200 - it does not require OAuth authentication. \
                 Use auth_type 'none', 'bearer', or 'header' instead."
                    .into(),
            ))
        }
        401 => {}
        other => {
            return Err(OAuthError::Discovery(format!(
                "Expected 401 Unauthorized for OAuth discovery, got {other}. \
                 This server may not support OAuth authentication."
            )))
        }
    }

    let www_auth = probe
        .headers()
        .get("www-authenticate")
        .and_then(|h| h.to_str().ok())
        .unwrap_or("")
        .to_string();
    let prm_url = parse_resource_metadata_url(&www_auth, mcp_url);

    let prm: Value = fetch_json(&client, &prm_url)
        .await
        .map_err(|e| OAuthError::Discovery(format!(
            "failed to fetch Protected Resource Metadata from {prm_url}: {e}"
        )))?;

    let auth_server = prm
        .get("authorization_servers")
        .and_then(Value::as_array)
        .and_then(|servers| servers.first())
        .and_then(Value::as_str)
        .ok_or_else(|| {
            OAuthError::Discovery(
                "Protected Resource Metadata has no authorization_servers listed".into(),
            )
        })?
        .to_string();
    let resource = prm
        .get("resource")
        .and_then(Value::as_str)
        .map(str::to_string);

    let asm_url = authorization_server_metadata_url(&auth_server)?;
    let asm: Value = fetch_json(&client, &asm_url)
        .await
        .map_err(|e| OAuthError::Discovery(format!(
            "failed to fetch Authorization Server Metadata from {asm_url}: {e}"
        )))?;

    let authorization_endpoint = asm
        .get("authorization_endpoint")
        .and_then(Value::as_str)
        .map(str::to_string);
    let token_endpoint = asm
        .get("token_endpoint")
        .and_then(Value::as_str)
        .map(str::to_string);

    let (Some(authorization_endpoint), Some(token_endpoint)) =
        (authorization_endpoint, token_endpoint)
    else {
        return Err(OAuthError::Discovery(
            "Authorization Server Metadata missing required endpoints \
             (authorization_endpoint, token_endpoint)"
                .into(),
        ));
    };

    Ok(OAuthMetadata {
        authorization_endpoint,
        token_endpoint,
        registration_endpoint: asm
            .get("registration_endpoint")
            .and_then(Value::as_str)
            .map(str::to_string),
        resource,
        scopes_supported: asm
            .get("scopes_supported")
            .and_then(Value::as_array)
            .map(|scopes| {
                scopes
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        issuer: asm
            .get("issuer")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(Some(auth_server)),
    })
}

/// RFC 8414 metadata URL: well-known at the origin, path appended when the
/// issuer has one.
fn authorization_server_metadata_url(auth_server: &str) -> Result<String, OAuthError> {
    let parsed = Url::parse(auth_server)
        .map_err(|e| OAuthError::Discovery(format!("invalid authorization server URL: {e}")))?;
    let base = format!(
        "{}://{}/.well-known/oauth-authorization-server",
        parsed.scheme(),
        parsed.authority()
    );
    let path = parsed.path();
    if path.is_empty() || path == "/" {
        Ok(base)
    } else {
        Ok(format!("{base}{path}"))
    }
}

async fn fetch_json(client: &reqwest::Client, url: &str) -> Result<Value, String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("HTTP {}", response.status()));
    }
    response.json().await.map_err(|e| e.to_string())
}

/// Dynamic Client Registration (RFC 7591). Returns `(client_id,
/// client_secret?)`.
///
/// # Errors
///
/// [`OAuthError::Token`] when registration fails or omits a client id.
pub async fn register_client(
    registration_endpoint: &str,
    redirect_uri: &str,
) -> Result<(String, Option<String>), OAuthError> {
    let client = http_client()?;
    let response = client
        .post(registration_endpoint)
        .json(&json!({
            "client_name": "MCPbox",
            "redirect_uris": [redirect_uri],
            "grant_types": ["authorization_code"],
            "response_types": ["code"],
            "token_endpoint_auth_method": "none",
        }))
        .send()
        .await
        .map_err(|e| OAuthError::Token(format!("Dynamic Client Registration failed: {e}")))?;

    if !response.status().is_success() {
        return Err(OAuthError::Token(format!(
            "Dynamic Client Registration failed: HTTP {}",
            response.status()
        )));
    }

    let data: Value = response
        .json()
        .await
        .map_err(|e| OAuthError::Token(format!("Dynamic Client Registration failed: {e}")))?;

    let client_id = data
        .get("client_id")
        .and_then(Value::as_str)
        .ok_or_else(|| OAuthError::Token("DCR response missing client_id".into()))?
        .to_string();
    let client_secret = data
        .get("client_secret")
        .and_then(Value::as_str)
        .map(str::to_string);

    Ok((client_id, client_secret))
}

/// Start the authorization flow: discover, register if needed, generate
/// PKCE and state, park the flow, and return the authorization URL.
///
/// # Errors
///
/// Discovery, registration, or configuration failures.
pub async fn start_oauth_flow(
    store: &OAuthFlowStore,
    source_id: Uuid,
    mcp_url: &str,
    callback_url: &str,
    existing_client_id: Option<&str>,
) -> Result<AuthorizationRequest, OAuthError> {
    let metadata = discover_oauth_metadata(mcp_url).await?;

    let (client_id, client_secret) = match existing_client_id {
        Some(client_id) => (client_id.to_string(), None),
        None => match &metadata.registration_endpoint {
            Some(endpoint) => register_client(endpoint, callback_url).await?,
            None => {
                return Err(OAuthError::Flow(
                    "This server does not support Dynamic Client Registration and no \
                     client_id is configured. Please set a client_id on the external source."
                        .into(),
                ))
            }
        },
    };

    let (code_verifier, code_challenge) = generate_pkce();

    let mut state_bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut state_bytes);
    let state = URL_SAFE_NO_PAD.encode(state_bytes);

    store.insert(
        state.clone(),
        OAuthFlowState {
            source_id,
            code_verifier,
            redirect_uri: callback_url.to_string(),
            token_endpoint: metadata.token_endpoint.clone(),
            client_id: client_id.clone(),
            client_secret,
            created_at: Instant::now(),
        },
    );

    let mut params = vec![
        ("response_type", "code".to_string()),
        ("client_id", client_id),
        ("redirect_uri", callback_url.to_string()),
        ("state", state),
        ("code_challenge", code_challenge),
        ("code_challenge_method", "S256".to_string()),
    ];
    // Resource indicator (RFC 8707) binds the tokens to the MCP server.
    if let Some(resource) = &metadata.resource {
        params.push(("resource", resource.clone()));
    }
    if !metadata.scopes_supported.is_empty() {
        params.push(("scope", metadata.scopes_supported.join(" ")));
    }

    let query: String = params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    Ok(AuthorizationRequest {
        auth_url: format!("{}?{query}", metadata.authorization_endpoint),
        issuer: metadata.issuer.unwrap_or_default(),
    })
}

/// Redeem the callback: pop the flow by state (single-use) and exchange the
/// code for tokens.
///
/// # Errors
///
/// [`OAuthError::Token`] for an unknown/expired state or a failed exchange.
pub async fn exchange_code(
    store: &OAuthFlowStore,
    state: &str,
    code: &str,
) -> Result<(Uuid, OAuthTokens), OAuthError> {
    let flow = store
        .pop(state)
        .ok_or_else(|| OAuthError::Token("Invalid or expired OAuth state parameter".into()))?;

    let client = http_client()?;
    let mut form = vec![
        ("grant_type", "authorization_code".to_string()),
        ("code", code.to_string()),
        ("redirect_uri", flow.redirect_uri.clone()),
        ("client_id", flow.client_id.clone()),
        ("code_verifier", flow.code_verifier.clone()),
    ];
    if let Some(secret) = &flow.client_secret {
        form.push(("client_secret", secret.clone()));
    }

    let response = client
        .post(&flow.token_endpoint)
        .form(&form)
        .send()
        .await
        .map_err(|e| OAuthError::Token(format!("Token exchange failed: {e}")))?;

    if !response.status().is_success() {
        let status = response.status();
        let body: String = response.text().await.unwrap_or_default();
        let body = body.chars().take(500).collect::<String>();
        return Err(OAuthError::Token(format!(
            "Token exchange failed: HTTP {status}: {body}"
        )));
    }

    let data: Value = response
        .json()
        .await
        .map_err(|e| OAuthError::Token(format!("Token exchange failed: {e}")))?;

    let access_token = data
        .get("access_token")
        .and_then(Value::as_str)
        .ok_or_else(|| OAuthError::Token("Token response missing access_token".into()))?
        .to_string();

    Ok((
        flow.source_id,
        OAuthTokens {
            access_token,
            refresh_token: data
                .get("refresh_token")
                .and_then(Value::as_str)
                .map(str::to_string),
            token_endpoint: flow.token_endpoint,
            expires_at: expires_at_from(&data),
            scope: data.get("scope").and_then(Value::as_str).map(str::to_string),
        },
    ))
}

fn expires_at_from(data: &Value) -> Option<String> {
    data.get("expires_in")
        .and_then(Value::as_i64)
        .map(|expires_in| (Utc::now() + ChronoDuration::seconds(expires_in)).to_rfc3339())
}

/// Refresh an expired access token. `None` when no refresh token is
/// available or the refresh fails (caller proceeds with the stale token).
pub async fn refresh_access_token(tokens: &Value) -> Option<OAuthTokens> {
    let refresh_token = tokens.get("refresh_token")?.as_str()?.to_string();
    let token_endpoint = tokens.get("token_endpoint")?.as_str()?.to_string();
    let client_id = tokens
        .get("client_id")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let client = http_client().ok()?;
    let response = client
        .post(&token_endpoint)
        .form(&[
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.clone()),
            ("client_id", client_id),
        ])
        .send()
        .await
        .map_err(|e| tracing::warn!(error = %e, "token refresh failed"))
        .ok()?;

    if !response.status().is_success() {
        tracing::warn!(status = %response.status(), "token refresh rejected");
        return None;
    }

    let data: Value = response.json().await.ok()?;
    let access_token = data.get("access_token")?.as_str()?.to_string();

    Some(OAuthTokens {
        access_token,
        refresh_token: data
            .get("refresh_token")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(Some(refresh_token)),
        token_endpoint,
        expires_at: expires_at_from(&data),
        scope: data
            .get("scope")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| tokens.get("scope").and_then(Value::as_str).map(str::to_string)),
    })
}

/// Serialize and encrypt a token bundle for storage on the source row.
#[must_use]
pub fn encrypt_tokens(
    cipher: &SecretCipher,
    tokens: &OAuthTokens,
    client_id: Option<&str>,
) -> String {
    let mut data = json!({
        "access_token": tokens.access_token,
        "refresh_token": tokens.refresh_token,
        "token_endpoint": tokens.token_endpoint,
        "expires_at": tokens.expires_at,
        "scope": tokens.scope,
    });
    if let Some(client_id) = client_id {
        data["client_id"] = json!(client_id);
    }
    cipher.encrypt_to_base64(&data.to_string(), aad::OAUTH_TOKENS)
}

/// Decrypt a stored token bundle.
///
/// # Errors
///
/// [`OAuthError::Token`] when the blob cannot be decrypted or parsed.
pub fn decrypt_tokens(cipher: &SecretCipher, encrypted: &str) -> Result<Value, OAuthError> {
    let plaintext = cipher
        .decrypt_from_base64(encrypted, aad::OAUTH_TOKENS)
        .map_err(|_| OAuthError::Token("stored OAuth tokens are unavailable".into()))?;
    serde_json::from_str(&plaintext)
        .map_err(|_| OAuthError::Token("stored OAuth tokens are malformed".into()))
}

/// True when the access token expires within the refresh buffer. Tokens
/// without expiry information are assumed valid.
#[must_use]
pub fn is_token_expired(tokens: &Value) -> bool {
    let Some(expires_at) = tokens.get("expires_at").and_then(Value::as_str) else {
        return false;
    };
    DateTime::parse_from_rfc3339(expires_at).is_ok_and(|expiry| {
        Utc::now() >= expiry.with_timezone(&Utc) - ChronoDuration::seconds(OAUTH_REFRESH_BUFFER_SECS)
    })
}

/// Resolve the Authorization header for an OAuth source, refreshing first
/// when inside the expiry buffer. Returns the bearer value and, when a
/// refresh rotated the bundle, the new encrypted blob to persist.
///
/// # Errors
///
/// [`OAuthError::Token`] when the stored bundle is unusable.
pub async fn bearer_for_source(
    cipher: &SecretCipher,
    oauth_tokens_encrypted: &str,
    source_id: Uuid,
) -> Result<(String, Option<String>), OAuthError> {
    let mut tokens = decrypt_tokens(cipher, oauth_tokens_encrypted)?;
    let mut rotated = None;

    if is_token_expired(&tokens) {
        tracing::info!(%source_id, "OAuth token expired, attempting refresh");
        if let Some(new_tokens) = refresh_access_token(&tokens).await {
            tokens["access_token"] = json!(new_tokens.access_token);
            if let Some(refresh) = &new_tokens.refresh_token {
                tokens["refresh_token"] = json!(refresh);
            }
            if let Some(expires_at) = &new_tokens.expires_at {
                tokens["expires_at"] = json!(expires_at);
            }
            rotated = Some(cipher.encrypt_to_base64(&tokens.to_string(), aad::OAUTH_TOKENS));
        } else {
            tracing::warn!(%source_id, "token refresh failed, using potentially expired token");
        }
    }

    let access_token = tokens
        .get("access_token")
        .and_then(Value::as_str)
        .ok_or_else(|| OAuthError::Token("token bundle missing access_token".into()))?;

    Ok((format!("Bearer {access_token}"), rotated))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pkce_has_expected_shape() {
        let (verifier, challenge) = generate_pkce();
        assert_eq!(verifier.len(), 128);
        assert!(!challenge.contains('='));
        // S256 of the verifier, recomputed
        let digest = Sha256::digest(verifier.as_bytes());
        assert_eq!(challenge, URL_SAFE_NO_PAD.encode(digest));
    }

    #[test]
    fn parses_quoted_resource_metadata() {
        let header = r#"Bearer realm="mcp", resource_metadata="https://mcp.example.com/.well-known/oauth-protected-resource""#;
        assert_eq!(
            parse_resource_metadata_url(header, "https://mcp.example.com/mcp"),
            "https://mcp.example.com/.well-known/oauth-protected-resource"
        );
    }

    #[test]
    fn falls_back_to_well_known_origin() {
        assert_eq!(
            parse_resource_metadata_url("Bearer", "https://mcp.example.com/some/path"),
            "https://mcp.example.com/.well-known/oauth-protected-resource"
        );
    }

    #[test]
    fn expiry_buffer_counts_as_expired() {
        let soon = (Utc::now() + ChronoDuration::seconds(30)).to_rfc3339();
        assert!(is_token_expired(&json!({ "expires_at": soon })));

        let later = (Utc::now() + ChronoDuration::seconds(300)).to_rfc3339();
        assert!(!is_token_expired(&json!({ "expires_at": later })));

        assert!(!is_token_expired(&json!({})));
    }

    #[test]
    fn flow_store_is_single_use() {
        let store = OAuthFlowStore::new();
        store.insert(
            "state-1".into(),
            OAuthFlowState {
                source_id: Uuid::new_v4(),
                code_verifier: "v".into(),
                redirect_uri: "http://localhost/cb".into(),
                token_endpoint: "http://as/token".into(),
                client_id: "c".into(),
                client_secret: None,
                created_at: Instant::now(),
            },
        );
        assert!(store.pop("state-1").is_some());
        assert!(store.pop("state-1").is_none());
    }
}

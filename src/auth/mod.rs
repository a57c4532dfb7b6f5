// ABOUTME: Inbound request classification: local vs remote, token check, identity, failure budget
// ABOUTME: The 403 body is identical for missing and wrong tokens; repeat offenders get 429

pub mod email_policy_cache;
pub mod service_token_cache;

pub use email_policy_cache::EmailPolicyCache;
pub use service_token_cache::ServiceTokenCache;

use crate::constants::{FAILED_AUTH_MAX, FAILED_AUTH_WINDOW_SECS};
use crate::errors::AppError;
use dashmap::DashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};

/// Where a request entered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerSource {
    /// Same-machine client; no network traversal, no auth required.
    Local,
    /// Arrived through the edge proxy with a valid service token.
    Worker,
}

/// How the caller's identity was established.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// The edge verified the user against the OIDC issuer and forwarded the
    /// email; the service token proves edge provenance.
    Oidc,
}

/// The authenticated caller attached to each gateway request.
#[derive(Debug, Clone)]
pub struct AuthenticatedCaller {
    pub source: CallerSource,
    pub auth_method: Option<AuthMethod>,
    /// Verified user email. Present only when the email header passed the
    /// access policy; absent for anonymous remote callers (e.g. the
    /// upstream discovery service syncing tool lists).
    pub email: Option<String>,
}

impl AuthenticatedCaller {
    #[must_use]
    pub const fn local() -> Self {
        Self {
            source: CallerSource::Local,
            auth_method: None,
            email: None,
        }
    }

    /// Remote callers without a verified user identity may only perform the
    /// handshake and send notifications; tool names and tool execution are
    /// reserved for verified users.
    #[must_use]
    pub const fn requires_user_identity(&self) -> bool {
        matches!(self.source, CallerSource::Worker) && self.email.is_none()
    }
}

#[derive(Debug)]
struct FailureWindow {
    count: u32,
    first_failure: Instant,
}

/// Per-IP failed-auth budget. Counters age out after the window so a
/// legitimate client that fat-fingered its config recovers on its own.
pub struct AuthFailureTracker {
    attempts: DashMap<IpAddr, FailureWindow>,
    max_failures: u32,
    window: Duration,
}

impl Default for AuthFailureTracker {
    fn default() -> Self {
        Self::new(FAILED_AUTH_MAX, Duration::from_secs(FAILED_AUTH_WINDOW_SECS))
    }
}

impl AuthFailureTracker {
    #[must_use]
    pub fn new(max_failures: u32, window: Duration) -> Self {
        Self {
            attempts: DashMap::new(),
            max_failures,
            window,
        }
    }

    /// True when this IP has exhausted its failure budget.
    #[must_use]
    pub fn is_rate_limited(&self, ip: IpAddr) -> bool {
        if let Some(entry) = self.attempts.get(&ip) {
            if entry.first_failure.elapsed() > self.window {
                drop(entry);
                self.attempts.remove(&ip);
                return false;
            }
            return entry.count >= self.max_failures;
        }
        false
    }

    /// Record one failed attempt.
    pub fn record_failure(&self, ip: IpAddr) {
        let mut entry = self.attempts.entry(ip).or_insert_with(|| FailureWindow {
            count: 0,
            first_failure: Instant::now(),
        });
        if entry.first_failure.elapsed() > self.window {
            entry.count = 0;
            entry.first_failure = Instant::now();
        }
        entry.count += 1;
    }

    /// Clear an IP's counter after a successful authentication.
    pub fn record_success(&self, ip: IpAddr) {
        self.attempts.remove(&ip);
    }
}

/// Classify an inbound MCP request.
///
/// Local mode (no token configured, no cache errors) accepts everything.
/// Remote mode checks the failure budget, then the service token
/// (constant-time), then resolves the optional user identity through the
/// email policy.
///
/// # Errors
///
/// `429` when the source IP is over its failure budget, `403` with an
/// opaque message when the token is missing or wrong.
pub async fn verify_mcp_auth(
    token_cache: &ServiceTokenCache,
    email_policy: &EmailPolicyCache,
    failures: &AuthFailureTracker,
    service_token: Option<&str>,
    user_email: Option<&str>,
    peer_ip: IpAddr,
) -> Result<AuthenticatedCaller, AppError> {
    if !token_cache.is_auth_enabled().await {
        return Ok(AuthenticatedCaller::local());
    }

    if failures.is_rate_limited(peer_ip) {
        tracing::warn!(%peer_ip, "auth rate limit exceeded");
        return Err(AppError::auth_rate_limited());
    }

    let token_valid = match service_token {
        Some(token) => token_cache.verify_token(token).await,
        None => false,
    };

    if !token_valid {
        failures.record_failure(peer_ip);
        tracing::warn!(%peer_ip, "service token verification failed");
        return Err(AppError::auth_failed());
    }

    failures.record_success(peer_ip);

    // The email header is only trusted because the token proved the request
    // came through the edge, which did the OIDC verification.
    let mut verified_email = None;
    if let Some(email) = user_email {
        let (allowed, rule) = email_policy.check_email(email).await;
        if allowed {
            tracing::debug!(email, ?rule, "verified user identity");
            verified_email = Some(email.to_string());
        } else {
            tracing::warn!(email, "email rejected by access policy");
        }
    }

    Ok(AuthenticatedCaller {
        source: CallerSource::Worker,
        auth_method: Some(AuthMethod::Oidc),
        email: verified_email,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(last: u8) -> IpAddr {
        IpAddr::from([10, 99, 99, last])
    }

    #[test]
    fn rate_limit_triggers_after_max_failures() {
        let tracker = AuthFailureTracker::new(3, Duration::from_secs(60));
        let peer = ip(1);
        assert!(!tracker.is_rate_limited(peer));
        for _ in 0..3 {
            tracker.record_failure(peer);
        }
        assert!(tracker.is_rate_limited(peer));
    }

    #[test]
    fn rate_limit_allows_under_threshold() {
        let tracker = AuthFailureTracker::new(3, Duration::from_secs(60));
        let peer = ip(2);
        for _ in 0..2 {
            tracker.record_failure(peer);
        }
        assert!(!tracker.is_rate_limited(peer));
    }

    #[test]
    fn counters_age_out() {
        let tracker = AuthFailureTracker::new(1, Duration::from_millis(0));
        let peer = ip(3);
        tracker.record_failure(peer);
        std::thread::sleep(Duration::from_millis(5));
        assert!(!tracker.is_rate_limited(peer));
    }

    #[test]
    fn success_clears_counter() {
        let tracker = AuthFailureTracker::new(2, Duration::from_secs(60));
        let peer = ip(4);
        tracker.record_failure(peer);
        tracker.record_success(peer);
        tracker.record_failure(peer);
        assert!(!tracker.is_rate_limited(peer));
    }

    #[test]
    fn anonymous_worker_requires_identity() {
        let caller = AuthenticatedCaller {
            source: CallerSource::Worker,
            auth_method: Some(AuthMethod::Oidc),
            email: None,
        };
        assert!(caller.requires_user_identity());

        let verified = AuthenticatedCaller {
            email: Some("user@example.com".into()),
            ..caller
        };
        assert!(!verified.requires_user_identity());
        assert!(!AuthenticatedCaller::local().requires_user_identity());
    }
}

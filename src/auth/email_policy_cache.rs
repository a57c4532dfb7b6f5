// ABOUTME: Cached email access policy for verified-user identity checks
// ABOUTME: DB errors deny (fail closed); no configured policy allows any email

use crate::constants::{settings_keys, POLICY_CACHE_TTL_SECS};
use crate::database::Database;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Which rule matched, for audit logging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchedRule {
    /// No policy configured; everyone with a verified email is allowed.
    AnyEmail,
    /// Matched the explicit email allow-list.
    EmailList,
    /// Matched the allowed email domain.
    EmailDomain,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PolicyType {
    None,
    Emails,
    EmailDomain,
}

#[derive(Debug)]
struct PolicyState {
    policy_type: PolicyType,
    allowed_emails: Vec<String>,
    allowed_domain: Option<String>,
    db_error: bool,
    last_loaded: Option<Instant>,
}

impl Default for PolicyState {
    fn default() -> Self {
        Self {
            policy_type: PolicyType::None,
            allowed_emails: Vec::new(),
            allowed_domain: None,
            db_error: false,
            last_loaded: None,
        }
    }
}

impl PolicyState {
    fn is_fresh(&self, ttl: Duration) -> bool {
        self.last_loaded.is_some_and(|at| at.elapsed() < ttl)
    }
}

/// Cached view of the email access policy.
pub struct EmailPolicyCache {
    database: Database,
    ttl: Duration,
    state: RwLock<PolicyState>,
}

impl EmailPolicyCache {
    #[must_use]
    pub fn new(database: Database) -> Self {
        Self {
            database,
            ttl: Duration::from_secs(POLICY_CACHE_TTL_SECS),
            state: RwLock::new(PolicyState::default()),
        }
    }

    /// Check an email against the policy. Returns `(allowed, matched_rule)`.
    /// A DB error denies everyone until the next successful refresh.
    pub async fn check_email(&self, email: &str) -> (bool, Option<MatchedRule>) {
        self.refresh_if_stale().await;
        let state = self.state.read().await;

        if state.db_error {
            return (false, None);
        }

        let email = email.trim().to_lowercase();
        match state.policy_type {
            PolicyType::None => (true, Some(MatchedRule::AnyEmail)),
            PolicyType::Emails => {
                if state.allowed_emails.iter().any(|allowed| *allowed == email) {
                    (true, Some(MatchedRule::EmailList))
                } else {
                    (false, None)
                }
            }
            PolicyType::EmailDomain => {
                let domain_matches = state.allowed_domain.as_ref().is_some_and(|domain| {
                    email.rsplit_once('@').is_some_and(|(_, d)| d == domain)
                });
                if domain_matches {
                    (true, Some(MatchedRule::EmailDomain))
                } else {
                    (false, None)
                }
            }
        }
    }

    /// Force a reload on the next access.
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        state.last_loaded = None;
    }

    async fn refresh_if_stale(&self) {
        {
            let state = self.state.read().await;
            if state.is_fresh(self.ttl) {
                return;
            }
        }

        let loaded = self.load().await;
        let mut state = self.state.write().await;
        *state = loaded;
    }

    async fn load(&self) -> PolicyState {
        let mut state = PolicyState {
            last_loaded: Some(Instant::now()),
            ..PolicyState::default()
        };

        let policy_type = match self
            .database
            .get_setting(settings_keys::ACCESS_POLICY_TYPE)
            .await
        {
            Ok(setting) => setting.and_then(|s| s.value),
            Err(err) => {
                tracing::error!(error = %err, "failed to load email policy; denying remote users");
                state.db_error = true;
                return state;
            }
        };

        match policy_type.as_deref() {
            Some("emails") => {
                state.policy_type = PolicyType::Emails;
                match self
                    .database
                    .get_setting(settings_keys::ACCESS_POLICY_EMAILS)
                    .await
                {
                    Ok(setting) => {
                        let raw = setting.and_then(|s| s.value).unwrap_or_else(|| "[]".into());
                        let emails: Vec<String> = serde_json::from_str(&raw).unwrap_or_default();
                        state.allowed_emails =
                            emails.iter().map(|e| e.trim().to_lowercase()).collect();
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "failed to load email allow-list");
                        state.db_error = true;
                    }
                }
            }
            Some("email_domain") => {
                state.policy_type = PolicyType::EmailDomain;
                match self
                    .database
                    .get_setting(settings_keys::ACCESS_POLICY_EMAIL_DOMAIN)
                    .await
                {
                    Ok(setting) => {
                        state.allowed_domain = setting
                            .and_then(|s| s.value)
                            .map(|d| d.trim().to_lowercase());
                    }
                    Err(err) => {
                        tracing::error!(error = %err, "failed to load allowed email domain");
                        state.db_error = true;
                    }
                }
            }
            _ => state.policy_type = PolicyType::None,
        }

        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::settings_keys;

    async fn db() -> Database {
        Database::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn no_policy_allows_any_email() {
        let cache = EmailPolicyCache::new(db().await);
        let (allowed, rule) = cache.check_email("anyone@example.com").await;
        assert!(allowed);
        assert_eq!(rule, Some(MatchedRule::AnyEmail));
    }

    #[tokio::test]
    async fn email_list_policy_matches_exactly() {
        let database = db().await;
        database
            .set_setting(settings_keys::ACCESS_POLICY_TYPE, Some("emails"), false, None)
            .await
            .unwrap();
        database
            .set_setting(
                settings_keys::ACCESS_POLICY_EMAILS,
                Some(r#"["User@Example.com"]"#),
                false,
                None,
            )
            .await
            .unwrap();

        let cache = EmailPolicyCache::new(database);
        let (allowed, rule) = cache.check_email("user@example.com").await;
        assert!(allowed);
        assert_eq!(rule, Some(MatchedRule::EmailList));

        let (denied, _) = cache.check_email("other@example.com").await;
        assert!(!denied);
    }

    #[tokio::test]
    async fn domain_policy_matches_suffix_only() {
        let database = db().await;
        database
            .set_setting(
                settings_keys::ACCESS_POLICY_TYPE,
                Some("email_domain"),
                false,
                None,
            )
            .await
            .unwrap();
        database
            .set_setting(
                settings_keys::ACCESS_POLICY_EMAIL_DOMAIN,
                Some("example.com"),
                false,
                None,
            )
            .await
            .unwrap();

        let cache = EmailPolicyCache::new(database);
        assert!(cache.check_email("user@example.com").await.0);
        assert!(!cache.check_email("user@evil.com").await.0);
        assert!(!cache.check_email("userexample.com").await.0);
    }
}

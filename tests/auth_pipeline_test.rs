// ABOUTME: Auth pipeline tests: local vs remote classification, opaque 403s, 429 budget
// ABOUTME: Remote mode is driven by a real encrypted service token in the settings table

mod common;

use common::test_resources;
use mcpbox::auth::{verify_mcp_auth, AuthMethod, CallerSource};
use mcpbox::constants::{aad, settings_keys};
use mcpbox::errors::ErrorCode;
use mcpbox::services::SettingService;
use std::net::IpAddr;

const TOKEN: &str = "service-token-0123456789abcdef";

fn peer(last: u8) -> IpAddr {
    IpAddr::from([127, 0, 0, last])
}

async fn configure_remote_mode(resources: &mcpbox::context::ServerResources) {
    let settings = SettingService::new(resources.database.clone());
    settings
        .set_encrypted_value(
            &resources.cipher,
            settings_keys::SERVICE_TOKEN,
            TOKEN,
            aad::SERVICE_TOKEN,
            None,
        )
        .await
        .unwrap();
    resources.service_tokens.invalidate().await;
}

#[tokio::test]
async fn local_mode_accepts_requests_without_any_token() {
    let resources = test_resources().await;

    let caller = verify_mcp_auth(
        &resources.service_tokens,
        &resources.email_policy,
        &resources.auth_failures,
        None,
        None,
        peer(1),
    )
    .await
    .unwrap();

    assert_eq!(caller.source, CallerSource::Local);
    assert!(caller.auth_method.is_none());
    assert!(caller.email.is_none());
    assert!(!caller.requires_user_identity());
}

#[tokio::test]
async fn remote_mode_rejects_missing_and_wrong_tokens_identically() {
    let resources = test_resources().await;
    configure_remote_mode(&resources).await;

    let missing = verify_mcp_auth(
        &resources.service_tokens,
        &resources.email_policy,
        &resources.auth_failures,
        None,
        None,
        peer(2),
    )
    .await
    .unwrap_err();

    let wrong = verify_mcp_auth(
        &resources.service_tokens,
        &resources.email_policy,
        &resources.auth_failures,
        Some("wrong-token"),
        None,
        peer(2),
    )
    .await
    .unwrap_err();

    assert_eq!(missing.code, ErrorCode::AuthFailed);
    assert_eq!(wrong.code, ErrorCode::AuthFailed);
    // The body never reveals which of {missing, invalid} happened.
    assert_eq!(missing.message, wrong.message);
}

#[tokio::test]
async fn valid_token_yields_worker_caller_with_oidc() {
    let resources = test_resources().await;
    configure_remote_mode(&resources).await;

    let caller = verify_mcp_auth(
        &resources.service_tokens,
        &resources.email_policy,
        &resources.auth_failures,
        Some(TOKEN),
        None,
        peer(3),
    )
    .await
    .unwrap();

    assert_eq!(caller.source, CallerSource::Worker);
    assert_eq!(caller.auth_method, Some(AuthMethod::Oidc));
    // No email header: anonymous remote, restricted per-method.
    assert!(caller.requires_user_identity());
}

#[tokio::test]
async fn email_header_is_trusted_only_with_valid_token() {
    let resources = test_resources().await;
    configure_remote_mode(&resources).await;

    let caller = verify_mcp_auth(
        &resources.service_tokens,
        &resources.email_policy,
        &resources.auth_failures,
        Some(TOKEN),
        Some("user@example.com"),
        peer(4),
    )
    .await
    .unwrap();

    assert_eq!(caller.email.as_deref(), Some("user@example.com"));
    assert!(!caller.requires_user_identity());
}

#[tokio::test]
async fn email_policy_denial_downgrades_to_anonymous_remote() {
    let resources = test_resources().await;
    configure_remote_mode(&resources).await;

    let settings = SettingService::new(resources.database.clone());
    settings
        .set_value(settings_keys::ACCESS_POLICY_TYPE, "emails", None)
        .await
        .unwrap();
    settings
        .set_value(
            settings_keys::ACCESS_POLICY_EMAILS,
            r#"["allowed@example.com"]"#,
            None,
        )
        .await
        .unwrap();
    resources.email_policy.invalidate().await;

    let caller = verify_mcp_auth(
        &resources.service_tokens,
        &resources.email_policy,
        &resources.auth_failures,
        Some(TOKEN),
        Some("intruder@example.com"),
        peer(5),
    )
    .await
    .unwrap();

    // Still a worker (the token was valid) but without a verified identity.
    assert_eq!(caller.source, CallerSource::Worker);
    assert!(caller.email.is_none());
    assert!(caller.requires_user_identity());
}

#[tokio::test]
async fn repeated_failures_flip_403_to_429() {
    let resources = test_resources().await;
    configure_remote_mode(&resources).await;
    let ip = peer(6);

    for _ in 0..mcpbox::constants::FAILED_AUTH_MAX {
        let err = verify_mcp_auth(
            &resources.service_tokens,
            &resources.email_policy,
            &resources.auth_failures,
            Some("wrong"),
            None,
            ip,
        )
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::AuthFailed);
    }

    let limited = verify_mcp_auth(
        &resources.service_tokens,
        &resources.email_policy,
        &resources.auth_failures,
        Some("wrong"),
        None,
        ip,
    )
    .await
    .unwrap_err();
    assert_eq!(limited.code, ErrorCode::AuthRateLimited);

    // The budget is per IP: another peer still gets a plain 403.
    let other = verify_mcp_auth(
        &resources.service_tokens,
        &resources.email_policy,
        &resources.auth_failures,
        Some("wrong"),
        None,
        peer(7),
    )
    .await
    .unwrap_err();
    assert_eq!(other.code, ErrorCode::AuthFailed);
}

#[tokio::test]
async fn successful_auth_clears_the_failure_budget() {
    let resources = test_resources().await;
    configure_remote_mode(&resources).await;
    let ip = peer(8);

    for _ in 0..3 {
        let _ = verify_mcp_auth(
            &resources.service_tokens,
            &resources.email_policy,
            &resources.auth_failures,
            Some("wrong"),
            None,
            ip,
        )
        .await;
    }

    verify_mcp_auth(
        &resources.service_tokens,
        &resources.email_policy,
        &resources.auth_failures,
        Some(TOKEN),
        None,
        ip,
    )
    .await
    .unwrap();

    assert!(!resources.auth_failures.is_rate_limited(ip));
}

#[tokio::test]
async fn undecryptable_stored_token_fails_closed() {
    let resources = test_resources().await;

    // A blob encrypted under the wrong AAD domain cannot be decrypted as a
    // service token: remote mode engages with no usable token, denying all.
    let bogus = resources.cipher.encrypt_to_base64(TOKEN, aad::TUNNEL_TOKEN);
    resources
        .database
        .set_setting(settings_keys::SERVICE_TOKEN, Some(&bogus), true, None)
        .await
        .unwrap();
    resources.service_tokens.invalidate().await;

    assert!(resources.service_tokens.is_auth_enabled().await);

    let err = verify_mcp_auth(
        &resources.service_tokens,
        &resources.email_policy,
        &resources.auth_failures,
        Some(TOKEN),
        None,
        peer(9),
    )
    .await
    .unwrap_err();
    assert_eq!(err.code, ErrorCode::AuthFailed);
}

// ABOUTME: Configuration tests: the master key is a startup fatal, everything else has defaults
// ABOUTME: Serialized because process environment is shared state

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use mcpbox::config::ServerConfig;
use serial_test::serial;
use std::env;

fn clear_mcpbox_env() {
    for (key, _) in env::vars() {
        if key.starts_with("MCPBOX_") {
            env::remove_var(key);
        }
    }
}

#[test]
#[serial]
fn missing_master_key_is_fatal() {
    clear_mcpbox_env();
    let err = ServerConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("MCPBOX_MASTER_KEY"));
}

#[test]
#[serial]
fn short_master_key_is_rejected() {
    clear_mcpbox_env();
    env::set_var("MCPBOX_MASTER_KEY", BASE64.encode([1u8; 16]));
    let err = ServerConfig::from_env().unwrap_err();
    assert!(err.to_string().contains("32 bytes"));
    clear_mcpbox_env();
}

#[test]
#[serial]
fn invalid_base64_master_key_is_rejected() {
    clear_mcpbox_env();
    env::set_var("MCPBOX_MASTER_KEY", "!!not-base64!!");
    assert!(ServerConfig::from_env().is_err());
    clear_mcpbox_env();
}

#[test]
#[serial]
fn defaults_apply_when_only_the_key_is_set() {
    clear_mcpbox_env();
    env::set_var("MCPBOX_MASTER_KEY", BASE64.encode([9u8; 32]));

    let config = ServerConfig::from_env().unwrap();
    assert_eq!(config.http_port, 8000);
    assert_eq!(config.database_url, "sqlite:mcpbox.db");
    assert_eq!(config.sandbox_url, "http://sandbox:8001");
    assert!(config.sandbox_api_key.is_none());
    assert_eq!(config.master_key, [9u8; 32]);
    clear_mcpbox_env();
}

#[test]
#[serial]
fn environment_overrides_are_honored() {
    clear_mcpbox_env();
    env::set_var("MCPBOX_MASTER_KEY", BASE64.encode([9u8; 32]));
    env::set_var("MCPBOX_HTTP_PORT", "9100");
    env::set_var("MCPBOX_SANDBOX_URL", "http://localhost:7001");
    env::set_var("MCPBOX_SANDBOX_API_KEY", "sbx-key");

    let config = ServerConfig::from_env().unwrap();
    assert_eq!(config.http_port, 9100);
    assert_eq!(config.sandbox_url, "http://localhost:7001");
    assert_eq!(config.sandbox_api_key.as_deref(), Some("sbx-key"));
    clear_mcpbox_env();
}

#[test]
#[serial]
fn invalid_numeric_values_are_errors_not_defaults() {
    clear_mcpbox_env();
    env::set_var("MCPBOX_MASTER_KEY", BASE64.encode([9u8; 32]));
    env::set_var("MCPBOX_HTTP_PORT", "not-a-port");
    assert!(ServerConfig::from_env().is_err());
    clear_mcpbox_env();
}

//! Tests for `Config::from_env`. They mutate process environment variables,
//! so every test holds `ENV_LOCK`.

use std::env;
use std::sync::Mutex;

use once_cell::sync::Lazy;

use super::*;

static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

const VARS: &[&str] = &[
    "SMTP_ENGINE_DOMAIN",
    "SMTP_ENGINE_BIND_ADDRESS",
    "SMTP_ENGINE_PORT",
    "SMTP_ENGINE_IPV6",
    "SMTP_ENGINE_ALLOW_REMOTE",
    "SMTP_ENGINE_REQUIRE_AUTH",
    "SMTP_ENGINE_AUTH_MECHANISMS",
    "SMTP_ENGINE_SECURE_AUTH_MECHANISMS",
    "SMTP_ENGINE_TLS_MODE",
    "SMTP_ENGINE_TLS_CERT_PATH",
    "SMTP_ENGINE_TLS_KEY_PATH",
    "SMTP_ENGINE_TLS_PROTOCOLS",
    "SMTP_ENGINE_TLS_CIPHER_SUITES",
    "SMTP_ENGINE_MAX_MESSAGE_SIZE",
    "SMTP_ENGINE_MAX_BAD_COMMANDS",
    "SMTP_ENGINE_IDLE_TIMEOUT_SECS",
    "SMTP_ENGINE_MESSAGE_STORE",
    "SMTP_ENGINE_FALLBACK_ENCODING",
];

fn clear_test_env_vars() {
    for var in VARS {
        env::remove_var(var);
    }
}

#[test]
fn test_config_default_values() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_test_env_vars();

    let config = Config::from_env().expect("Config loading failed with no vars set");

    assert_eq!(config.domain, "localhost");
    assert_eq!(config.bind_address, None);
    assert_eq!(config.port, 2525);
    assert!(!config.ipv6);
    assert!(!config.allow_remote);
    assert!(!config.require_auth);
    assert_eq!(config.auth_mechanisms, vec!["PLAIN", "LOGIN", "CRAM-MD5"]);
    assert_eq!(config.tls_mode, TlsMode::None);
    assert!(config.tls_protocols.is_empty());
    assert_eq!(config.max_message_size, 0);
    assert_eq!(config.max_bad_commands, 10);
    assert_eq!(config.idle_timeout_secs, 300);
    assert_eq!(config.message_store, MessageStore::Memory);
    assert_eq!(config.fallback_encoding, FallbackEncoding::Latin1);
}

#[test]
fn test_config_from_env_all_set() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_test_env_vars();

    env::set_var("SMTP_ENGINE_DOMAIN", "mx.example.test");
    env::set_var("SMTP_ENGINE_BIND_ADDRESS", "0.0.0.0");
    env::set_var("SMTP_ENGINE_PORT", "3025");
    env::set_var("SMTP_ENGINE_ALLOW_REMOTE", "true");
    env::set_var("SMTP_ENGINE_REQUIRE_AUTH", "yes");
    env::set_var("SMTP_ENGINE_AUTH_MECHANISMS", "cram-md5");
    env::set_var("SMTP_ENGINE_SECURE_AUTH_MECHANISMS", "plain, login");
    env::set_var("SMTP_ENGINE_TLS_MODE", "starttls");
    env::set_var("SMTP_ENGINE_TLS_PROTOCOLS", "TLSv1.3");
    env::set_var("SMTP_ENGINE_MAX_MESSAGE_SIZE", "1048576");
    env::set_var("SMTP_ENGINE_MAX_BAD_COMMANDS", "3");
    env::set_var("SMTP_ENGINE_IDLE_TIMEOUT_SECS", "0");
    env::set_var("SMTP_ENGINE_MESSAGE_STORE", "file:/var/spool/smtp");
    env::set_var("SMTP_ENGINE_FALLBACK_ENCODING", "ascii");

    let config = Config::from_env().expect("Config loading failed when all vars were set");
    clear_test_env_vars();

    assert_eq!(config.domain, "mx.example.test");
    assert_eq!(config.bind_address, Some("0.0.0.0".parse().unwrap()));
    assert_eq!(config.port, 3025);
    assert!(config.allow_remote);
    assert!(config.require_auth);
    assert_eq!(config.auth_mechanisms, vec!["CRAM-MD5"]);
    assert_eq!(config.secure_auth_mechanisms, vec!["PLAIN", "LOGIN"]);
    assert_eq!(config.tls_mode, TlsMode::StartTls);
    assert_eq!(config.tls_protocols, vec![TlsProtocol::Tls13]);
    assert_eq!(config.max_message_size, 1_048_576);
    assert_eq!(config.max_bad_commands, 3);
    assert_eq!(config.idle_timeout_secs, 0);
    assert_eq!(
        config.message_store,
        MessageStore::File(Some(PathBuf::from("/var/spool/smtp")))
    );
    assert_eq!(config.fallback_encoding, FallbackEncoding::Ascii);

    let options = config.to_server_options().unwrap();
    assert_eq!(options.domain_name(), "mx.example.test");
    assert_eq!(options.listen_address(), "0.0.0.0:3025".parse().unwrap());
    assert!(options.authentication_required());
    assert!(options.is_auth_mechanism_enabled("PLAIN", true));
    assert!(!options.is_auth_mechanism_enabled("PLAIN", false));
    assert_eq!(options.tls_mode(), TlsMode::StartTls);
    assert!(options.tls_config().is_some());
    assert_eq!(options.idle_timeout(), None);
}

#[test]
fn test_config_invalid_values_name_the_variable() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_test_env_vars();

    let cases = [
        ("SMTP_ENGINE_PORT", "not-a-port"),
        ("SMTP_ENGINE_BIND_ADDRESS", "somewhere"),
        ("SMTP_ENGINE_REQUIRE_AUTH", "maybe"),
        ("SMTP_ENGINE_TLS_MODE", "sometimes"),
        ("SMTP_ENGINE_TLS_PROTOCOLS", "SSLv3"),
        ("SMTP_ENGINE_MAX_BAD_COMMANDS", "-1"),
        ("SMTP_ENGINE_MESSAGE_STORE", "database"),
        ("SMTP_ENGINE_FALLBACK_ENCODING", "ebcdic"),
    ];
    for (var, value) in cases {
        env::set_var(var, value);
        let error = Config::from_env().expect_err(var);
        let message = format!("{error:#}");
        assert!(message.contains(var), "{message}");
        assert!(message.contains(value), "{message}");
        env::remove_var(var);
    }
}

#[test]
fn test_tls_paths_must_be_set_together() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_test_env_vars();

    env::set_var("SMTP_ENGINE_TLS_MODE", "implicit");
    env::set_var("SMTP_ENGINE_TLS_CERT_PATH", "/etc/ssl/cert.pem");
    let config = Config::from_env().unwrap();
    clear_test_env_vars();

    let error = config.to_server_options().unwrap_err();
    assert!(error.to_string().contains("must be set together"));
}

#[test]
fn test_config_round_trips_through_json() {
    let _lock = ENV_LOCK.lock().unwrap_or_else(|p| p.into_inner());
    clear_test_env_vars();

    let config = Config::from_env().unwrap();
    let json = serde_json::to_string(&config).unwrap();
    let parsed: Config = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed.port, config.port);
    assert_eq!(parsed.tls_mode, config.tls_mode);
}

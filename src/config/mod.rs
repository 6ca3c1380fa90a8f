use std::env;
use std::fmt::Display;
use std::net::IpAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::smtp::message::MessageStore;
use crate::smtp::options::{IpVersion, ServerOptions, TlsMode};
use crate::smtp::tls::{build_server_config, TlsIdentity, TlsProtocol};
use crate::smtp::transport::FallbackEncoding;

const DEFAULT_MECHANISMS: &str = "PLAIN,LOGIN,CRAM-MD5";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Domain announced in the greeting and EHLO response
    pub domain: String,

    /// Explicit address to bind to; derived from `ipv6`/`allow_remote` when unset
    pub bind_address: Option<IpAddr>,

    pub port: u16,

    pub ipv6: bool,

    /// Accept connections from non-loopback peers
    pub allow_remote: bool,

    /// Require AUTH before MAIL FROM
    pub require_auth: bool,

    /// Mechanisms offered on unencrypted channels
    pub auth_mechanisms: Vec<String>,

    /// Mechanisms offered once the channel is secured
    pub secure_auth_mechanisms: Vec<String>,

    pub tls_mode: TlsMode,

    pub tls_cert_path: Option<PathBuf>,

    pub tls_key_path: Option<PathBuf>,

    /// Allowed protocol versions; empty offers every supported version
    pub tls_protocols: Vec<TlsProtocol>,

    /// Cipher suite allow-list; empty keeps the provider defaults
    pub tls_cipher_suites: Vec<String>,

    /// Maximum message size in bytes, 0 for unlimited
    pub max_message_size: u64,

    pub max_bad_commands: u32,

    /// Seconds without a command before the connection is dropped, 0 to disable
    pub idle_timeout_secs: u64,

    pub message_store: MessageStore,

    pub fallback_encoding: FallbackEncoding,
}

fn optional_var<T>(name: &str, default: T) -> Result<T>
where
    T: FromStr + Display,
    T::Err: Display,
{
    match env::var(name) {
        Ok(raw) => {
            let value = raw.trim().parse::<T>().map_err(|e| {
                let err_msg = format!("{} ('{}') is invalid", name, raw);
                log::error!("{}: {}", err_msg, e);
                anyhow!("{}", e).context(err_msg)
            })?;
            log::info!("Config: Using {} from env: {}", name, value);
            Ok(value)
        }
        Err(_) => {
            log::info!("Config: Using default {}: {}", name, default);
            Ok(default)
        }
    }
}

fn optional_path(name: &str) -> Option<PathBuf> {
    let path = env::var(name).ok().filter(|v| !v.trim().is_empty()).map(PathBuf::from);
    if let Some(path) = &path {
        log::info!("Config: Using {}: {}", name, path.display());
    }
    path
}

fn list_var(name: &str, default: &str) -> Vec<String> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let values: Vec<String> = raw
        .split(',')
        .map(|v| v.trim().to_ascii_uppercase())
        .filter(|v| !v.is_empty())
        .collect();
    log::info!("Config: Using {}: {:?}", name, values);
    values
}

fn parse_bool(name: &str, default: bool) -> Result<bool> {
    let raw = match env::var(name) {
        Ok(raw) => raw,
        Err(_) => {
            log::info!("Config: Using default {}: {}", name, default);
            return Ok(default);
        }
    };
    let value = match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => {
            let err_msg = format!("{} ('{}') must be a boolean", name, raw);
            log::error!("{}", err_msg);
            return Err(anyhow!(err_msg));
        }
    };
    log::info!("Config: Using {} from env: {}", name, value);
    Ok(value)
}

fn parse_tls_mode(raw: &str) -> Result<TlsMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "" | "none" | "off" => Ok(TlsMode::None),
        "starttls" => Ok(TlsMode::StartTls),
        "implicit" | "implicittls" | "smtps" => Ok(TlsMode::ImplicitTls),
        other => Err(anyhow!("unknown TLS mode '{}'", other)),
    }
}

fn parse_message_store(raw: &str) -> Result<MessageStore> {
    let raw = raw.trim();
    match raw.to_ascii_lowercase().as_str() {
        "" | "memory" => return Ok(MessageStore::Memory),
        "file" => return Ok(MessageStore::File(None)),
        _ => {}
    }
    match raw.split_once(':') {
        Some((kind, dir)) if kind.eq_ignore_ascii_case("file") && !dir.is_empty() => {
            Ok(MessageStore::File(Some(PathBuf::from(dir))))
        }
        _ => Err(anyhow!("unknown message store '{}'", raw)),
    }
}

/// Reads `name` and converts it with `parse`, reporting the variable on failure.
fn parsed_var<T: std::fmt::Debug>(name: &str, default: &str, parse: fn(&str) -> Result<T>) -> Result<T> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    let value = parse(&raw).with_context(|| format!("{} ('{}') is invalid", name, raw))?;
    log::info!("Config: Using {}: {:?}", name, value);
    Ok(value)
}

impl Config {
    /// Load configuration from `SMTP_ENGINE_*` environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (optional)
        let _ = dotenv::dotenv();

        let domain = env::var("SMTP_ENGINE_DOMAIN").unwrap_or_else(|_| "localhost".to_string());
        log::info!("Config: Using domain: {}", domain);

        let bind_address = match env::var("SMTP_ENGINE_BIND_ADDRESS") {
            Ok(raw) if !raw.trim().is_empty() => {
                let address = raw.trim().parse::<IpAddr>().map_err(|e| {
                    let err_msg = format!("SMTP_ENGINE_BIND_ADDRESS ('{}') must be an IP address", raw);
                    log::error!("{}: {}", err_msg, e);
                    anyhow!(e).context(err_msg)
                })?;
                log::info!("Config: Using bind_address from env: {}", address);
                Some(address)
            }
            _ => None,
        };

        let port = optional_var("SMTP_ENGINE_PORT", 2525u16)?;
        let ipv6 = parse_bool("SMTP_ENGINE_IPV6", false)?;
        let allow_remote = parse_bool("SMTP_ENGINE_ALLOW_REMOTE", false)?;
        let require_auth = parse_bool("SMTP_ENGINE_REQUIRE_AUTH", false)?;

        let auth_mechanisms = list_var("SMTP_ENGINE_AUTH_MECHANISMS", DEFAULT_MECHANISMS);
        let secure_auth_mechanisms = list_var("SMTP_ENGINE_SECURE_AUTH_MECHANISMS", DEFAULT_MECHANISMS);

        let tls_mode = parsed_var("SMTP_ENGINE_TLS_MODE", "none", parse_tls_mode)?;
        let tls_cert_path = optional_path("SMTP_ENGINE_TLS_CERT_PATH");
        let tls_key_path = optional_path("SMTP_ENGINE_TLS_KEY_PATH");
        let tls_protocols = parsed_var("SMTP_ENGINE_TLS_PROTOCOLS", "", |raw| {
            raw.split(',')
                .filter(|p| !p.trim().is_empty())
                .map(str::parse::<TlsProtocol>)
                .collect()
        })?;
        let tls_cipher_suites = list_var("SMTP_ENGINE_TLS_CIPHER_SUITES", "");

        let max_message_size = optional_var("SMTP_ENGINE_MAX_MESSAGE_SIZE", 0u64)?;
        let max_bad_commands = optional_var("SMTP_ENGINE_MAX_BAD_COMMANDS", 10u32)?;
        let idle_timeout_secs = optional_var("SMTP_ENGINE_IDLE_TIMEOUT_SECS", 300u64)?;

        let message_store = parsed_var("SMTP_ENGINE_MESSAGE_STORE", "memory", parse_message_store)?;
        let fallback_encoding = parsed_var("SMTP_ENGINE_FALLBACK_ENCODING", "latin1", |raw| {
            raw.trim().parse::<FallbackEncoding>().map_err(|e| anyhow!(e))
        })?;

        Ok(Config {
            domain,
            bind_address,
            port,
            ipv6,
            allow_remote,
            require_auth,
            auth_mechanisms,
            secure_auth_mechanisms,
            tls_mode,
            tls_cert_path,
            tls_key_path,
            tls_protocols,
            tls_cipher_suites,
            max_message_size,
            max_bad_commands,
            idle_timeout_secs,
            message_store,
            fallback_encoding,
        })
    }

    /// Builds the engine options, loading or generating TLS material when
    /// a TLS mode is configured.
    pub fn to_server_options(&self) -> Result<ServerOptions> {
        let mut builder = ServerOptions::builder()
            .domain_name(&self.domain)
            .port(self.port)
            .ip_version(if self.ipv6 { IpVersion::V6 } else { IpVersion::V4 })
            .allow_remote_connections(self.allow_remote)
            .authentication_required(self.require_auth)
            .insecure_auth_mechanisms(self.auth_mechanisms.iter())
            .secure_auth_mechanisms(self.secure_auth_mechanisms.iter())
            .max_message_size(self.max_message_size)
            .max_bad_commands(self.max_bad_commands)
            .idle_timeout((self.idle_timeout_secs > 0).then(|| Duration::from_secs(self.idle_timeout_secs)))
            .message_store(self.message_store.clone())
            .fallback_encoding(self.fallback_encoding);

        if let Some(address) = self.bind_address {
            builder = builder.bind_address(address);
        }

        if self.tls_mode != TlsMode::None {
            let identity = match (&self.tls_cert_path, &self.tls_key_path) {
                (Some(cert), Some(key)) => TlsIdentity::from_pem_files(cert, key)?,
                (None, None) => TlsIdentity::self_signed(&self.domain)?,
                _ => {
                    return Err(anyhow!(
                        "SMTP_ENGINE_TLS_CERT_PATH and SMTP_ENGINE_TLS_KEY_PATH must be set together"
                    ))
                }
            };
            let tls_config = build_server_config(identity, &self.tls_protocols, &self.tls_cipher_suites)
                .context("Failed to build TLS configuration")?;
            builder = builder.tls(self.tls_mode, tls_config);
        }

        Ok(builder.build())
    }
}

#[cfg(test)]
mod tests;

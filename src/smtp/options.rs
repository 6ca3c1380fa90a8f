//! Immutable server options and their builder.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use rustls::ServerConfig as RustlsServerConfig;
use serde::{Deserialize, Serialize};

use super::auth::AuthMechanismMap;
use super::message::MessageStore;
use super::transport::{FallbackEncoding, DEFAULT_MAX_LINE_LENGTH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum IpVersion {
    #[default]
    V4,
    V6,
}

/// How TLS is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    #[default]
    None,
    /// Plain connect, upgraded on `STARTTLS`.
    StartTls,
    /// TLS from the first byte.
    ImplicitTls,
}

#[derive(Debug, Clone)]
pub struct ServerOptions {
    domain_name: String,
    bind_address: Option<IpAddr>,
    port: u16,
    ip_version: IpVersion,
    allow_remote_connections: bool,
    authentication_required: bool,
    auth_mechanisms: AuthMechanismMap,
    insecure_auth_mechanisms: Vec<String>,
    secure_auth_mechanisms: Vec<String>,
    tls_mode: TlsMode,
    tls_config: Option<Arc<RustlsServerConfig>>,
    max_message_size: u64,
    max_bad_commands: u32,
    idle_timeout: Option<Duration>,
    message_store: MessageStore,
    fallback_encoding: FallbackEncoding,
    max_line_length: usize,
}

impl ServerOptions {
    pub fn builder() -> ServerOptionsBuilder {
        ServerOptionsBuilder::default()
    }

    pub fn domain_name(&self) -> &str {
        &self.domain_name
    }

    /// Address the listener binds. Without an explicit bind address this is
    /// loopback, or the unspecified address when remote connections are
    /// allowed, in the configured IP family.
    pub fn listen_address(&self) -> SocketAddr {
        let ip = self.bind_address.unwrap_or(match (self.ip_version, self.allow_remote_connections) {
            (IpVersion::V4, false) => IpAddr::V4(Ipv4Addr::LOCALHOST),
            (IpVersion::V4, true) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            (IpVersion::V6, false) => IpAddr::V6(Ipv6Addr::LOCALHOST),
            (IpVersion::V6, true) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
        });
        SocketAddr::new(ip, self.port)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn ip_version(&self) -> IpVersion {
        self.ip_version
    }

    pub fn allow_remote_connections(&self) -> bool {
        self.allow_remote_connections
    }

    pub fn authentication_required(&self) -> bool {
        self.authentication_required
    }

    pub fn auth_mechanisms(&self) -> &AuthMechanismMap {
        &self.auth_mechanisms
    }

    /// Mechanism identifiers permitted on a channel of the given security.
    pub fn enabled_auth_mechanisms(&self, secure: bool) -> &[String] {
        if secure {
            &self.secure_auth_mechanisms
        } else {
            &self.insecure_auth_mechanisms
        }
    }

    pub fn is_auth_mechanism_enabled(&self, identifier: &str, secure: bool) -> bool {
        self.enabled_auth_mechanisms(secure)
            .iter()
            .any(|m| m.eq_ignore_ascii_case(identifier))
    }

    pub fn tls_mode(&self) -> TlsMode {
        self.tls_mode
    }

    pub fn tls_config(&self) -> Option<&Arc<RustlsServerConfig>> {
        self.tls_config.as_ref()
    }

    /// Zero means unlimited.
    pub fn max_message_size(&self) -> u64 {
        self.max_message_size
    }

    pub fn max_bad_commands(&self) -> u32 {
        self.max_bad_commands
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout
    }

    pub fn message_store(&self) -> &MessageStore {
        &self.message_store
    }

    pub fn fallback_encoding(&self) -> FallbackEncoding {
        self.fallback_encoding
    }

    pub fn max_line_length(&self) -> usize {
        self.max_line_length
    }
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptionsBuilder::default().build()
    }
}

/// Fluent builder for [`ServerOptions`].
///
/// ```
/// use smtp_engine::smtp::options::ServerOptions;
///
/// let options = ServerOptions::builder()
///     .domain_name("mx.example.test")
///     .port(0)
///     .max_bad_commands(3)
///     .build();
/// assert_eq!(options.max_bad_commands(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct ServerOptionsBuilder {
    options: ServerOptions,
}

impl Default for ServerOptionsBuilder {
    fn default() -> Self {
        let defaults = vec!["PLAIN".to_string(), "LOGIN".to_string(), "CRAM-MD5".to_string()];
        Self {
            options: ServerOptions {
                domain_name: "localhost".to_string(),
                bind_address: None,
                port: 25,
                ip_version: IpVersion::V4,
                allow_remote_connections: false,
                authentication_required: false,
                auth_mechanisms: AuthMechanismMap::with_defaults(),
                insecure_auth_mechanisms: defaults.clone(),
                secure_auth_mechanisms: defaults,
                tls_mode: TlsMode::None,
                tls_config: None,
                max_message_size: 0,
                max_bad_commands: 10,
                idle_timeout: Some(Duration::from_secs(300)),
                message_store: MessageStore::Memory,
                fallback_encoding: FallbackEncoding::Latin1,
                max_line_length: DEFAULT_MAX_LINE_LENGTH,
            },
        }
    }
}

impl ServerOptionsBuilder {
    pub fn domain_name(mut self, domain_name: impl Into<String>) -> Self {
        self.options.domain_name = domain_name.into();
        self
    }

    pub fn bind_address(mut self, address: IpAddr) -> Self {
        self.options.bind_address = Some(address);
        self
    }

    /// Zero picks a free port at start.
    pub fn port(mut self, port: u16) -> Self {
        self.options.port = port;
        self
    }

    pub fn ip_version(mut self, ip_version: IpVersion) -> Self {
        self.options.ip_version = ip_version;
        self
    }

    pub fn allow_remote_connections(mut self, allow: bool) -> Self {
        self.options.allow_remote_connections = allow;
        self
    }

    pub fn authentication_required(mut self, required: bool) -> Self {
        self.options.authentication_required = required;
        self
    }

    pub fn auth_mechanisms(mut self, mechanisms: AuthMechanismMap) -> Self {
        self.options.auth_mechanisms = mechanisms;
        self
    }

    pub fn insecure_auth_mechanisms<I, S>(mut self, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.insecure_auth_mechanisms = identifiers.into_iter().map(Into::into).collect();
        self
    }

    pub fn secure_auth_mechanisms<I, S>(mut self, identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.secure_auth_mechanisms = identifiers.into_iter().map(Into::into).collect();
        self
    }

    /// Enables TLS in `mode` with `config`.
    pub fn tls(mut self, mode: TlsMode, config: Arc<RustlsServerConfig>) -> Self {
        self.options.tls_mode = mode;
        self.options.tls_config = match mode {
            TlsMode::None => None,
            _ => Some(config),
        };
        self
    }

    pub fn max_message_size(mut self, bytes: u64) -> Self {
        self.options.max_message_size = bytes;
        self
    }

    pub fn max_bad_commands(mut self, count: u32) -> Self {
        self.options.max_bad_commands = count;
        self
    }

    /// `None` disables the idle timeout.
    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.options.idle_timeout = timeout;
        self
    }

    pub fn message_store(mut self, store: MessageStore) -> Self {
        self.options.message_store = store;
        self
    }

    pub fn fallback_encoding(mut self, encoding: FallbackEncoding) -> Self {
        self.options.fallback_encoding = encoding;
        self
    }

    pub fn max_line_length(mut self, bytes: usize) -> Self {
        self.options.max_line_length = bytes;
        self
    }

    pub fn build(self) -> ServerOptions {
        self.options
    }
}

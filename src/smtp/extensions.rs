//! ESMTP extensions.
//!
//! An extension advertises EHLO keywords and, when a connection is set up,
//! registers whatever verbs and parameter processors it needs.

use std::sync::Arc;

use super::connection::Connection;
use super::options::{ServerOptions, TlsMode};
use super::parameters::{
    AuthParameterProcessor, BodyParameterProcessor, SizeParameterProcessor, SmtpUtf8ParameterProcessor,
};
use super::verbs::{AuthVerb, StartTlsVerb};

pub trait Extension: Send + Sync {
    /// Keywords for the EHLO reply, given the connection's current state.
    fn ehlo_keywords(&self, connection: &Connection) -> Vec<String>;

    /// Installs verbs and parameter processors on a new connection.
    fn register(&self, _connection: &mut Connection) {}
}

/// Extensions enabled by `options`, before the host gets a say.
pub fn default_extensions(options: &ServerOptions) -> Vec<Arc<dyn Extension>> {
    let mut extensions: Vec<Arc<dyn Extension>> = vec![
        Arc::new(EightBitMimeExtension),
        Arc::new(SizeExtension),
        Arc::new(SmtpUtf8Extension),
    ];
    if options.tls_mode() == TlsMode::StartTls && options.tls_config().is_some() {
        extensions.push(Arc::new(StartTlsExtension));
    }
    if !options.enabled_auth_mechanisms(false).is_empty() || !options.enabled_auth_mechanisms(true).is_empty() {
        extensions.push(Arc::new(AuthExtension));
    }
    extensions
}

/// `8BITMIME` and the `BODY` parameter.
pub struct EightBitMimeExtension;

impl Extension for EightBitMimeExtension {
    fn ehlo_keywords(&self, _connection: &Connection) -> Vec<String> {
        vec!["8BITMIME".to_string()]
    }

    fn register(&self, connection: &mut Connection) {
        connection
            .mail_from_parameters_mut()
            .set_processor("BODY", Arc::new(BodyParameterProcessor));
    }
}

/// `SIZE [max]` and the `SIZE` parameter.
pub struct SizeExtension;

impl Extension for SizeExtension {
    fn ehlo_keywords(&self, connection: &Connection) -> Vec<String> {
        match connection.options().max_message_size() {
            0 => vec!["SIZE".to_string()],
            max => vec![format!("SIZE {max}")],
        }
    }

    fn register(&self, connection: &mut Connection) {
        connection
            .mail_from_parameters_mut()
            .set_processor("SIZE", Arc::new(SizeParameterProcessor));
    }
}

pub struct SmtpUtf8Extension;

impl Extension for SmtpUtf8Extension {
    fn ehlo_keywords(&self, _connection: &Connection) -> Vec<String> {
        vec!["SMTPUTF8".to_string()]
    }

    fn register(&self, connection: &mut Connection) {
        connection
            .mail_from_parameters_mut()
            .set_processor("SMTPUTF8", Arc::new(SmtpUtf8ParameterProcessor));
    }
}

/// Offered on plain channels only, when the host allows TLS.
///
/// The host is consulted by `EHLO` just before the reply is built; see
/// [`Connection::refresh_tls_available`].
pub struct StartTlsExtension;

impl Extension for StartTlsExtension {
    fn ehlo_keywords(&self, connection: &Connection) -> Vec<String> {
        if !connection.tls_available() {
            return Vec::new();
        }
        vec!["STARTTLS".to_string()]
    }

    fn register(&self, connection: &mut Connection) {
        connection
            .verb_map_mut()
            .set_verb_processor("STARTTLS", Arc::new(StartTlsVerb));
    }
}

/// Lists the mechanisms allowed on the channel as it is now.
pub struct AuthExtension;

impl Extension for AuthExtension {
    fn ehlo_keywords(&self, connection: &Connection) -> Vec<String> {
        let options = connection.options();
        let mechanisms: Vec<&str> = options
            .auth_mechanisms()
            .identifiers()
            .filter(|id| options.is_auth_mechanism_enabled(id, connection.is_secure()))
            .collect();
        if mechanisms.is_empty() {
            return Vec::new();
        }
        vec![format!("AUTH {}", mechanisms.join(" "))]
    }

    fn register(&self, connection: &mut Connection) {
        connection
            .verb_map_mut()
            .set_verb_processor("AUTH", Arc::new(AuthVerb));
        connection
            .mail_from_parameters_mut()
            .set_processor("AUTH", Arc::new(AuthParameterProcessor));
    }
}

//! SMTP verb handlers and the verb registry.

mod auth;
mod data;
mod helo;
mod mail;
mod rcpt;
mod session_control;
mod starttls;

pub use auth::AuthVerb;
pub use data::DataVerb;
pub use helo::{EhloVerb, HeloVerb};
pub use mail::{MailFromVerb, MailVerb};
pub use rcpt::{RcptToVerb, RcptVerb};
pub use session_control::{NoopVerb, QuitVerb, RsetVerb};
pub use starttls::StartTlsVerb;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use super::command::{ArgumentsParser, SmtpCommand};
use super::connection::Connection;
use super::error::{SmtpServerError, VerbError};
use super::response::ResponseCode;

/// Handles one command.
///
/// A handler writes its own responses. Returning
/// [`VerbError::Response`] instead sends exactly that one response.
#[async_trait]
pub trait Verb: Send + Sync {
    async fn process(&self, connection: &mut Connection, command: &SmtpCommand) -> Result<(), VerbError>;
}

/// Verb handlers keyed by upper-cased verb.
#[derive(Clone, Default)]
pub struct VerbMap {
    verbs: BTreeMap<String, Arc<dyn Verb>>,
}

impl VerbMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// `HELO`, `EHLO`, `MAIL`, `RCPT`, `DATA`, `RSET`, `NOOP` and `QUIT`.
    /// `AUTH` and `STARTTLS` come from their extensions.
    pub fn with_defaults() -> Self {
        let mut map = Self::new();
        map.set_verb_processor("HELO", Arc::new(HeloVerb));
        map.set_verb_processor("EHLO", Arc::new(EhloVerb));
        map.set_verb_processor("MAIL", Arc::new(MailVerb::new()));
        map.set_verb_processor("RCPT", Arc::new(RcptVerb::new()));
        map.set_verb_processor("DATA", Arc::new(DataVerb));
        map.set_verb_processor("RSET", Arc::new(RsetVerb));
        map.set_verb_processor("NOOP", Arc::new(NoopVerb));
        map.set_verb_processor("QUIT", Arc::new(QuitVerb));
        map
    }

    pub fn set_verb_processor(&mut self, verb: &str, processor: Arc<dyn Verb>) {
        self.verbs.insert(verb.to_ascii_uppercase(), processor);
    }

    pub fn get_verb_processor(&self, verb: &str) -> Option<Arc<dyn Verb>> {
        self.verbs.get(&verb.to_ascii_uppercase()).cloned()
    }
}

impl fmt::Debug for VerbMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.verbs.keys()).finish()
    }
}

/// Dispatches `MAIL FROM:`-style sub-verbs by re-parsing the argument text.
async fn process_sub_verb(
    sub_verbs: &VerbMap,
    connection: &mut Connection,
    command: &SmtpCommand,
) -> Result<(), VerbError> {
    let sub_command = SmtpCommand::parse(command.arguments());
    let verb = sub_command
        .is_valid()
        .then(|| sub_verbs.get_verb_processor(sub_command.verb()))
        .flatten()
        .ok_or_else(|| {
            SmtpServerError::with(
                ResponseCode::SYNTAX_ERROR_IN_PARAMETERS,
                format!("Subcommand not recognised after {}", command.verb()),
            )
        })?;
    verb.process(connection, &sub_command).await
}

/// Splits `<address> PARAM...` into the bare address and the parameter
/// tokens.
fn parse_path(arguments: &str, what: &str) -> Result<(String, Vec<String>), SmtpServerError> {
    let mut arguments = ArgumentsParser::new(arguments).into_arguments();
    let invalid = || {
        SmtpServerError::with(
            ResponseCode::SYNTAX_ERROR_IN_PARAMETERS,
            format!("Must specify {what} address <address>"),
        )
    };
    if arguments.is_empty() {
        return Err(invalid());
    }
    let path = arguments.remove(0);
    let address = path
        .strip_prefix('<')
        .and_then(|p| p.strip_suffix('>'))
        .ok_or_else(invalid)?;
    Ok((address.to_string(), arguments))
}

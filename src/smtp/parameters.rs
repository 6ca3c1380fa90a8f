//! ESMTP parameter dispatch for `MAIL FROM` and `RCPT TO`.
//!
//! Parameters are an allow-list: a key without a registered processor fails
//! the whole command, and no processor runs unless every key is known.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use log::debug;

use super::command::ParameterParser;
use super::connection::Connection;
use super::error::SmtpServerError;
use super::response::ResponseCode;

/// Applies one parameter to the connection's current message.
pub trait ParameterProcessor: Send + Sync {
    fn set_parameter(
        &self,
        connection: &mut Connection,
        key: &str,
        value: Option<&str>,
    ) -> Result<(), SmtpServerError>;
}

/// Processors keyed case-insensitively.
#[derive(Clone, Default)]
pub struct ParameterProcessorMap {
    processors: BTreeMap<String, Arc<dyn ParameterProcessor>>,
}

impl ParameterProcessorMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_processor(&mut self, key: &str, processor: Arc<dyn ParameterProcessor>) {
        self.processors.insert(key.to_ascii_uppercase(), processor);
    }

    pub fn get_processor(&self, key: &str) -> Option<Arc<dyn ParameterProcessor>> {
        self.processors.get(&key.to_ascii_uppercase()).cloned()
    }

    /// Parses `arguments` as `KEY[=VALUE]` tokens and hands each to its
    /// processor, in order.
    pub fn process<S: AsRef<str>>(
        &self,
        connection: &mut Connection,
        arguments: &[S],
        is_mail_from: bool,
    ) -> Result<(), SmtpServerError> {
        let parameters = ParameterParser::parse(arguments)?;

        let mut resolved = Vec::with_capacity(parameters.len());
        for parameter in parameters {
            match self.get_processor(parameter.name()) {
                Some(processor) => resolved.push((processor, parameter)),
                None => {
                    let context = if is_mail_from { "MAIL FROM" } else { "RCPT TO" };
                    return Err(SmtpServerError::with(
                        ResponseCode::SYNTAX_ERROR_IN_PARAMETERS,
                        format!("{} parameter {} is not recognised", context, parameter.name()),
                    ));
                }
            }
        }

        for (processor, parameter) in resolved {
            debug!("Applying parameter {}={:?}", parameter.name(), parameter.value());
            processor.set_parameter(connection, parameter.name(), parameter.value())?;
        }
        Ok(())
    }
}

impl fmt::Debug for ParameterProcessorMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.processors.keys()).finish()
    }
}

fn syntax_error(message: impl AsRef<str>) -> SmtpServerError {
    SmtpServerError::with(ResponseCode::SYNTAX_ERROR_IN_PARAMETERS, message)
}

fn current_envelope<'a>(
    connection: &'a mut Connection,
) -> Result<&'a mut super::message::Envelope, SmtpServerError> {
    connection
        .current_message_mut()
        .map(|builder| builder.envelope_mut())
        .ok_or_else(|| {
            SmtpServerError::with(ResponseCode::BAD_SEQUENCE_OF_COMMANDS, "No message in progress")
        })
}

/// `SIZE=<bytes>` (RFC 1870).
pub struct SizeParameterProcessor;

impl ParameterProcessor for SizeParameterProcessor {
    fn set_parameter(
        &self,
        connection: &mut Connection,
        _key: &str,
        value: Option<&str>,
    ) -> Result<(), SmtpServerError> {
        let size: u64 = value
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| syntax_error("SIZE parameter requires a numeric value"))?;
        let max = connection.options().max_message_size();
        if max > 0 && size > max {
            return Err(SmtpServerError::with(
                ResponseCode::EXCEEDED_STORAGE_ALLOCATION,
                "Message exceeds fixed maximum message size",
            ));
        }
        current_envelope(connection)?.declared_size = Some(size);
        Ok(())
    }
}

/// `BODY=7BIT|8BITMIME` (RFC 6152).
pub struct BodyParameterProcessor;

impl ParameterProcessor for BodyParameterProcessor {
    fn set_parameter(
        &self,
        connection: &mut Connection,
        _key: &str,
        value: Option<&str>,
    ) -> Result<(), SmtpServerError> {
        let eight_bit = match value.map(str::to_ascii_uppercase).as_deref() {
            Some("7BIT") => false,
            Some("8BITMIME") => true,
            _ => return Err(syntax_error("Unrecognised BODY type")),
        };
        current_envelope(connection)?.eight_bit_transfer = eight_bit;
        Ok(())
    }
}

/// Valueless `SMTPUTF8` (RFC 6531).
pub struct SmtpUtf8ParameterProcessor;

impl ParameterProcessor for SmtpUtf8ParameterProcessor {
    fn set_parameter(
        &self,
        connection: &mut Connection,
        _key: &str,
        value: Option<&str>,
    ) -> Result<(), SmtpServerError> {
        if value.is_some() {
            return Err(syntax_error("SMTPUTF8 parameter does not take a value"));
        }
        current_envelope(connection)?.smtp_utf8 = true;
        Ok(())
    }
}

/// `AUTH=<mailbox>` on `MAIL FROM` (RFC 4954). Accepted and recorded in the
/// log only.
pub struct AuthParameterProcessor;

impl ParameterProcessor for AuthParameterProcessor {
    fn set_parameter(
        &self,
        connection: &mut Connection,
        _key: &str,
        value: Option<&str>,
    ) -> Result<(), SmtpServerError> {
        let value = value.ok_or_else(|| syntax_error("AUTH parameter requires a value"))?;
        debug!(
            "Client {} submitted on behalf of {}",
            connection.session().client_address(),
            value
        );
        Ok(())
    }
}

use std::sync::Arc;

use async_trait::async_trait;

use super::{parse_path, process_sub_verb, Verb, VerbMap};
use crate::smtp::command::SmtpCommand;
use crate::smtp::connection::Connection;
use crate::smtp::error::{SmtpServerError, VerbError};
use crate::smtp::response::{ResponseCode, SmtpResponse};

/// `RCPT`, dispatching to its `TO` sub-verb.
pub struct RcptVerb {
    sub_verbs: VerbMap,
}

impl RcptVerb {
    pub fn new() -> Self {
        let mut sub_verbs = VerbMap::new();
        sub_verbs.set_verb_processor("TO", Arc::new(RcptToVerb));
        Self { sub_verbs }
    }
}

impl Default for RcptVerb {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Verb for RcptVerb {
    async fn process(&self, connection: &mut Connection, command: &SmtpCommand) -> Result<(), VerbError> {
        process_sub_verb(&self.sub_verbs, connection, command).await
    }
}

/// `RCPT TO:<address> [PARAM=VALUE...]`
pub struct RcptToVerb;

#[async_trait]
impl Verb for RcptToVerb {
    async fn process(&self, connection: &mut Connection, command: &SmtpCommand) -> Result<(), VerbError> {
        let no_message = || {
            SmtpServerError::with(ResponseCode::BAD_SEQUENCE_OF_COMMANDS, "Must specify sender first")
        };
        if connection.current_message().is_none() {
            return Err(no_message().into());
        }

        let (recipient, parameters) = parse_path(command.arguments(), "to")?;

        let processors = connection.rcpt_to_parameters().clone();
        processors.process(connection, &parameters, false)?;

        let envelope = connection.current_message().ok_or_else(no_message)?.envelope();
        connection
            .host()
            .on_message_recipient_adding(connection.session(), envelope, &recipient)
            .await
            .map_err(VerbError::from_hook)?;

        connection
            .current_message_mut()
            .ok_or_else(no_message)?
            .envelope_mut()
            .to
            .push(recipient);
        connection
            .write_response(&SmtpResponse::new(ResponseCode::OK, "Recipient accepted"))
            .await?;
        Ok(())
    }
}

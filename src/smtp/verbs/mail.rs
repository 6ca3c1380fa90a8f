use std::sync::Arc;

use async_trait::async_trait;
use log::debug;

use super::{parse_path, process_sub_verb, Verb, VerbMap};
use crate::smtp::command::SmtpCommand;
use crate::smtp::connection::Connection;
use crate::smtp::error::{SmtpServerError, VerbError};
use crate::smtp::response::{ResponseCode, SmtpResponse};

/// `MAIL`, dispatching to its `FROM` sub-verb.
pub struct MailVerb {
    sub_verbs: VerbMap,
}

impl MailVerb {
    pub fn new() -> Self {
        let mut sub_verbs = VerbMap::new();
        sub_verbs.set_verb_processor("FROM", Arc::new(MailFromVerb));
        Self { sub_verbs }
    }

    pub fn sub_verbs_mut(&mut self) -> &mut VerbMap {
        &mut self.sub_verbs
    }
}

impl Default for MailVerb {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Verb for MailVerb {
    async fn process(&self, connection: &mut Connection, command: &SmtpCommand) -> Result<(), VerbError> {
        process_sub_verb(&self.sub_verbs, connection, command).await
    }
}

/// `MAIL FROM:<address> [PARAM=VALUE...]`
pub struct MailFromVerb;

#[async_trait]
impl Verb for MailFromVerb {
    async fn process(&self, connection: &mut Connection, command: &SmtpCommand) -> Result<(), VerbError> {
        if connection.current_message().is_some() {
            return Err(SmtpServerError::with(
                ResponseCode::BAD_SEQUENCE_OF_COMMANDS,
                "You already told me who the message was from",
            )
            .into());
        }
        if connection.options().authentication_required() && !connection.session().authenticated() {
            return Err(SmtpServerError::with(
                ResponseCode::AUTHENTICATION_REQUIRED,
                "Authentication required",
            )
            .into());
        }

        let (from, parameters) = parse_path(command.arguments(), "from")?;

        connection
            .host()
            .on_message_start(connection.session(), &from)
            .await
            .map_err(VerbError::from_hook)?;

        connection.new_message().await?;
        if let Some(message) = connection.current_message_mut() {
            message.envelope_mut().from = from.clone();
        }

        let processors = connection.mail_from_parameters().clone();
        if let Err(e) = processors.process(connection, &parameters, true) {
            connection.abort_message();
            return Err(e.into());
        }

        debug!("Message started from <{}>", from);
        connection
            .write_response(&SmtpResponse::new(ResponseCode::OK, "New message started"))
            .await?;
        Ok(())
    }
}

use async_trait::async_trait;

use super::Verb;
use crate::smtp::command::SmtpCommand;
use crate::smtp::connection::Connection;
use crate::smtp::error::{SmtpServerError, VerbError};
use crate::smtp::response::{ResponseCode, SmtpResponse};

fn check_not_greeted(connection: &Connection) -> Result<(), SmtpServerError> {
    if connection.session().client_name().is_some() {
        return Err(SmtpServerError::with(
            ResponseCode::BAD_SEQUENCE_OF_COMMANDS,
            "You already said HELO",
        ));
    }
    Ok(())
}

fn client_name(command: &SmtpCommand) -> String {
    command.arguments().trim().to_string()
}

pub struct HeloVerb;

#[async_trait]
impl Verb for HeloVerb {
    async fn process(&self, connection: &mut Connection, command: &SmtpCommand) -> Result<(), VerbError> {
        check_not_greeted(connection)?;
        connection.session_mut().set_client_name(Some(client_name(command)));
        connection
            .write_response(&SmtpResponse::new(ResponseCode::OK, "Nice to meet you"))
            .await?;
        Ok(())
    }
}

/// Multi-line reply: greeting line, then one line per extension keyword.
pub struct EhloVerb;

#[async_trait]
impl Verb for EhloVerb {
    async fn process(&self, connection: &mut Connection, command: &SmtpCommand) -> Result<(), VerbError> {
        check_not_greeted(connection)?;
        connection.session_mut().set_client_name(Some(client_name(command)));
        connection.refresh_tls_available().await?;

        let mut lines = vec![format!("{} Nice to meet you.", connection.options().domain_name())];
        for extension in connection.extensions() {
            lines.extend(extension.ehlo_keywords(connection));
        }
        connection
            .write_response(&SmtpResponse::multiline(ResponseCode::OK, lines))
            .await?;
        Ok(())
    }
}

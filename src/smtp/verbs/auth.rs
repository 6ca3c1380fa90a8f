use async_trait::async_trait;
use log::{info, warn};

use super::Verb;
use crate::smtp::auth::AuthStatus;
use crate::smtp::command::{ArgumentsParser, SmtpCommand};
use crate::smtp::connection::Connection;
use crate::smtp::error::{ConnectionError, SmtpServerError, VerbError};
use crate::smtp::response::{ResponseCode, SmtpResponse};

/// `AUTH <mechanism> [initial-response]`
///
/// Runs the mechanism's exchange to completion: each `Continue` becomes a
/// 334 challenge and the next client line is fed back in. A client line of
/// `*` cancels. An initial response of `=` means "empty". Client data never
/// reaches the session transcript.
pub struct AuthVerb;

fn error(code: ResponseCode, message: &str) -> VerbError {
    SmtpServerError::with(code, message).into()
}

#[async_trait]
impl Verb for AuthVerb {
    async fn process(&self, connection: &mut Connection, command: &SmtpCommand) -> Result<(), VerbError> {
        if connection.session().authenticated() {
            return Err(error(ResponseCode::BAD_SEQUENCE_OF_COMMANDS, "Already authenticated"));
        }
        if connection.current_message().is_some() {
            return Err(error(
                ResponseCode::BAD_SEQUENCE_OF_COMMANDS,
                "AUTH not permitted during a mail transaction",
            ));
        }

        let arguments = ArgumentsParser::new(command.arguments()).into_arguments();
        let Some(identifier) = arguments.first() else {
            return Err(error(
                ResponseCode::SYNTAX_ERROR_IN_PARAMETERS,
                "Must specify AUTH mechanism as a parameter",
            ));
        };

        let options = connection.options().clone();
        let secure = connection.is_secure();
        let Some(mechanism) = options.auth_mechanisms().get(identifier) else {
            return Err(error(
                ResponseCode::COMMAND_PARAMETER_NOT_IMPLEMENTED,
                "Specified AUTH mechanism not supported",
            ));
        };
        if !options.is_auth_mechanism_enabled(mechanism.identifier(), secure) {
            if !secure && options.is_auth_mechanism_enabled(mechanism.identifier(), true) {
                return Err(error(
                    ResponseCode::ENCRYPTION_REQUIRED,
                    "Encryption required for requested authentication mechanism",
                ));
            }
            return Err(error(
                ResponseCode::COMMAND_PARAMETER_NOT_IMPLEMENTED,
                "Specified AUTH mechanism not allowed",
            ));
        }

        let mut processor = mechanism.create_processor(connection);
        let mut data = arguments
            .get(1)
            .map(|initial| if initial == "=" { String::new() } else { initial.clone() });

        loop {
            match processor.process_response(connection, data.as_deref()).await? {
                AuthStatus::Continue(challenge) => {
                    connection
                        .write_response(&SmtpResponse::new(ResponseCode::AUTHENTICATION_CONTINUE, challenge))
                        .await?;
                    let line = connection
                        .read_secret_line()
                        .await?
                        .ok_or(ConnectionError::UnexpectedlyClosed)?;
                    if line.trim() == "*" {
                        return Err(error(ResponseCode::SYNTAX_ERROR_IN_PARAMETERS, "Authentication aborted"));
                    }
                    data = Some(line);
                }
                AuthStatus::Success => {
                    let username = processor
                        .credentials()
                        .and_then(|c| c.username())
                        .map(str::to_string);
                    info!(
                        "Client {} authenticated via {} as {:?}",
                        connection.session().client_address(),
                        mechanism.identifier(),
                        username
                    );
                    connection.session_mut().set_authenticated(username);
                    connection
                        .write_response(&SmtpResponse::new(
                            ResponseCode::AUTHENTICATION_OK,
                            "Authentication successful",
                        ))
                        .await?;
                    return Ok(());
                }
                AuthStatus::Failed => {
                    warn!(
                        "Authentication via {} failed for {}",
                        mechanism.identifier(),
                        connection.session().client_address()
                    );
                    return Err(error(ResponseCode::AUTHENTICATION_FAILURE, "Authentication failure"));
                }
            }
        }
    }
}

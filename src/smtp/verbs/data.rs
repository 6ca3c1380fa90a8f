use async_trait::async_trait;
use log::{debug, trace, warn};
use tokio::io::AsyncWriteExt;

use super::Verb;
use crate::smtp::command::SmtpCommand;
use crate::smtp::connection::{line_too_long, Connection};
use crate::smtp::error::{ConnectionError, SmtpServerError, VerbError};
use crate::smtp::response::{ResponseCode, SmtpResponse};

/// `DATA`: reads the dot-terminated body into the current message.
///
/// Leading dots are unstuffed. Once the configured size limit is passed, or a
/// line is over the length limit, the rest of the body is read and dropped,
/// then the message is rejected.
pub struct DataVerb;

#[async_trait]
impl Verb for DataVerb {
    async fn process(&self, connection: &mut Connection, _command: &SmtpCommand) -> Result<(), VerbError> {
        let Some(message) = connection.current_message() else {
            return Err(SmtpServerError::with(
                ResponseCode::BAD_SEQUENCE_OF_COMMANDS,
                "Bad sequence of commands",
            )
            .into());
        };
        if message.envelope().to.is_empty() {
            return Err(SmtpServerError::with(ResponseCode::TRANSACTION_FAILED, "No valid recipients").into());
        }

        connection
            .write_response(&SmtpResponse::new(
                ResponseCode::START_MAIL_INPUT,
                "End message with <CR><LF>.<CR><LF>",
            ))
            .await?;

        let max_size = connection.options().max_message_size();
        let mut size: u64 = 0;
        let mut exceeded = false;
        let mut overlong = false;
        let mut store_error = None;

        loop {
            let line = match connection.read_line_bytes().await {
                Ok(Some(line)) => line,
                Ok(None) => return Err(ConnectionError::UnexpectedlyClosed.into()),
                Err(ConnectionError::LineTooLong { max }) => {
                    debug!("DATA line over {} bytes, discarding rest of body", max);
                    overlong = true;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            if line == b"." {
                break;
            }
            let data = line.strip_prefix(b".").unwrap_or(&line);
            size += data.len() as u64 + 2;
            trace!("DATA line of {} bytes", data.len());

            if exceeded || overlong || store_error.is_some() {
                continue;
            }
            if max_size > 0 && size > max_size {
                debug!("Message exceeded {} bytes, discarding rest of body", max_size);
                exceeded = true;
                continue;
            }
            if let Some(message) = connection.current_message_mut() {
                let writer = message.data_writer();
                let written = async {
                    writer.write_all(data).await?;
                    writer.write_all(b"\r\n").await
                }
                .await;
                if let Err(e) = written {
                    warn!("Failed to store message body: {}", e);
                    store_error = Some(e);
                }
            }
        }

        if overlong {
            connection.abort_message();
            return Err(SmtpServerError::new(line_too_long()).into());
        }
        if exceeded {
            connection.abort_message();
            return Err(SmtpServerError::with(
                ResponseCode::EXCEEDED_STORAGE_ALLOCATION,
                "Message exceeds fixed maximum message size",
            )
            .into());
        }
        if store_error.is_none() {
            if let Some(message) = connection.current_message_mut() {
                if let Err(e) = message.data_writer().flush().await {
                    store_error = Some(e);
                }
            }
        }
        if store_error.is_some() {
            connection.abort_message();
            return Err(SmtpServerError::with(
                ResponseCode::LOCAL_ERROR_IN_PROCESSING,
                "Local error in processing, message not stored",
            )
            .into());
        }

        debug!("Received message body of {} bytes", size);
        connection.commit_message().await?;
        connection
            .write_response(&SmtpResponse::new(ResponseCode::OK, "Mail accepted"))
            .await?;
        Ok(())
    }
}

use async_trait::async_trait;

use super::Verb;
use crate::smtp::command::SmtpCommand;
use crate::smtp::connection::Connection;
use crate::smtp::error::VerbError;
use crate::smtp::response::{ResponseCode, SmtpResponse};

/// Drops any message in progress.
pub struct RsetVerb;

#[async_trait]
impl Verb for RsetVerb {
    async fn process(&self, connection: &mut Connection, _command: &SmtpCommand) -> Result<(), VerbError> {
        connection.abort_message();
        connection
            .write_response(&SmtpResponse::new(ResponseCode::OK, "Rset completed"))
            .await?;
        Ok(())
    }
}

pub struct NoopVerb;

#[async_trait]
impl Verb for NoopVerb {
    async fn process(&self, connection: &mut Connection, _command: &SmtpCommand) -> Result<(), VerbError> {
        connection
            .write_response(&SmtpResponse::new(ResponseCode::OK, "Successfully did nothing"))
            .await?;
        Ok(())
    }
}

pub struct QuitVerb;

#[async_trait]
impl Verb for QuitVerb {
    async fn process(&self, connection: &mut Connection, _command: &SmtpCommand) -> Result<(), VerbError> {
        connection
            .write_response(&SmtpResponse::new(ResponseCode::CLOSING_TRANSMISSION_CHANNEL, "Goodbye"))
            .await?;
        connection.close_after_response();
        Ok(())
    }
}

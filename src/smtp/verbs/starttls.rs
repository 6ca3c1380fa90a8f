use async_trait::async_trait;
use log::info;

use super::Verb;
use crate::smtp::command::SmtpCommand;
use crate::smtp::connection::Connection;
use crate::smtp::error::{SmtpServerError, VerbError};
use crate::smtp::response::{ResponseCode, SmtpResponse};

/// `STARTTLS` (RFC 3207).
///
/// After a successful handshake the client must greet again. The HELO name,
/// any authentication and any envelope from the plaintext phase are gone.
pub struct StartTlsVerb;

#[async_trait]
impl Verb for StartTlsVerb {
    async fn process(&self, connection: &mut Connection, _command: &SmtpCommand) -> Result<(), VerbError> {
        if connection.is_secure() {
            return Err(SmtpServerError::with(
                ResponseCode::BAD_SEQUENCE_OF_COMMANDS,
                "TLS already active",
            )
            .into());
        }
        if !connection.refresh_tls_available().await? {
            return Err(SmtpServerError::with(
                ResponseCode::SERVICE_NOT_AVAILABLE,
                "TLS not available",
            )
            .into());
        }

        connection
            .write_response(&SmtpResponse::new(ResponseCode::SERVICE_READY, "Ready to start TLS"))
            .await?;
        connection.switch_to_secure().await?;
        info!(
            "Connection from {} upgraded to TLS",
            connection.session().client_address()
        );
        Ok(())
    }
}

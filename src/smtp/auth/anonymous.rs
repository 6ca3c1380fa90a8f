use async_trait::async_trait;

use super::{decode, validate, AuthMechanism, AuthMechanismProcessor, AuthStatus, Credentials};
use crate::smtp::connection::Connection;
use crate::smtp::error::VerbError;

/// RFC 4505 `ANONYMOUS`. The optional trace string is passed to the host.
pub struct AnonymousMechanism;

impl AuthMechanism for AnonymousMechanism {
    fn identifier(&self) -> &str {
        "ANONYMOUS"
    }

    fn create_processor(&self, _connection: &Connection) -> Box<dyn AuthMechanismProcessor> {
        Box::new(AnonymousProcessor { credentials: None })
    }
}

struct AnonymousProcessor {
    credentials: Option<Credentials>,
}

#[async_trait]
impl AuthMechanismProcessor for AnonymousProcessor {
    async fn process_response(
        &mut self,
        connection: &Connection,
        data: Option<&str>,
    ) -> Result<AuthStatus, VerbError> {
        let trace = match data {
            Some(data) if !data.trim().is_empty() => Some(decode(data)?),
            _ => None,
        };
        let credentials = Credentials::Anonymous { trace };
        let status = validate(connection, &credentials).await?;
        self.credentials = Some(credentials);
        Ok(status)
    }

    fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }
}

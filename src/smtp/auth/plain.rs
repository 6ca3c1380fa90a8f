use async_trait::async_trait;

use super::{decode, malformed, validate, AuthMechanism, AuthMechanismProcessor, AuthStatus, Credentials};
use crate::smtp::connection::Connection;
use crate::smtp::error::VerbError;

/// RFC 4616 `PLAIN`: `authzid NUL authcid NUL passwd` in one response.
pub struct PlainMechanism;

impl AuthMechanism for PlainMechanism {
    fn identifier(&self) -> &str {
        "PLAIN"
    }

    fn create_processor(&self, _connection: &Connection) -> Box<dyn AuthMechanismProcessor> {
        Box::new(PlainProcessor { credentials: None })
    }
}

struct PlainProcessor {
    credentials: Option<Credentials>,
}

#[async_trait]
impl AuthMechanismProcessor for PlainProcessor {
    async fn process_response(
        &mut self,
        connection: &Connection,
        data: Option<&str>,
    ) -> Result<AuthStatus, VerbError> {
        let Some(data) = data else {
            return Ok(AuthStatus::Continue(String::new()));
        };

        let decoded = decode(data)?;
        let parts: Vec<&str> = decoded.split('\0').collect();
        let [_authzid, username, password] = parts.as_slice() else {
            return Err(malformed("Malformed PLAIN response"));
        };

        let credentials = Credentials::UsernameAndPassword {
            username: username.to_string(),
            password: password.to_string(),
        };
        let status = validate(connection, &credentials).await?;
        self.credentials = Some(credentials);
        Ok(status)
    }

    fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }
}

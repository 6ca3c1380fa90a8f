use async_trait::async_trait;
use chrono::Utc;

use super::{
    decode, encode, malformed, validate, AuthMechanism, AuthMechanismProcessor, AuthStatus,
    CramMd5Credentials, Credentials,
};
use crate::smtp::connection::Connection;
use crate::smtp::error::VerbError;

/// RFC 2195 `CRAM-MD5` challenge-response.
pub struct CramMd5Mechanism;

impl AuthMechanism for CramMd5Mechanism {
    fn identifier(&self) -> &str {
        "CRAM-MD5"
    }

    fn create_processor(&self, connection: &Connection) -> Box<dyn AuthMechanismProcessor> {
        Box::new(CramMd5Processor {
            domain: connection.options().domain_name().to_string(),
            challenge: None,
            credentials: None,
        })
    }
}

pub(super) struct CramMd5Processor {
    domain: String,
    challenge: Option<String>,
    credentials: Option<Credentials>,
}

impl CramMd5Processor {
    /// `<random.timestamp@domain>`, unique per attempt.
    fn generate_challenge(&self) -> String {
        format!(
            "<{}.{}@{}>",
            rand::random::<u64>(),
            Utc::now().timestamp_millis(),
            self.domain
        )
    }
}

#[async_trait]
impl AuthMechanismProcessor for CramMd5Processor {
    async fn process_response(
        &mut self,
        connection: &Connection,
        data: Option<&str>,
    ) -> Result<AuthStatus, VerbError> {
        let Some(challenge) = self.challenge.clone() else {
            if data.is_some_and(|d| !d.is_empty()) {
                return Err(malformed("CRAM-MD5 does not accept an initial response"));
            }
            let challenge = self.generate_challenge();
            let encoded = encode(&challenge);
            self.challenge = Some(challenge);
            return Ok(AuthStatus::Continue(encoded));
        };

        let decoded = decode(data.unwrap_or_default())?;
        let tokens: Vec<&str> = decoded.split(' ').collect();
        let [username, digest] = tokens.as_slice() else {
            return Err(malformed("Malformed CRAM-MD5 response"));
        };

        let credentials = Credentials::CramMd5(CramMd5Credentials {
            username: username.to_string(),
            challenge,
            challenge_response: digest.to_string(),
        });
        let status = validate(connection, &credentials).await?;
        self.credentials = Some(credentials);
        Ok(status)
    }

    fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }
}

//! SASL authentication for the `AUTH` verb.
//!
//! A mechanism creates one [`AuthMechanismProcessor`] per attempt. The verb
//! feeds it client data until it reports [`AuthStatus::Success`] or
//! [`AuthStatus::Failed`]; every intermediate step is a
//! [`AuthStatus::Continue`] carrying the next 334 challenge. Credentials are
//! never judged here: they are handed to
//! [`SmtpHost::validate_authentication_credentials`](super::host::SmtpHost::validate_authentication_credentials).

mod anonymous;
mod cram_md5;
mod login;
mod plain;

pub use anonymous::AnonymousMechanism;
pub use cram_md5::CramMd5Mechanism;
pub use login::LoginMechanism;
pub use plain::PlainMechanism;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use log::debug;
use md5::Md5;
use serde::Serialize;

use super::connection::Connection;
use super::error::{SmtpServerError, VerbError};
use super::response::ResponseCode;

/// Result of feeding one client response to a processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    /// Send the challenge (already encoded) in a 334 and wait for more.
    Continue(String),
    Success,
    Failed,
}

/// Host verdict on a set of credentials.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AuthenticationResult {
    Success,
    Failure,
    TemporaryFailure,
}

/// Username, challenge and digest from a CRAM-MD5 exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CramMd5Credentials {
    pub username: String,
    pub challenge: String,
    pub challenge_response: String,
}

impl CramMd5Credentials {
    /// Checks the client's digest against `password`.
    pub fn validate_response(&self, password: &str) -> bool {
        let Ok(mut mac) = <Hmac<Md5> as KeyInit>::new_from_slice(password.as_bytes()) else {
            return false;
        };
        mac.update(self.challenge.as_bytes());
        let expected = hex::encode(mac.finalize().into_bytes());
        expected.eq_ignore_ascii_case(&self.challenge_response)
    }
}

/// What a client presented.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    UsernameAndPassword { username: String, password: String },
    CramMd5(CramMd5Credentials),
    Anonymous { trace: Option<String> },
}

impl Credentials {
    pub fn username(&self) -> Option<&str> {
        match self {
            Credentials::UsernameAndPassword { username, .. } => Some(username),
            Credentials::CramMd5(credentials) => Some(&credentials.username),
            Credentials::Anonymous { .. } => None,
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credentials::UsernameAndPassword { username, .. } => f
                .debug_struct("UsernameAndPassword")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
            Credentials::CramMd5(credentials) => f
                .debug_struct("CramMd5")
                .field("username", &credentials.username)
                .finish_non_exhaustive(),
            Credentials::Anonymous { trace } => {
                f.debug_struct("Anonymous").field("trace", trace).finish()
            }
        }
    }
}

/// A named SASL mechanism.
pub trait AuthMechanism: Send + Sync {
    /// Mechanism name as used on the wire, e.g. `CRAM-MD5`.
    fn identifier(&self) -> &str;

    fn create_processor(&self, connection: &Connection) -> Box<dyn AuthMechanismProcessor>;
}

/// One in-flight authentication attempt.
#[async_trait]
pub trait AuthMechanismProcessor: Send {
    /// Consumes the next client response. `None` means the client sent no
    /// initial response with `AUTH`.
    async fn process_response(
        &mut self,
        connection: &Connection,
        data: Option<&str>,
    ) -> Result<AuthStatus, VerbError>;

    /// Credentials gathered so far; set once the exchange is terminal.
    fn credentials(&self) -> Option<&Credentials>;
}

/// Registered mechanisms keyed by upper-cased identifier.
#[derive(Clone, Default)]
pub struct AuthMechanismMap {
    mechanisms: BTreeMap<String, Arc<dyn AuthMechanism>>,
}

impl AuthMechanismMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// PLAIN, LOGIN, CRAM-MD5 and ANONYMOUS.
    pub fn with_defaults() -> Self {
        let mut map = Self::new();
        map.add(Arc::new(PlainMechanism));
        map.add(Arc::new(LoginMechanism));
        map.add(Arc::new(CramMd5Mechanism));
        map.add(Arc::new(AnonymousMechanism));
        map
    }

    pub fn add(&mut self, mechanism: Arc<dyn AuthMechanism>) {
        self.mechanisms
            .insert(mechanism.identifier().to_ascii_uppercase(), mechanism);
    }

    pub fn get(&self, identifier: &str) -> Option<Arc<dyn AuthMechanism>> {
        self.mechanisms.get(&identifier.to_ascii_uppercase()).cloned()
    }

    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.mechanisms.values().map(|m| m.identifier())
    }
}

impl fmt::Debug for AuthMechanismMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.mechanisms.keys()).finish()
    }
}

fn malformed(message: &str) -> VerbError {
    SmtpServerError::with(ResponseCode::SYNTAX_ERROR_IN_PARAMETERS, message).into()
}

pub(crate) fn encode(text: &str) -> String {
    BASE64.encode(text.as_bytes())
}

/// Decodes a base64 client response as UTF-8 text.
pub(crate) fn decode(data: &str) -> Result<String, VerbError> {
    let bytes = BASE64
        .decode(data.trim())
        .map_err(|_| malformed("Invalid base64 data"))?;
    String::from_utf8(bytes).map_err(|_| malformed("Invalid UTF-8 in authentication data"))
}

/// Asks the host to judge `credentials` and maps the verdict to a status.
pub(crate) async fn validate(
    connection: &Connection,
    credentials: &Credentials,
) -> Result<AuthStatus, VerbError> {
    let result = connection
        .host()
        .validate_authentication_credentials(connection.session(), credentials)
        .await
        .map_err(VerbError::from_hook)?;
    debug!(
        "Credential check for {:?} on {}: {:?}",
        credentials.username(),
        connection.session().client_address(),
        result
    );
    match result {
        AuthenticationResult::Success => Ok(AuthStatus::Success),
        AuthenticationResult::Failure => Ok(AuthStatus::Failed),
        AuthenticationResult::TemporaryFailure => Err(SmtpServerError::with(
            ResponseCode::TEMPORARY_AUTHENTICATION_FAILURE,
            "Temporary authentication failure",
        )
        .into()),
    }
}

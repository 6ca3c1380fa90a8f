//! Error types for the SMTP engine.
//!
//! Protocol-level problems travel as [`SmtpServerError`], which always carries
//! the single response to send. Transport failures are [`ConnectionError`] and
//! end the connection.

use std::io;

use thiserror::Error;

use super::response::{ResponseCode, SmtpResponse};

/// "Stop processing this command and send this response."
#[derive(Debug, Clone, Error)]
#[error("{}", .response.to_string().trim_end())]
pub struct SmtpServerError {
    response: SmtpResponse,
}

impl SmtpServerError {
    pub fn new(response: SmtpResponse) -> Self {
        Self { response }
    }

    pub fn with(code: ResponseCode, message: impl AsRef<str>) -> Self {
        Self::new(SmtpResponse::new(code, message))
    }

    pub fn response(&self) -> &SmtpResponse {
        &self.response
    }

    pub fn into_response(self) -> SmtpResponse {
        self.response
    }
}

/// Failures of the underlying channel. All are fatal except
/// [`ConnectionError::LineTooLong`], after which the reader has already moved
/// on to the next line.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("connection unexpectedly closed by peer")]
    UnexpectedlyClosed,

    #[error("I/O error: {0}")]
    Io(io::Error),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("line exceeds maximum length of {max} bytes")]
    LineTooLong { max: usize },

    #[error("no command received within the idle timeout")]
    Timeout,

    #[error("connection killed by server shutdown")]
    Killed,

    #[error("channel is closed")]
    Closed,
}

impl From<io::Error> for ConnectionError {
    fn from(error: io::Error) -> Self {
        match error.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => ConnectionError::UnexpectedlyClosed,
            _ => ConnectionError::Io(error),
        }
    }
}

/// Outcome of a failed verb, parameter, hook or auth step.
#[derive(Debug, Error)]
pub enum VerbError {
    #[error(transparent)]
    Response(#[from] SmtpServerError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("unexpected error: {0:#}")]
    Unexpected(anyhow::Error),
}

impl VerbError {
    /// Classifies an error escaping a host hook. A carried
    /// [`SmtpServerError`] keeps its response; anything else is unexpected.
    pub fn from_hook(error: anyhow::Error) -> Self {
        match error.downcast::<SmtpServerError>() {
            Ok(server_error) => VerbError::Response(server_error),
            Err(other) => VerbError::Unexpected(other),
        }
    }
}

impl From<io::Error> for VerbError {
    fn from(error: io::Error) -> Self {
        VerbError::Unexpected(anyhow::Error::new(error))
    }
}

/// Errors starting or configuring a [`Server`](super::server::Server).
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("server is already running")]
    AlreadyRunning,

    #[error("failed to bind {address}: {source}")]
    Bind {
        address: std::net::SocketAddr,
        #[source]
        source: io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reset_and_broken_pipe_map_to_unexpected_close() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::BrokenPipe,
            io::ErrorKind::UnexpectedEof,
        ] {
            let error = ConnectionError::from(io::Error::from(kind));
            assert!(matches!(error, ConnectionError::UnexpectedlyClosed), "{kind:?}");
        }
        let other = ConnectionError::from(io::Error::other("disk on fire"));
        assert!(matches!(other, ConnectionError::Io(_)));
    }

    #[test]
    fn hook_error_keeps_carried_response() {
        let hook_error = anyhow::Error::new(SmtpServerError::with(
            ResponseCode::RECIPIENT_REJECTED,
            "No such user",
        ));
        match VerbError::from_hook(hook_error) {
            VerbError::Response(e) => assert_eq!(e.response().code(), ResponseCode::RECIPIENT_REJECTED),
            other => panic!("expected response error, got {other:?}"),
        }
        let plain = anyhow::anyhow!("database unavailable");
        assert!(matches!(VerbError::from_hook(plain), VerbError::Unexpected(_)));
    }

    #[test]
    fn server_error_displays_response_without_crlf() {
        let error = SmtpServerError::with(ResponseCode::SYNTAX_ERROR_IN_PARAMETERS, "Bad");
        assert_eq!(error.to_string(), "501 Bad");
    }
}

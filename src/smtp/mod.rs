//! Programmable SMTP protocol engine.
//!
//! A [`Server`] accepts connections and drives each through a
//! [`Connection`] state machine. Everything the embedding application
//! decides (greeting, sender and recipient policy, credential checks,
//! message storage and delivery) goes through the [`SmtpHost`] hooks.

pub mod auth;
pub mod command;
pub mod connection;
pub mod error;
pub mod extensions;
pub mod host;
pub mod message;
pub mod options;
pub mod parameters;
pub mod response;
pub mod server;
pub mod session;
pub mod tls;
pub mod transport;
pub mod verbs;

#[cfg(test)]
pub(crate) mod testing;

pub use auth::{AuthenticationResult, Credentials};
pub use command::SmtpCommand;
pub use connection::Connection;
pub use error::{ConnectionError, ServerError, SmtpServerError, VerbError};
pub use host::{DefaultHost, SmtpHost};
pub use message::{Envelope, Message, MessageBuilder, MessageStore};
pub use options::{IpVersion, ServerOptions, ServerOptionsBuilder, TlsMode};
pub use response::{ResponseCode, SmtpResponse};
pub use server::{ActiveConnection, Server};
pub use session::Session;

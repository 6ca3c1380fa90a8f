//! Host application hooks.
//!
//! The engine calls into an [`SmtpHost`] at each stage of a session and awaits
//! the result before continuing. Every hook has a default, so a host only
//! overrides what it cares about. Returning an error wrapping
//! [`SmtpServerError`](super::error::SmtpServerError) sends that response;
//! any other error is reported to the client as a 500 and logged.

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use super::auth::{AuthenticationResult, Credentials};
use super::command::SmtpCommand;
use super::extensions::Extension;
use super::message::{Envelope, Message, MessageBuilder};
use super::response::{ResponseCode, SmtpResponse};
use super::session::Session;

#[async_trait]
pub trait SmtpHost: Send + Sync {
    /// A connection was accepted and its session record created.
    async fn on_session_created(&self, _session: &Session) -> Result<()> {
        Ok(())
    }

    /// The command loop is about to start.
    async fn on_session_started(&self, _session: &Session) -> Result<()> {
        Ok(())
    }

    /// The connection has closed. `session` is final.
    async fn on_session_completed(&self, _session: &Session) -> Result<()> {
        Ok(())
    }

    /// Greeting sent on connect. An error-class response is sent and the
    /// connection closed without reading any command.
    async fn greeting(&self, _session: &Session, domain: &str) -> Result<SmtpResponse> {
        Ok(SmtpResponse::new(
            ResponseCode::SERVICE_READY,
            format!("{domain} smtp_engine ready"),
        ))
    }

    async fn on_command_received(&self, _session: &Session, _command: &SmtpCommand) -> Result<()> {
        Ok(())
    }

    /// `MAIL FROM` accepted syntactically; fail to refuse the sender.
    async fn on_message_start(&self, _session: &Session, _from: &str) -> Result<()> {
        Ok(())
    }

    /// Fail to refuse `recipient`.
    async fn on_message_recipient_adding(
        &self,
        _session: &Session,
        _envelope: &Envelope,
        _recipient: &str,
    ) -> Result<()> {
        Ok(())
    }

    /// The body has been fully received, before the message is committed.
    async fn on_message_completed(&self, _session: &Session, _envelope: &Envelope) -> Result<()> {
        Ok(())
    }

    /// The message has been committed to the session.
    async fn on_message_received(&self, _session: &Session, _message: &Arc<Message>) -> Result<()> {
        Ok(())
    }

    /// Whether TLS may be offered to this session. Asked before each EHLO
    /// reply and on STARTTLS.
    async fn is_ssl_enabled(&self, _session: &Session) -> Result<bool> {
        Ok(true)
    }

    /// Defaults to refusing everyone.
    async fn validate_authentication_credentials(
        &self,
        _session: &Session,
        _credentials: &Credentials,
    ) -> Result<AuthenticationResult> {
        Ok(AuthenticationResult::Failure)
    }

    /// Extensions active for this session, given the configured defaults.
    /// Called once, before the greeting; an error closes the connection
    /// with 421.
    async fn get_extensions(
        &self,
        _session: &Session,
        defaults: Vec<Arc<dyn Extension>>,
    ) -> Result<Vec<Arc<dyn Extension>>> {
        Ok(defaults)
    }

    /// Custom message store. `None` uses the configured store.
    async fn create_message_builder(
        &self,
        _session: &Session,
        _envelope: &Envelope,
    ) -> Result<Option<Box<dyn MessageBuilder>>> {
        Ok(None)
    }
}

/// A host with every hook left at its default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultHost;

impl SmtpHost for DefaultHost {}

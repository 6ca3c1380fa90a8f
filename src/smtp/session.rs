//! Per-connection session record.

use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::message::Message;

/// What happened on one connection: who connected, the transcript, the
/// messages committed and how it ended.
///
/// Created with the connection, mutated only by the task that owns it, and
/// handed to [`SmtpHost::on_session_completed`](super::host::SmtpHost::on_session_completed)
/// once the connection has closed.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    id: Uuid,
    client_address: SocketAddr,
    client_name: Option<String>,
    start_date: DateTime<Utc>,
    end_date: Option<DateTime<Utc>>,
    secure_connection: bool,
    authenticated: bool,
    authenticated_username: Option<String>,
    messages: Vec<Arc<Message>>,
    #[serde(skip)]
    log: String,
    error: Option<String>,
}

impl Session {
    pub fn new(client_address: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4(),
            client_address,
            client_name: None,
            start_date: Utc::now(),
            end_date: None,
            secure_connection: false,
            authenticated: false,
            authenticated_username: None,
            messages: Vec::new(),
            log: String::new(),
            error: None,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn client_address(&self) -> SocketAddr {
        self.client_address
    }

    /// Name the client gave in HELO/EHLO.
    pub fn client_name(&self) -> Option<&str> {
        self.client_name.as_deref()
    }

    pub fn set_client_name(&mut self, name: Option<String>) {
        self.client_name = name;
    }

    pub fn start_date(&self) -> DateTime<Utc> {
        self.start_date
    }

    pub fn end_date(&self) -> Option<DateTime<Utc>> {
        self.end_date
    }

    pub fn is_completed(&self) -> bool {
        self.end_date.is_some()
    }

    pub fn secure_connection(&self) -> bool {
        self.secure_connection
    }

    pub fn set_secure_connection(&mut self, secure: bool) {
        self.secure_connection = secure;
    }

    pub fn authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn authenticated_username(&self) -> Option<&str> {
        self.authenticated_username.as_deref()
    }

    pub fn set_authenticated(&mut self, username: Option<String>) {
        self.authenticated = true;
        self.authenticated_username = username;
    }

    pub fn clear_authentication(&mut self) {
        self.authenticated = false;
        self.authenticated_username = None;
    }

    pub fn append_to_log(&mut self, text: &str) {
        self.log.push_str(text);
        self.log.push_str("\r\n");
    }

    /// Transcript lines joined with CRLF, ending in CRLF.
    pub fn log(&self) -> &str {
        &self.log
    }

    pub fn add_message(&mut self, message: Arc<Message>) {
        self.messages.push(message);
    }

    /// Committed messages in commit order.
    pub fn messages(&self) -> &[Arc<Message>] {
        &self.messages
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, error: impl Into<String>) {
        self.error = Some(error.into());
    }

    pub(crate) fn complete(&mut self) {
        if self.end_date.is_none() {
            self.end_date = Some(Utc::now());
        }
    }
}

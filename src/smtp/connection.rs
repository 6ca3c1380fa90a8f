//! Per-client connection: greeting, command loop and teardown.
//!
//! A [`Connection`] is owned by exactly one task. It reads one line at a time,
//! dispatches it to a [`Verb`](super::verbs::Verb) and writes the outcome
//! before reading the next line. Every read and write races the idle timeout
//! and the server's kill token, so a killed connection never stays blocked on
//! a silent client.

use std::borrow::Cow;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::command::SmtpCommand;
use super::error::{ConnectionError, SmtpServerError, VerbError};
use super::extensions::{default_extensions, Extension};
use super::host::SmtpHost;
use super::message::{
    Envelope, FileMessageBuilder, MemoryMessageBuilder, Message, MessageBuilder, MessageStore,
};
use super::options::{ServerOptions, TlsMode};
use super::parameters::ParameterProcessorMap;
use super::response::{ResponseCode, SmtpResponse};
use super::session::Session;
use super::transport::Channel;
use super::verbs::VerbMap;

/// Upper bound on the courtesy write after an idle timeout.
const TIMEOUT_NOTICE_GRACE: Duration = Duration::from_secs(5);

/// Stands in for SASL data in the transcript and debug log.
const REDACTED: &str = "[credentials redacted]";

/// `AUTH <mechanism> <initial-response>` keeps only the mechanism.
fn redact_auth_arguments(line: &str) -> Cow<'_, str> {
    let mut words = line.split_whitespace();
    match (words.next(), words.next(), words.next()) {
        (Some(verb), Some(mechanism), Some(_)) if verb.eq_ignore_ascii_case("AUTH") => {
            Cow::Owned(format!("{verb} {mechanism} {REDACTED}"))
        }
        _ => Cow::Borrowed(line),
    }
}

pub struct Connection {
    channel: Channel,
    options: Arc<ServerOptions>,
    host: Arc<dyn SmtpHost>,
    session: Session,
    current_message: Option<Box<dyn MessageBuilder>>,
    verb_map: VerbMap,
    mail_from_parameters: ParameterProcessorMap,
    rcpt_to_parameters: ParameterProcessorMap,
    extensions: Vec<Arc<dyn Extension>>,
    bad_command_count: u32,
    tls_available: bool,
    closing: bool,
    cancel: CancellationToken,
}

/// Races `operation` against the kill token and, if set, the idle timeout.
async fn guarded<T>(
    cancel: &CancellationToken,
    idle_timeout: Option<Duration>,
    operation: impl Future<Output = Result<T, ConnectionError>>,
) -> Result<T, ConnectionError> {
    let timed = async {
        match idle_timeout {
            Some(limit) => tokio::time::timeout(limit, operation)
                .await
                .map_err(|_| ConnectionError::Timeout)?,
            None => operation.await,
        }
    };
    tokio::select! {
        _ = cancel.cancelled() => Err(ConnectionError::Killed),
        result = timed => result,
    }
}

impl Connection {
    /// Wraps an accepted channel. Extensions are chosen by the host and
    /// registered once the session starts.
    pub fn new(
        channel: Channel,
        options: Arc<ServerOptions>,
        host: Arc<dyn SmtpHost>,
        cancel: CancellationToken,
    ) -> Self {
        let session = Session::new(channel.client_address());
        Self {
            channel,
            options,
            host,
            session,
            current_message: None,
            verb_map: VerbMap::with_defaults(),
            mail_from_parameters: ParameterProcessorMap::new(),
            rcpt_to_parameters: ParameterProcessorMap::new(),
            extensions: Vec::new(),
            bad_command_count: 0,
            tls_available: false,
            closing: false,
            cancel,
        }
    }

    pub fn id(&self) -> Uuid {
        self.session.id()
    }

    pub fn options(&self) -> &Arc<ServerOptions> {
        &self.options
    }

    pub fn host(&self) -> &Arc<dyn SmtpHost> {
        &self.host
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn is_secure(&self) -> bool {
        self.channel.is_secure()
    }

    pub fn extensions(&self) -> &[Arc<dyn Extension>] {
        &self.extensions
    }

    pub fn verb_map(&self) -> &VerbMap {
        &self.verb_map
    }

    pub fn verb_map_mut(&mut self) -> &mut VerbMap {
        &mut self.verb_map
    }

    pub fn mail_from_parameters(&self) -> &ParameterProcessorMap {
        &self.mail_from_parameters
    }

    pub fn mail_from_parameters_mut(&mut self) -> &mut ParameterProcessorMap {
        &mut self.mail_from_parameters
    }

    pub fn rcpt_to_parameters(&self) -> &ParameterProcessorMap {
        &self.rcpt_to_parameters
    }

    pub fn rcpt_to_parameters_mut(&mut self) -> &mut ParameterProcessorMap {
        &mut self.rcpt_to_parameters
    }

    /// Whether STARTTLS could be offered when last asked of the host.
    pub fn tls_available(&self) -> bool {
        self.tls_available
    }

    /// Asks the host whether TLS may be offered now and keeps the answer for
    /// the EHLO reply.
    pub async fn refresh_tls_available(&mut self) -> Result<bool, VerbError> {
        let available = if self.is_secure() || self.options.tls_config().is_none() {
            false
        } else {
            self.host
                .is_ssl_enabled(&self.session)
                .await
                .map_err(VerbError::from_hook)?
        };
        self.tls_available = available;
        Ok(available)
    }

    /// Consecutive unrecognised commands so far.
    pub fn bad_command_count(&self) -> u32 {
        self.bad_command_count
    }

    pub fn current_message(&self) -> Option<&dyn MessageBuilder> {
        self.current_message.as_deref()
    }

    pub fn current_message_mut(&mut self) -> Option<&mut Box<dyn MessageBuilder>> {
        self.current_message.as_mut()
    }

    /// Starts a message. Fails with 503 if one is already in progress.
    pub async fn new_message(&mut self) -> Result<(), VerbError> {
        if self.current_message.is_some() {
            return Err(SmtpServerError::with(
                ResponseCode::BAD_SEQUENCE_OF_COMMANDS,
                "A message is already in progress",
            )
            .into());
        }

        let envelope = Envelope {
            client_address: Some(self.session.client_address()),
            secure_connection: self.is_secure(),
            ..Envelope::default()
        };
        let custom = self
            .host
            .create_message_builder(&self.session, &envelope)
            .await
            .map_err(VerbError::from_hook)?;
        let builder: Box<dyn MessageBuilder> = match custom {
            Some(builder) => builder,
            None => match self.options.message_store() {
                MessageStore::Memory => Box::new(MemoryMessageBuilder::new(envelope)),
                MessageStore::File(directory) => {
                    Box::new(FileMessageBuilder::new(envelope, directory.as_deref()).await?)
                }
            },
        };
        self.current_message = Some(builder);
        Ok(())
    }

    /// Finalises the current message, adds it to the session and tells the
    /// host.
    pub async fn commit_message(&mut self) -> Result<Arc<Message>, VerbError> {
        let builder = self.current_message.take().ok_or_else(|| {
            SmtpServerError::with(ResponseCode::BAD_SEQUENCE_OF_COMMANDS, "No message in progress")
        })?;

        self.host
            .on_message_completed(&self.session, builder.envelope())
            .await
            .map_err(VerbError::from_hook)?;

        let message = Arc::new(builder.to_message().await?);
        self.session.add_message(Arc::clone(&message));
        info!(
            "Message from <{}> to {:?} ({} bytes) received from {}",
            message.from(),
            message.to(),
            message.size(),
            self.session.client_address()
        );
        self.host
            .on_message_received(&self.session, &message)
            .await
            .map_err(VerbError::from_hook)?;
        Ok(message)
    }

    /// Discards the message in progress, if any.
    pub fn abort_message(&mut self) {
        if self.current_message.take().is_some() {
            debug!("Aborted message in progress for {}", self.session.client_address());
        }
    }

    /// Reads one line. `Ok(None)` means the client closed the connection.
    pub async fn read_line(&mut self) -> Result<Option<String>, ConnectionError> {
        let line = guarded(&self.cancel, self.options.idle_timeout(), self.channel.read_line()).await?;
        if let Some(line) = &line {
            let logged = redact_auth_arguments(line);
            debug!("<<< {}", logged);
            self.session.append_to_log(&logged);
        }
        Ok(line)
    }

    /// Reads one line of SASL data. Only a placeholder reaches the
    /// transcript and the debug log.
    pub async fn read_secret_line(&mut self) -> Result<Option<String>, ConnectionError> {
        let line = guarded(&self.cancel, self.options.idle_timeout(), self.channel.read_line()).await?;
        if line.is_some() {
            debug!("<<< {}", REDACTED);
            self.session.append_to_log(REDACTED);
        }
        Ok(line)
    }

    /// Reads one line as raw bytes, bypassing decoding and the transcript.
    pub async fn read_line_bytes(&mut self) -> Result<Option<Vec<u8>>, ConnectionError> {
        guarded(&self.cancel, self.options.idle_timeout(), self.channel.read_line_bytes()).await
    }

    pub async fn write_response(&mut self, response: &SmtpResponse) -> Result<(), ConnectionError> {
        let text = response.to_string();
        debug!(">>> {}", text.trim_end());
        for line in text.lines() {
            self.session.append_to_log(line);
        }
        let channel = &mut self.channel;
        guarded(&self.cancel, self.options.idle_timeout(), async move {
            channel.write(&text).await?;
            channel.flush().await
        })
        .await
    }

    /// Upgrades the channel to TLS with the configured server config.
    ///
    /// Everything learned from the client in plaintext is dropped: the
    /// HELO name, the authentication state and any message in progress.
    pub async fn switch_to_secure(&mut self) -> Result<(), ConnectionError> {
        let config = self
            .options
            .tls_config()
            .cloned()
            .ok_or_else(|| ConnectionError::Tls("no TLS configuration".into()))?;
        guarded(&self.cancel, self.options.idle_timeout(), self.channel.switch_to_secure(config)).await?;
        self.session.set_secure_connection(true);
        self.session.set_client_name(None);
        self.session.clear_authentication();
        self.abort_message();
        self.tls_available = false;
        Ok(())
    }

    /// Ends the loop once the current verb returns.
    pub fn close_after_response(&mut self) {
        self.closing = true;
    }

    /// Runs the session to completion and returns the final record.
    pub async fn process(mut self) -> Session {
        if let Err(e) = self.run().await {
            match &e {
                ConnectionError::Timeout => {
                    info!("Idle timeout for {}", self.session.client_address());
                    let notice = SmtpResponse::new(
                        ResponseCode::SERVICE_NOT_AVAILABLE,
                        format!("{} Timeout waiting for command, closing connection", self.options.domain_name()),
                    );
                    let text = notice.to_string();
                    let courtesy = async {
                        self.channel.write(&text).await?;
                        self.channel.flush().await
                    };
                    if let Ok(Err(write_error)) = tokio::time::timeout(TIMEOUT_NOTICE_GRACE, courtesy).await {
                        debug!("Timeout notice not delivered: {}", write_error);
                    }
                }
                ConnectionError::Killed => {
                    info!("Connection from {} killed", self.session.client_address());
                }
                ConnectionError::UnexpectedlyClosed => {
                    info!("Connection from {} unexpectedly closed", self.session.client_address());
                }
                other => {
                    warn!("Connection from {} failed: {}", self.session.client_address(), other);
                }
            }
            self.session.set_error(e.to_string());
        }
        self.finalize().await
    }

    async fn install_extensions(&mut self) -> anyhow::Result<()> {
        let defaults = default_extensions(&self.options);
        let extensions = self.host.get_extensions(&self.session, defaults).await?;
        for extension in &extensions {
            extension.register(self);
        }
        self.extensions = extensions;
        Ok(())
    }

    /// Best-effort 421 when a setup hook fails before the greeting.
    async fn abandon_setup(&mut self, stage: &str, e: anyhow::Error) -> Result<(), ConnectionError> {
        error!("{} hook failed: {:#}", stage, e);
        self.session.set_error(format!("{stage} hook failed: {e}"));
        let response = match VerbError::from_hook(e) {
            VerbError::Response(e) => e.into_response(),
            _ => SmtpResponse::new(
                ResponseCode::SERVICE_NOT_AVAILABLE,
                format!("{} Service not available, closing transmission channel", self.options.domain_name()),
            ),
        };
        if let Err(write_error) = self.write_response(&response).await {
            debug!("Setup failure notice not delivered: {}", write_error);
        }
        Ok(())
    }

    async fn run(&mut self) -> Result<(), ConnectionError> {
        if let Err(e) = self.host.on_session_created(&self.session).await {
            return self.abandon_setup("Session created", e).await;
        }

        if self.options.tls_mode() == TlsMode::ImplicitTls {
            self.switch_to_secure().await?;
        }

        if let Err(e) = self.host.on_session_started(&self.session).await {
            return self.abandon_setup("Session started", e).await;
        }

        if let Err(e) = self.install_extensions().await {
            return self.abandon_setup("Extension selection", e).await;
        }

        let greeting = match self.host.greeting(&self.session, self.options.domain_name()).await {
            Ok(response) => response,
            Err(e) => match VerbError::from_hook(e) {
                VerbError::Response(e) => e.into_response(),
                other => {
                    error!("Greeting hook failed: {}", other);
                    SmtpResponse::new(ResponseCode::SERVICE_NOT_AVAILABLE, "Service not available")
                }
            },
        };
        self.write_response(&greeting).await?;
        if greeting.is_error() {
            info!("Session from {} rejected at greeting", self.session.client_address());
            return Ok(());
        }

        while !self.closing {
            if self.bad_command_count >= self.options.max_bad_commands() {
                self.write_response(&SmtpResponse::new(
                    ResponseCode::CLOSING_TRANSMISSION_CHANNEL,
                    "Too many bad commands. Bye!",
                ))
                .await?;
                break;
            }

            let line = match self.read_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("Client {} closed the connection", self.session.client_address());
                    break;
                }
                Err(ConnectionError::LineTooLong { max }) => {
                    self.bad_command_count += 1;
                    debug!("Skipped a line over {} bytes from {}", max, self.session.client_address());
                    self.write_response(&line_too_long()).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };
            self.process_line(&line).await?;
        }
        Ok(())
    }

    async fn process_line(&mut self, line: &str) -> Result<(), ConnectionError> {
        let command = SmtpCommand::parse(line);
        if command.is_empty() {
            self.bad_command_count += 1;
            return Ok(());
        }

        if let Err(e) = self.host.on_command_received(&self.session, &command).await {
            return self.handle_verb_error(VerbError::from_hook(e)).await;
        }

        let verb = if command.is_valid() {
            self.verb_map.get_verb_processor(command.verb())
        } else {
            None
        };
        let Some(verb) = verb else {
            self.bad_command_count += 1;
            debug!(
                "Unrecognised command from {}: {}",
                self.session.client_address(),
                redact_auth_arguments(line)
            );
            return self
                .write_response(&SmtpResponse::new(
                    ResponseCode::SYNTAX_ERROR_COMMAND_UNRECOGNISED,
                    "Command unrecognised",
                ))
                .await;
        };

        self.bad_command_count = 0;
        match verb.process(self, &command).await {
            Ok(()) => Ok(()),
            Err(e) => self.handle_verb_error(e).await,
        }
    }

    async fn handle_verb_error(&mut self, error: VerbError) -> Result<(), ConnectionError> {
        match error {
            VerbError::Response(e) => self.write_response(e.response()).await,
            VerbError::Connection(ConnectionError::LineTooLong { .. }) => {
                self.write_response(&line_too_long()).await
            }
            VerbError::Connection(e) => Err(e),
            VerbError::Unexpected(e) => {
                error!(
                    "Unexpected error handling command from {}: {:#}",
                    self.session.client_address(),
                    e
                );
                self.write_response(&SmtpResponse::new(
                    ResponseCode::SYNTAX_ERROR_COMMAND_UNRECOGNISED,
                    "Internal server error",
                ))
                .await
            }
        }
    }

    async fn finalize(mut self) -> Session {
        self.abort_message();
        self.channel.close().await;
        self.session.complete();
        if let Err(e) = self.host.on_session_completed(&self.session).await {
            error!("Session completed hook failed: {:#}", e);
        }
        self.session
    }
}

pub(crate) fn line_too_long() -> SmtpResponse {
    SmtpResponse::new(ResponseCode::SYNTAX_ERROR_COMMAND_UNRECOGNISED, "Line too long")
}

#[cfg(test)]
mod tests;

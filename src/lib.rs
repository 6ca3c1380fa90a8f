pub mod config;
pub mod smtp;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{error, info, warn};

use smtp::auth::{AuthenticationResult, Credentials};
use smtp::host::SmtpHost;
use smtp::message::Message;
use smtp::server::Server;
use smtp::session::Session;

/// How long in-flight sessions may run after a shutdown signal before they
/// are killed.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Host used by the standalone binary: accepts any credentials and logs
/// every completed session as JSON.
struct LoggingHost;

#[async_trait]
impl SmtpHost for LoggingHost {
    async fn on_message_received(&self, session: &Session, message: &Arc<Message>) -> Result<()> {
        info!(
            "Session {}: received {} byte message from <{}> for {:?}",
            session.id(),
            message.size(),
            message.from(),
            message.to()
        );
        Ok(())
    }

    async fn validate_authentication_credentials(
        &self,
        session: &Session,
        credentials: &Credentials,
    ) -> Result<AuthenticationResult> {
        info!(
            "Session {}: accepting credentials for {}",
            session.id(),
            credentials.username().unwrap_or("<anonymous>")
        );
        Ok(AuthenticationResult::Success)
    }

    async fn on_session_completed(&self, session: &Session) -> Result<()> {
        match serde_json::to_string(session) {
            Ok(json) => info!("Session completed: {}", json),
            Err(e) => warn!("Could not serialize session {}: {}", session.id(), e),
        }
        Ok(())
    }
}

pub async fn run() -> Result<()> {
    info!(
        "Starting {} v{}",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION")
    );

    let config = match config::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            return Err(e);
        }
    };
    let options = config
        .to_server_options()
        .context("Failed to build server options")?;

    let server = Server::new(options, Arc::new(LoggingHost));
    server.start().await.context("Failed to start SMTP server")?;
    info!("Accepting mail on {:?}", server.listening_endpoints());

    // Wait for shutdown signal (SIGTERM/SIGINT)
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, draining in-flight sessions...");

    server.stop(false).await;
    if tokio::time::timeout(DRAIN_TIMEOUT, server.wait_for_connections())
        .await
        .is_err()
    {
        warn!(
            "{} session(s) still open after {:?}, closing them",
            server.active_connections().len(),
            DRAIN_TIMEOUT
        );
        server.stop(true).await;
    }
    info!("Shutdown complete");

    Ok(())
}

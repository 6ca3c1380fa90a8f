//! Listener and connection registry.
//!
//! The accept loop only accepts sockets and hands each one to its own task.
//! Tasks are tracked with a [`TaskTracker`] so a stop can wait for them, and
//! each gets a child of the server's kill token so `stop(true)` unblocks
//! whatever they are waiting on.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use uuid::Uuid;

use super::connection::Connection;
use super::error::ServerError;
use super::host::SmtpHost;
use super::options::ServerOptions;
use super::transport::Channel;

/// Snapshot of a live connection.
#[derive(Debug, Clone, Serialize)]
pub struct ActiveConnection {
    pub id: Uuid,
    pub client_address: SocketAddr,
    pub start_date: DateTime<Utc>,
    #[serde(skip)]
    cancel: CancellationToken,
}

impl ActiveConnection {
    /// Closes this one connection.
    pub fn kill(&self) {
        self.cancel.cancel();
    }
}

type Registry = Arc<Mutex<HashMap<Uuid, ActiveConnection>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct Running {
    endpoints: Vec<SocketAddr>,
    stop_accepting: CancellationToken,
    accept_task: JoinHandle<()>,
}

pub struct Server {
    options: Arc<ServerOptions>,
    host: Arc<dyn SmtpHost>,
    running: Mutex<Option<Running>>,
    kill: Mutex<CancellationToken>,
    connections: Registry,
    tracker: TaskTracker,
}

impl Server {
    pub fn new(options: ServerOptions, host: Arc<dyn SmtpHost>) -> Self {
        let tracker = TaskTracker::new();
        tracker.close();
        Self {
            options: Arc::new(options),
            host,
            running: Mutex::new(None),
            kill: Mutex::new(CancellationToken::new()),
            connections: Arc::new(Mutex::new(HashMap::new())),
            tracker,
        }
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    /// Binds the listener and starts accepting. Port 0 picks a free port;
    /// see [`listening_endpoints`](Self::listening_endpoints).
    pub async fn start(&self) -> Result<(), ServerError> {
        if self.is_running() {
            return Err(ServerError::AlreadyRunning);
        }

        let address = self.options.listen_address();
        let listener = TcpListener::bind(address)
            .await
            .map_err(|source| ServerError::Bind { address, source })?;
        let local = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { address, source })?;
        tracing::info!("SMTP server listening on {}", local);

        let kill = {
            let mut kill = lock(&self.kill);
            if kill.is_cancelled() {
                *kill = CancellationToken::new();
            }
            kill.clone()
        };
        self.tracker.reopen();

        let stop_accepting = CancellationToken::new();
        let accept_task = tokio::spawn(accept_loop(
            listener,
            AcceptContext {
                options: Arc::clone(&self.options),
                host: Arc::clone(&self.host),
                connections: Arc::clone(&self.connections),
                tracker: self.tracker.clone(),
                kill,
                stop_accepting: stop_accepting.clone(),
            },
        ));

        let mut running = lock(&self.running);
        if running.is_some() {
            stop_accepting.cancel();
            return Err(ServerError::AlreadyRunning);
        }
        *running = Some(Running {
            endpoints: vec![local],
            stop_accepting,
            accept_task,
        });
        Ok(())
    }

    /// Stops accepting. With `kill_connections` every active connection is
    /// closed and this waits until they are all gone; otherwise they are
    /// left to finish on their own.
    pub async fn stop(&self, kill_connections: bool) {
        let running = lock(&self.running).take();
        if let Some(running) = running {
            running.stop_accepting.cancel();
            if let Err(e) = running.accept_task.await {
                tracing::error!("SMTP accept loop ended abnormally: {}", e);
            }
            tracing::info!("SMTP listener on {:?} stopped", running.endpoints);
        }
        self.tracker.close();

        if kill_connections {
            let kill = lock(&self.kill).clone();
            kill.cancel();
            self.tracker.wait().await;
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running).is_some()
    }

    pub fn listening_endpoints(&self) -> Vec<SocketAddr> {
        lock(&self.running)
            .as_ref()
            .map(|running| running.endpoints.clone())
            .unwrap_or_default()
    }

    pub fn active_connections(&self) -> Vec<ActiveConnection> {
        lock(&self.connections).values().cloned().collect()
    }

    /// Waits for every connection to finish. Only returns after
    /// [`stop`](Self::stop) has been called.
    pub async fn wait_for_connections(&self) {
        self.tracker.wait().await;
    }
}

struct AcceptContext {
    options: Arc<ServerOptions>,
    host: Arc<dyn SmtpHost>,
    connections: Registry,
    tracker: TaskTracker,
    kill: CancellationToken,
    stop_accepting: CancellationToken,
}

async fn accept_loop(listener: TcpListener, context: AcceptContext) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, remote_addr)) => {
                        tracing::info!("New connection from: {}", remote_addr);
                        spawn_connection(&context, stream, remote_addr);
                    }
                    Err(e) => tracing::error!("Error accepting connection: {:?}", e),
                }
            }
            _ = context.stop_accepting.cancelled() => {
                tracing::info!("SMTP listener shutting down gracefully");
                break;
            }
        }
    }
}

fn spawn_connection(context: &AcceptContext, stream: TcpStream, remote_addr: SocketAddr) {
    if !context.options.allow_remote_connections() && !remote_addr.ip().is_loopback() {
        tracing::warn!("Rejected remote connection from {}", remote_addr);
        return;
    }

    let channel = match Channel::new(
        stream,
        context.options.fallback_encoding(),
        context.options.max_line_length(),
    ) {
        Ok(channel) => channel,
        Err(e) => {
            tracing::warn!("Could not set up connection from {}: {}", remote_addr, e);
            return;
        }
    };

    let cancel = context.kill.child_token();
    let connection = Connection::new(
        channel,
        Arc::clone(&context.options),
        Arc::clone(&context.host),
        cancel.clone(),
    );
    let id = connection.id();
    lock(&context.connections).insert(
        id,
        ActiveConnection {
            id,
            client_address: remote_addr,
            start_date: connection.session().start_date(),
            cancel,
        },
    );

    let connections = Arc::clone(&context.connections);
    context.tracker.spawn(async move {
        let session = connection.process().await;
        lock(&connections).remove(&id);
        tracing::info!(
            "Connection from {} closed after {} message(s)",
            remote_addr,
            session.messages().len()
        );
    });
}

//! Loopback helpers for connection-level tests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::auth::{AuthenticationResult, Credentials};
use super::connection::Connection;
use super::host::{DefaultHost, SmtpHost};
use super::options::ServerOptions;
use super::session::Session;
use super::transport::{Channel, LineReader};

/// Client end of a loopback connection.
pub(crate) struct TestClient {
    reader: LineReader<ReadHalf<TcpStream>>,
    writer: WriteHalf<TcpStream>,
}

impl TestClient {
    pub(crate) async fn send(&mut self, line: &str) {
        self.writer
            .write_all(format!("{line}\r\n").as_bytes())
            .await
            .unwrap();
    }

    pub(crate) async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
    }

    /// Reads one full (possibly multi-line) response and returns its lines.
    pub(crate) async fn read_response(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        loop {
            let line = self
                .reader
                .read_line()
                .await
                .unwrap()
                .expect("server closed before completing a response");
            let last = line.as_bytes().get(3) != Some(&b'-');
            lines.push(line);
            if last {
                return lines;
            }
        }
    }

    /// Reads a response and returns its code.
    pub(crate) async fn code(&mut self) -> u16 {
        let lines = self.read_response().await;
        lines[0][..3].parse().unwrap()
    }

    /// Reads until the server closes, returning what was left.
    pub(crate) async fn read_to_close(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(Some(line)) = self.reader.read_line().await {
            lines.push(line);
        }
        lines
    }
}

async fn tcp_pair() -> (TcpStream, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();
    let (client, accepted) = tokio::join!(TcpStream::connect(address), listener.accept());
    (accepted.unwrap().0, client.unwrap())
}

fn client(stream: TcpStream) -> TestClient {
    let (read_half, writer) = tokio::io::split(stream);
    TestClient {
        reader: LineReader::new(read_half),
        writer,
    }
}

pub(crate) async fn test_connection_with(
    options: ServerOptions,
    host: Arc<dyn SmtpHost>,
    cancel: CancellationToken,
) -> (Connection, TestClient) {
    let (server, client_stream) = tcp_pair().await;
    let channel = Channel::new(server, options.fallback_encoding(), options.max_line_length()).unwrap();
    let connection = Connection::new(channel, Arc::new(options), host, cancel);
    (connection, client(client_stream))
}

pub(crate) async fn test_connection(options: ServerOptions) -> (Connection, TestClient) {
    test_connection_with(options, Arc::new(DefaultHost), CancellationToken::new()).await
}

/// Runs a full session in the background and consumes the greeting.
pub(crate) async fn spawn_session(
    options: ServerOptions,
    host: Arc<dyn SmtpHost>,
) -> (JoinHandle<Session>, TestClient) {
    let (connection, mut client) = test_connection_with(options, host, CancellationToken::new()).await;
    let task = tokio::spawn(connection.process());
    assert_eq!(client.code().await, 220);
    (task, client)
}

/// Accepts password `secret` for anyone except `busy`, who gets a temporary
/// failure, and accepts every anonymous login.
pub(crate) struct PasswordHost;

#[async_trait]
impl SmtpHost for PasswordHost {
    async fn validate_authentication_credentials(
        &self,
        _session: &Session,
        credentials: &Credentials,
    ) -> anyhow::Result<AuthenticationResult> {
        Ok(match credentials {
            Credentials::UsernameAndPassword { username, .. } if username == "busy" => {
                AuthenticationResult::TemporaryFailure
            }
            Credentials::UsernameAndPassword { password, .. } if password == "secret" => {
                AuthenticationResult::Success
            }
            Credentials::CramMd5(cram) if cram.validate_response("secret") => AuthenticationResult::Success,
            Credentials::Anonymous { .. } => AuthenticationResult::Success,
            _ => AuthenticationResult::Failure,
        })
    }
}

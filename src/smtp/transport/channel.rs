use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use log::{debug, info, warn};
use rustls::ServerConfig as RustlsServerConfig;
use tokio::io::{self, AsyncRead, AsyncWrite, ReadBuf, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio_rustls::server::TlsStream;
use tokio_rustls::TlsAcceptor;

use super::{FallbackEncoding, LineReader, LineWriter};
use crate::smtp::error::ConnectionError;

/// The socket under a [`Channel`], plain or TLS.
pub enum ConnectionStream {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl ConnectionStream {
    pub fn is_secure(&self) -> bool {
        matches!(self, ConnectionStream::Tls(_))
    }
}

impl AsyncRead for ConnectionStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut *self {
            ConnectionStream::Plain(stream) => Pin::new(stream).poll_read(cx, buf),
            ConnectionStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnectionStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut *self {
            ConnectionStream::Plain(stream) => Pin::new(stream).poll_write(cx, buf),
            ConnectionStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            ConnectionStream::Plain(stream) => Pin::new(stream).poll_flush(cx),
            ConnectionStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match &mut *self {
            ConnectionStream::Plain(stream) => Pin::new(stream).poll_shutdown(cx),
            ConnectionStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

type Reader = LineReader<ReadHalf<ConnectionStream>>;
type Writer = LineWriter<WriteHalf<ConnectionStream>>;

/// A client connection's line channel.
///
/// Owns the socket, frames it into lines and can be upgraded to TLS in place.
/// Once closed (explicitly, or by a failed upgrade) every operation returns
/// [`ConnectionError::Closed`].
pub struct Channel {
    reader: Option<Reader>,
    writer: Option<Writer>,
    peer_address: SocketAddr,
    secure: bool,
    fallback: FallbackEncoding,
    max_line_length: usize,
}

impl Channel {
    pub fn new(stream: TcpStream, fallback: FallbackEncoding, max_line_length: usize) -> io::Result<Self> {
        let peer_address = stream.peer_addr()?;
        let mut channel = Self {
            reader: None,
            writer: None,
            peer_address,
            secure: false,
            fallback,
            max_line_length,
        };
        channel.install(ConnectionStream::Plain(stream));
        Ok(channel)
    }

    fn install(&mut self, stream: ConnectionStream) {
        self.secure = stream.is_secure();
        let (read_half, write_half) = io::split(stream);
        self.reader = Some(
            LineReader::new(read_half)
                .with_fallback(self.fallback)
                .with_max_line_length(self.max_line_length),
        );
        self.writer = Some(LineWriter::new(write_half));
    }

    fn reader(&mut self) -> Result<&mut Reader, ConnectionError> {
        self.reader.as_mut().ok_or(ConnectionError::Closed)
    }

    fn writer(&mut self) -> Result<&mut Writer, ConnectionError> {
        self.writer.as_mut().ok_or(ConnectionError::Closed)
    }

    pub async fn read_line(&mut self) -> Result<Option<String>, ConnectionError> {
        self.reader()?.read_line().await
    }

    pub async fn read_line_bytes(&mut self) -> Result<Option<Vec<u8>>, ConnectionError> {
        self.reader()?.read_line_bytes().await
    }

    pub async fn write_line(&mut self, text: &str) -> Result<(), ConnectionError> {
        Ok(self.writer()?.write_line(text).await?)
    }

    pub async fn write(&mut self, text: &str) -> Result<(), ConnectionError> {
        Ok(self.writer()?.write(text).await?)
    }

    pub async fn flush(&mut self) -> Result<(), ConnectionError> {
        Ok(self.writer()?.flush().await?)
    }

    pub fn is_connected(&self) -> bool {
        self.reader.is_some() && self.writer.is_some()
    }

    pub fn is_secure(&self) -> bool {
        self.secure
    }

    pub fn client_address(&self) -> SocketAddr {
        self.peer_address
    }

    /// Flushes pending output and shuts the socket down. Idempotent.
    pub async fn close(&mut self) {
        self.reader = None;
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush().await {
                debug!("Flush on close to {} failed: {}", self.peer_address, e);
            }
            if let Err(e) = writer.shutdown().await {
                debug!("Shutdown of {} failed: {}", self.peer_address, e);
            }
        }
    }

    /// Runs a TLS server handshake on the existing socket.
    ///
    /// Pending output is flushed before the handshake. Plaintext the client
    /// sent after the command that triggered the upgrade is discarded, never
    /// replayed into the secure session. A failed handshake leaves the
    /// channel closed.
    pub async fn switch_to_secure(
        &mut self,
        tls_config: Arc<RustlsServerConfig>,
    ) -> Result<(), ConnectionError> {
        if self.secure {
            return Err(ConnectionError::Tls("channel is already secure".into()));
        }
        let reader = self.reader.take().ok_or(ConnectionError::Closed)?;
        let writer = self.writer.take().ok_or(ConnectionError::Closed)?;

        let (read_half, leftover) = reader.into_parts();
        if !leftover.is_empty() {
            warn!(
                "Discarding {} plaintext bytes pipelined before TLS handshake from {}",
                leftover.len(),
                self.peer_address
            );
        }
        let write_half = writer.into_inner().await?;

        let tcp = match read_half.unsplit(write_half) {
            ConnectionStream::Plain(tcp) => tcp,
            secure @ ConnectionStream::Tls(_) => {
                self.install(secure);
                return Err(ConnectionError::Tls("channel is already secure".into()));
            }
        };

        let acceptor = TlsAcceptor::from(tls_config);
        match acceptor.accept(tcp).await {
            Ok(tls_stream) => {
                info!("TLS handshake with {} successful", self.peer_address);
                self.install(ConnectionStream::Tls(Box::new(tls_stream)));
                Ok(())
            }
            Err(e) => {
                warn!("TLS handshake with {} failed: {}", self.peer_address, e);
                Err(ConnectionError::Tls(e.to_string()))
            }
        }
    }
}

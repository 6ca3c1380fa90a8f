//! Line-oriented framing over an async byte stream.
//!
//! [`LineReader`] splits input on LF (CRLF or bare LF) and decodes UTF-8,
//! falling back to a single-byte [`FallbackEncoding`] for invalid sequences so
//! that stray 8-bit octets never abort a session. [`LineWriter`] always ends
//! lines with CRLF and passes `write` data through untouched.

mod channel;

pub use channel::{Channel, ConnectionStream};

use std::str::FromStr;

use bytes::BytesMut;
use log::trace;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};

use super::error::ConnectionError;

/// Default cap on a single received line, terminator included.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 64 * 1024;

const READ_CHUNK: usize = 4096;

/// Decoding applied to lines that are not valid UTF-8.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackEncoding {
    /// ISO-8859-1: every byte maps to the code point of the same value.
    #[default]
    Latin1,
    /// US-ASCII: bytes above 0x7F become `?`.
    Ascii,
}

impl FallbackEncoding {
    pub fn decode(self, bytes: &[u8]) -> String {
        match self {
            FallbackEncoding::Latin1 => bytes.iter().map(|&b| char::from(b)).collect(),
            FallbackEncoding::Ascii => bytes
                .iter()
                .map(|&b| if b.is_ascii() { char::from(b) } else { '?' })
                .collect(),
        }
    }

    /// UTF-8 when valid, this encoding otherwise.
    pub fn decode_line(self, bytes: Vec<u8>) -> String {
        match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => self.decode(e.as_bytes()),
        }
    }
}

impl FromStr for FallbackEncoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "latin1" | "iso-8859-1" => Ok(FallbackEncoding::Latin1),
            "ascii" | "us-ascii" => Ok(FallbackEncoding::Ascii),
            other => Err(format!("unknown fallback encoding '{other}'")),
        }
    }
}

/// Reads CRLF (or LF) terminated lines.
///
/// Reads are cancel-safe: bytes already pulled from the stream stay in the
/// internal buffer if a `read_line` future is dropped, so a later call
/// resumes exactly where the cancelled one stopped.
///
/// A line longer than the limit is skipped up to its LF and reported as
/// [`ConnectionError::LineTooLong`]; the next call starts on the following
/// line, so the caller may answer and keep reading.
pub struct LineReader<R> {
    inner: R,
    buffer: BytesMut,
    fallback: FallbackEncoding,
    max_line_length: usize,
    discarding: bool,
}

impl<R> LineReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            fallback: FallbackEncoding::default(),
            max_line_length: DEFAULT_MAX_LINE_LENGTH,
            discarding: false,
        }
    }

    pub fn with_fallback(mut self, fallback: FallbackEncoding) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn with_max_line_length(mut self, max_line_length: usize) -> Self {
        self.max_line_length = max_line_length;
        self
    }

    fn line_too_long(&mut self) -> ConnectionError {
        self.discarding = false;
        ConnectionError::LineTooLong {
            max: self.max_line_length,
        }
    }

    /// Reads one line without its terminator, as raw bytes.
    ///
    /// Returns `Ok(None)` at a clean end of stream. An unterminated final
    /// line is returned as-is before end of stream is reported.
    pub async fn read_line_bytes(&mut self) -> Result<Option<Vec<u8>>, ConnectionError> {
        loop {
            if let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
                if self.discarding || newline > self.max_line_length {
                    let _ = self.buffer.split_to(newline + 1);
                    return Err(self.line_too_long());
                }
                let mut line = self.buffer.split_to(newline + 1);
                line.truncate(newline);
                if line.ends_with(b"\r") {
                    line.truncate(newline - 1);
                }
                return Ok(Some(line.to_vec()));
            }

            if self.discarding || self.buffer.len() > self.max_line_length {
                trace!("Skipping {} bytes of an overlong line", self.buffer.len());
                self.buffer.clear();
                self.discarding = true;
            }

            self.buffer.reserve(READ_CHUNK);
            let read = self.inner.read_buf(&mut self.buffer).await?;
            if read == 0 {
                if self.discarding {
                    return Err(self.line_too_long());
                }
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                let mut line = self.buffer.split().to_vec();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(Some(line));
            }
            trace!("Read {} bytes from stream", read);
        }
    }

    /// Reads one line and decodes it.
    pub async fn read_line(&mut self) -> Result<Option<String>, ConnectionError> {
        let fallback = self.fallback;
        Ok(self
            .read_line_bytes()
            .await?
            .map(|bytes| fallback.decode_line(bytes)))
    }

    /// Number of bytes received but not yet returned as a line.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn fallback(&self) -> FallbackEncoding {
        self.fallback
    }

    /// Releases the stream along with any unconsumed buffered bytes.
    pub fn into_parts(self) -> (R, BytesMut) {
        (self.inner, self.buffer)
    }
}

/// Writes text to a stream, enforcing CRLF on `write_line`.
///
/// Dropping or unwrapping the writer never shuts the underlying stream down;
/// use [`LineWriter::into_inner`] to hand the stream back after flushing.
pub struct LineWriter<W>
where
    W: AsyncWrite,
{
    inner: BufWriter<W>,
}

impl<W> LineWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(inner: W) -> Self {
        Self {
            inner: BufWriter::new(inner),
        }
    }

    /// Writes `text` followed by exactly one CRLF.
    ///
    /// Trailing CR/LF characters in `text` are dropped first so the line
    /// never ends in a doubled terminator.
    pub async fn write_line(&mut self, text: &str) -> io::Result<()> {
        let text = text.trim_end_matches(['\r', '\n']);
        self.inner.write_all(text.as_bytes()).await?;
        self.inner.write_all(b"\r\n").await
    }

    /// Writes `text` verbatim.
    pub async fn write(&mut self, text: &str) -> io::Result<()> {
        self.inner.write_all(text.as_bytes()).await
    }

    /// Writes raw bytes verbatim.
    pub async fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.inner.write_all(bytes).await
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.inner.flush().await
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.inner.shutdown().await
    }

    pub fn get_ref(&self) -> &W {
        self.inner.get_ref()
    }

    /// Flushes and returns the underlying stream, still open.
    pub async fn into_inner(mut self) -> io::Result<W> {
        self.inner.flush().await?;
        Ok(self.inner.into_inner())
    }
}

#[cfg(test)]
mod tests;

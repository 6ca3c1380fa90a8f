//! Message assembly during `DATA`.
//!
//! A [`MessageBuilder`] accumulates the envelope and body of the message in
//! progress and is finalised into an immutable [`Message`]. Two stores are
//! provided: [`MemoryMessageBuilder`] keeps the body in a growable buffer and
//! [`FileMessageBuilder`] spills it to a temporary file which is deleted when
//! the builder or the resulting message is dropped.

use std::io::Cursor;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use tempfile::TempPath;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Where message bodies are stored while being received.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStore {
    #[default]
    Memory,
    /// Temporary files, in the given directory or the system temp dir.
    File(Option<PathBuf>),
}

/// Envelope and transfer metadata of a message.
#[derive(Debug, Clone, Serialize)]
pub struct Envelope {
    pub from: String,
    /// Recipients in the order given. Duplicates are kept.
    pub to: Vec<String>,
    pub received_date: DateTime<Utc>,
    pub client_address: Option<SocketAddr>,
    pub secure_connection: bool,
    pub eight_bit_transfer: bool,
    pub smtp_utf8: bool,
    /// Size announced with the `SIZE` parameter, if any.
    pub declared_size: Option<u64>,
}

impl Default for Envelope {
    fn default() -> Self {
        Self {
            from: String::new(),
            to: Vec::new(),
            received_date: Utc::now(),
            client_address: None,
            secure_connection: false,
            eight_bit_transfer: false,
            smtp_utf8: false,
            declared_size: None,
        }
    }
}

/// Readable body stream.
pub type DataReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Mutable accumulator for the message being received.
///
/// The body is written through [`data_writer`](MessageBuilder::data_writer)
/// and must be complete before [`to_message`](MessageBuilder::to_message) is
/// called.
#[async_trait]
pub trait MessageBuilder: Send + Sync {
    fn envelope(&self) -> &Envelope;

    fn envelope_mut(&mut self) -> &mut Envelope;

    /// Stream that receives the body.
    fn data_writer(&mut self) -> &mut (dyn AsyncWrite + Send + Sync + Unpin);

    /// A fresh reader over everything written so far, from the start.
    async fn data_reader(&mut self) -> io::Result<DataReader>;

    /// Finalises the builder.
    async fn to_message(self: Box<Self>) -> io::Result<Message>;
}

/// Keeps the body in memory.
pub struct MemoryMessageBuilder {
    envelope: Envelope,
    data: Vec<u8>,
}

impl MemoryMessageBuilder {
    pub fn new(envelope: Envelope) -> Self {
        Self {
            envelope,
            data: Vec::new(),
        }
    }
}

#[async_trait]
impl MessageBuilder for MemoryMessageBuilder {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    fn data_writer(&mut self) -> &mut (dyn AsyncWrite + Send + Sync + Unpin) {
        &mut self.data
    }

    async fn data_reader(&mut self) -> io::Result<DataReader> {
        Ok(Box::new(Cursor::new(Bytes::copy_from_slice(&self.data))))
    }

    async fn to_message(self: Box<Self>) -> io::Result<Message> {
        let MemoryMessageBuilder { envelope, data } = *self;
        Ok(Message {
            envelope,
            size: data.len() as u64,
            data: MessageData::Memory(Bytes::from(data)),
        })
    }
}

/// Spills the body to a temporary file.
pub struct FileMessageBuilder {
    envelope: Envelope,
    file: tokio::fs::File,
    path: TempPath,
}

impl FileMessageBuilder {
    /// Creates the backing file in `directory`, or the system temp dir.
    pub async fn new(envelope: Envelope, directory: Option<&Path>) -> io::Result<Self> {
        let directory = directory.map(Path::to_path_buf);
        let named = tokio::task::spawn_blocking(move || {
            let mut builder = tempfile::Builder::new();
            builder.prefix("smtp-message-").suffix(".eml");
            match directory {
                Some(directory) => builder.tempfile_in(directory),
                None => builder.tempfile(),
            }
        })
        .await
        .map_err(io::Error::other)??;
        let (file, path) = named.into_parts();
        debug!("Spooling message body to {}", path.display());
        Ok(Self {
            envelope,
            file: tokio::fs::File::from_std(file),
            path,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl MessageBuilder for FileMessageBuilder {
    fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    fn envelope_mut(&mut self) -> &mut Envelope {
        &mut self.envelope
    }

    fn data_writer(&mut self) -> &mut (dyn AsyncWrite + Send + Sync + Unpin) {
        &mut self.file
    }

    async fn data_reader(&mut self) -> io::Result<DataReader> {
        self.file.flush().await?;
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(Box::new(file))
    }

    async fn to_message(self: Box<Self>) -> io::Result<Message> {
        let FileMessageBuilder {
            envelope,
            mut file,
            path,
        } = *self;
        file.flush().await?;
        let size = file.metadata().await?.len();
        drop(file);
        Ok(Message {
            envelope,
            size,
            data: MessageData::File(path),
        })
    }
}

#[derive(Debug)]
enum MessageData {
    Memory(Bytes),
    File(TempPath),
}

/// A received message: envelope plus an opaque body.
#[derive(Debug, Serialize)]
pub struct Message {
    #[serde(flatten)]
    envelope: Envelope,
    size: u64,
    #[serde(skip)]
    data: MessageData,
}

impl Message {
    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }

    pub fn from(&self) -> &str {
        &self.envelope.from
    }

    pub fn to(&self) -> &[String] {
        &self.envelope.to
    }

    /// Body size in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Backing file, for file-stored messages.
    pub fn file_path(&self) -> Option<&Path> {
        match &self.data {
            MessageData::File(path) => Some(path),
            MessageData::Memory(_) => None,
        }
    }

    /// Opens the body positioned at its first byte.
    pub async fn open_data(&self) -> io::Result<DataReader> {
        match &self.data {
            MessageData::Memory(bytes) => Ok(Box::new(Cursor::new(bytes.clone()))),
            MessageData::File(path) => Ok(Box::new(tokio::fs::File::open(path).await?)),
        }
    }

    /// Reads the whole body.
    pub async fn read_data(&self) -> io::Result<Vec<u8>> {
        let mut reader = self.open_data().await?;
        let mut data = Vec::with_capacity(self.size as usize);
        reader.read_to_end(&mut data).await?;
        Ok(data)
    }
}

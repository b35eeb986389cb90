//! Sources and destinations for object content.

use crate::traits::{Cubby, StorageError, StorageResult};
use bytes::Bytes;
use std::io::ErrorKind;
use std::path::PathBuf;
use tokio::fs;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Where `store` reads content from.
///
/// Every source is buffered fully into memory before transmission. A borrowed
/// reader is read to EOF but never closed.
pub enum Source<'a> {
    Path(PathBuf),
    Reader(&'a mut (dyn AsyncRead + Unpin + Send)),
    Bytes(Bytes),
    Text(String),
}

impl<'a> Source<'a> {
    /// Pick the single source among optional arguments.
    ///
    /// Fails with [`StorageError::InvalidArgument`] unless exactly one is given.
    pub fn from_options(
        path: Option<PathBuf>,
        reader: Option<&'a mut (dyn AsyncRead + Unpin + Send)>,
        bytes: Option<Bytes>,
        text: Option<String>,
    ) -> StorageResult<Self> {
        let mut sources: Vec<Source<'a>> = Vec::with_capacity(1);
        sources.extend(path.map(Source::Path));
        sources.extend(reader.map(Source::Reader));
        sources.extend(bytes.map(Source::Bytes));
        sources.extend(text.map(Source::Text));

        if sources.len() != 1 {
            return Err(StorageError::InvalidArgument(format!(
                "Exactly one of [filepath, stream, bytes, text] must be given, got {}",
                sources.len()
            )));
        }
        sources
            .pop()
            .ok_or_else(|| StorageError::InvalidArgument("No source given".to_string()))
    }

    pub async fn into_bytes(self) -> StorageResult<Bytes> {
        match self {
            Source::Path(path) => Ok(Bytes::from(fs::read(&path).await?)),
            Source::Reader(reader) => {
                let mut buffer = Vec::new();
                reader.read_to_end(&mut buffer).await?;
                Ok(Bytes::from(buffer))
            }
            Source::Bytes(bytes) => Ok(bytes),
            Source::Text(text) => Ok(Bytes::from(text.into_bytes())),
        }
    }
}

impl From<Bytes> for Source<'_> {
    fn from(bytes: Bytes) -> Self {
        Source::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Source<'_> {
    fn from(bytes: Vec<u8>) -> Self {
        Source::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Source<'_> {
    fn from(bytes: &'static [u8]) -> Self {
        Source::Bytes(Bytes::from_static(bytes))
    }
}

/// Where `retrieve_to` writes decoded content.
pub enum Destination<'a> {
    /// A file path; an existing directory receives `<dir>/<key>`.
    Path(PathBuf),
    Writer(&'a mut (dyn AsyncWrite + Unpin + Send)),
    Buffer(&'a mut Vec<u8>),
}

impl<'a> Destination<'a> {
    /// Pick at most one destination among optional arguments.
    ///
    /// `Ok(None)` means "return the content in memory".
    pub fn from_options(
        path: Option<PathBuf>,
        writer: Option<&'a mut (dyn AsyncWrite + Unpin + Send)>,
        buffer: Option<&'a mut Vec<u8>>,
    ) -> StorageResult<Option<Self>> {
        let mut destinations: Vec<Destination<'a>> = Vec::with_capacity(1);
        destinations.extend(path.map(Destination::Path));
        destinations.extend(writer.map(Destination::Writer));
        destinations.extend(buffer.map(Destination::Buffer));

        if destinations.len() > 1 {
            return Err(StorageError::InvalidArgument(format!(
                "At most one of [filepath, stream, buffer] may be given, got {}",
                destinations.len()
            )));
        }
        Ok(destinations.pop())
    }

    pub(crate) async fn write(self, key: &str, data: Bytes) -> StorageResult<()> {
        match self {
            Destination::Path(path) => {
                let is_dir = fs::metadata(&path)
                    .await
                    .map(|m| m.is_dir())
                    .unwrap_or(false);
                let path = if is_dir { path.join(key) } else { path };
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent).await?;
                }
                fs::write(&path, &data).await?;
                Ok(())
            }
            Destination::Writer(writer) => {
                let result = async {
                    writer.write_all(&data).await?;
                    writer.flush().await?;
                    Ok::<_, std::io::Error>(())
                }
                .await;
                result.map_err(|e| match e.kind() {
                    ErrorKind::BrokenPipe | ErrorKind::NotConnected => StorageError::AlreadyClosed,
                    _ => StorageError::IoError(e),
                })
            }
            Destination::Buffer(buffer) => {
                buffer.extend_from_slice(&data);
                Ok(())
            }
        }
    }
}

/// Target of `copy_to` / `move_to`.
#[derive(Clone, Copy)]
pub enum CopyTarget<'a> {
    /// Another key in the same bucket.
    Key(&'a str),
    /// An existing handle on the same backend.
    Cubby(&'a dyn Cubby),
}

/// Stored bytes as fetched, before decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawObject {
    pub body: Bytes,
    pub content_encoding: Option<String>,
}

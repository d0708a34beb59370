use std::io;
use std::path::PathBuf;
use std::pin::Pin;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use tokio::fs::File;
use tokio_util::io::ReaderStream;

/// A boxed stream of bytes, used to move large payloads without buffering
/// them up front.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, io::Error>> + Send>>;

/// Wrap an in-memory buffer as a single-chunk [`ByteStream`].
pub fn stream_from_bytes(data: impl Into<Bytes>) -> ByteStream {
  let data = data.into();
  Box::pin(futures::stream::once(async move { Ok(data) }))
}

/// Drain a [`ByteStream`] into one contiguous buffer.
pub async fn collect_stream(stream: ByteStream) -> Result<Bytes, io::Error> {
  let mut stream = stream;
  let mut buffer = BytesMut::new();

  while let Some(chunk) = stream.next().await {
    buffer.extend_from_slice(&chunk?);
  }

  Ok(buffer.freeze())
}

/// A lazily fetched payload.
///
/// The resolver calls `fetch` every time a reference backed by this source is
/// dereferenced; nothing is cached.
#[async_trait]
pub trait BlobSource: Send + Sync {
  /// Produce the full payload.
  async fn fetch(&self) -> Result<Bytes, io::Error>;
}

/// A payload read from the local filesystem on demand.
pub struct FileSource {
  path: PathBuf,
}

impl FileSource {
  /// Create a source for the file at `path`. The file is not touched until
  /// the first fetch.
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  /// Open the file as a stream of chunks.
  pub async fn open(&self) -> Result<ByteStream, io::Error> {
    let file = File::open(&self.path).await?;
    Ok(Box::pin(ReaderStream::new(file)))
  }
}

#[async_trait]
impl BlobSource for FileSource {
  async fn fetch(&self) -> Result<Bytes, io::Error> {
    collect_stream(self.open().await?).await
  }
}

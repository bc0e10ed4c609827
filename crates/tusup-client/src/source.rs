//! Byte sources the engine reads upload data from
//!
//! The engine only needs the total length and random-access reads of byte
//! ranges; where the bytes come from is up to the caller.

use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, Stream};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

/// A streamed request body
pub type BodyStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// Sequential reader over a source, positioned by [`ByteSource::reader_at`]
pub type RangeReader = Box<dyn AsyncRead + Send + Unpin>;

/// Random-access source of upload bytes with a known total size
#[async_trait]
pub trait ByteSource: Send + Sync {
    /// Total size in bytes
    fn len(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read exactly `len` bytes starting at `offset`
    async fn read_range(&self, offset: u64, len: u64) -> io::Result<Bytes>;

    /// Sequential reader starting at `offset`, for sources where that is
    /// cheaper than repeated `read_range` calls. `None` falls back to
    /// `read_range` per frame.
    async fn reader_at(&self, _offset: u64) -> io::Result<Option<RangeReader>> {
        Ok(None)
    }
}

/// In-memory byte source
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    data: Bytes,
}

impl MemorySource {
    pub fn new(data: impl Into<Bytes>) -> Self {
        Self { data: data.into() }
    }
}

impl From<Vec<u8>> for MemorySource {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl From<Bytes> for MemorySource {
    fn from(data: Bytes) -> Self {
        Self::new(data)
    }
}

impl From<&'static [u8]> for MemorySource {
    fn from(data: &'static [u8]) -> Self {
        Self::new(Bytes::from_static(data))
    }
}

#[async_trait]
impl ByteSource for MemorySource {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    async fn read_range(&self, offset: u64, len: u64) -> io::Result<Bytes> {
        let end = offset.checked_add(len).filter(|end| *end <= self.len());
        match end {
            Some(end) => Ok(self.data.slice(offset as usize..end as usize)),
            None => Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!(
                    "range {}+{} exceeds source of {} bytes",
                    offset,
                    len,
                    self.len()
                ),
            )),
        }
    }
}

/// File-backed byte source
///
/// The size is captured when the source is opened. Every `read_range` and
/// every streamed range opens its own handle, so they never share a cursor.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    len: u64,
}

impl FileSource {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let metadata = tokio::fs::metadata(&path).await?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        Ok(Self {
            path,
            len: metadata.len(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ByteSource for FileSource {
    fn len(&self) -> u64 {
        self.len
    }

    async fn read_range(&self, offset: u64, len: u64) -> io::Result<Bytes> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(io::SeekFrom::Start(offset)).await?;
        let mut buf = vec![0u8; len as usize];
        file.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    async fn reader_at(&self, offset: u64) -> io::Result<Option<RangeReader>> {
        let mut file = tokio::fs::File::open(&self.path).await?;
        file.seek(io::SeekFrom::Start(offset)).await?;
        Ok(Some(Box::new(file)))
    }
}

struct RangeCursor {
    pos: u64,
    reader: Option<RangeReader>,
    opened: bool,
}

/// Stream `len` bytes of `source` starting at `offset`, in frames of at most `frame_size`
///
/// Uses one [`ByteSource::reader_at`] reader for the whole range when the
/// source offers one.
pub fn stream_range(
    source: Arc<dyn ByteSource>,
    offset: u64,
    len: u64,
    frame_size: u64,
) -> BodyStream {
    let end = offset.saturating_add(len);
    let frame_size = frame_size.max(1);
    let cursor = RangeCursor {
        pos: offset,
        reader: None,
        opened: false,
    };

    Box::pin(stream::try_unfold(cursor, move |mut cursor| {
        let source = Arc::clone(&source);
        async move {
            if cursor.pos >= end {
                return Ok(None);
            }
            if !cursor.opened {
                cursor.reader = source.reader_at(cursor.pos).await?;
                cursor.opened = true;
            }

            let want = frame_size.min(end - cursor.pos);
            let frame = match cursor.reader.as_mut() {
                Some(reader) => {
                    let mut buf = vec![0u8; want as usize];
                    reader.read_exact(&mut buf).await?;
                    Bytes::from(buf)
                }
                None => source.read_range(cursor.pos, want).await?,
            };
            if frame.len() as u64 != want {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "short read at offset {}: {} of {} bytes",
                        cursor.pos,
                        frame.len(),
                        want
                    ),
                ));
            }
            cursor.pos += want;
            Ok(Some((frame, cursor)))
        }
    }))
}

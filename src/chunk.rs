use std::io;
use std::path::Path;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::io::ReaderStream;

use crate::config::CompressionFormat;

pub mod compress;

pub use compress::{compress_bytes, Compressed};

/// Size of the blocks pulled from a source reader.
pub const READ_BLOCK_SIZE: usize = 64 * 1024;

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Upper bound on the buffer reserved up front by `read_all`; the declared
/// size is only a hint.
const MAX_PREALLOC: u64 = 8 * 1024 * 1024;

/// A lazy, finite, non-restartable sequence of byte blocks.
pub type ByteBlocks = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// A file (or in-memory buffer) to upload.
pub struct UploadSource {
    pub name: String,
    pub size: u64,
    pub content_type: String,
    reader: Box<dyn AsyncRead + Send + Unpin>,
}

impl UploadSource {
    pub async fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.to_string_lossy().into_owned());
        let content_type = mime_guess::from_path(path)
            .first_raw()
            .unwrap_or(DEFAULT_CONTENT_TYPE)
            .to_string();

        Ok(Self {
            name,
            size,
            content_type,
            reader: Box::new(file),
        })
    }

    pub fn from_bytes(name: impl Into<String>, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        Self {
            name: name.into(),
            size: data.len() as u64,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            reader: Box::new(io::Cursor::new(data)),
        }
    }

    /// Wrap an arbitrary reader. `size` is what progress is measured against.
    pub fn from_reader<R>(name: impl Into<String>, size: u64, reader: R) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self {
            name: name.into(),
            size,
            content_type: DEFAULT_CONTENT_TYPE.to_string(),
            reader: Box::new(reader),
        }
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = content_type.into();
        self
    }

    pub fn into_blocks(self) -> ByteBlocks {
        Box::pin(ReaderStream::with_capacity(self.reader, READ_BLOCK_SIZE))
    }

    pub async fn read_all(mut self) -> io::Result<Bytes> {
        let mut buf = Vec::with_capacity(self.size.min(MAX_PREALLOC) as usize);
        self.reader.read_to_end(&mut buf).await?;
        Ok(Bytes::from(buf))
    }
}

/// Build the read stage of the pipeline: count raw bytes as they are pulled,
/// then compress when a format is configured.
pub fn pipeline(
    blocks: ByteBlocks,
    compression: Option<CompressionFormat>,
    consumed: Arc<AtomicU64>,
) -> ByteBlocks {
    let counted = blocks.inspect(move |block| {
        if let Ok(block) = block {
            consumed.fetch_add(block.len() as u64, Ordering::Relaxed);
        }
    });

    match compression {
        Some(format) => Box::pin(Compressed::new(counted, format)),
        None => Box::pin(counted),
    }
}

/// A contiguous run of upload bytes with its 1-based part number.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub part_no: u32,
    pub data: Bytes,
}

/// Re-buffers a block stream into chunks of exactly `chunk_size` bytes; the
/// final chunk carries whatever is left.
pub struct Chunker<S> {
    blocks: S,
    chunk_size: usize,
    buffer: BytesMut,
    next_part: u32,
    exhausted: bool,
}

impl<S> Chunker<S>
where
    S: Stream<Item = io::Result<Bytes>> + Unpin,
{
    pub fn new(blocks: S, chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            blocks,
            chunk_size,
            buffer: BytesMut::with_capacity(chunk_size),
            next_part: 1,
            exhausted: false,
        }
    }

    /// Number of chunks handed out so far.
    pub fn emitted(&self) -> u32 {
        self.next_part - 1
    }

    pub async fn next_chunk(&mut self) -> Option<io::Result<Chunk>> {
        loop {
            if self.buffer.len() >= self.chunk_size {
                let data = self.buffer.split_to(self.chunk_size).freeze();
                return Some(Ok(self.emit(data)));
            }

            if self.exhausted {
                if self.buffer.is_empty() {
                    return None;
                }
                let data = self.buffer.split().freeze();
                return Some(Ok(self.emit(data)));
            }

            match self.blocks.next().await {
                Some(Ok(block)) => self.buffer.extend_from_slice(&block),
                Some(Err(e)) => {
                    self.exhausted = true;
                    self.buffer.clear();
                    return Some(Err(e));
                }
                None => self.exhausted = true,
            }
        }
    }

    fn emit(&mut self, data: Bytes) -> Chunk {
        let part_no = self.next_part;
        self.next_part += 1;
        Chunk { part_no, data }
    }
}

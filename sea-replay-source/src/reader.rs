use crate::{error::io_err, SourceErr, SourceResult};
use sea_replay_runtime::{file, AsyncMutex};
use sea_replay_types::{
    export::{
        async_trait,
        futures::{stream::BoxStream, StreamExt},
    },
    Problem, Range, ReplayErr,
};
use std::{fmt::Debug, path::PathBuf, sync::Arc};

/// Bytes of a fetched range, delivered in chunks as they arrive.
pub type ByteStream = BoxStream<'static, Result<Vec<u8>, std::io::Error>>;

const FETCH_CHUNK_SIZE: usize = 64 * 1024;

#[async_trait]
/// Random access to the bytes of one resource. This is what a format decoder reads from.
pub trait ByteReader: Debug + Send + Sync {
    fn size(&self) -> u64;

    /// Resolves once every byte of `range` is available. Ranges reaching beyond the end
    /// are clipped to the end.
    async fn read(&self, range: Range) -> SourceResult<Vec<u8>>;

    /// Problems met along the way that did not fail a read, e.g. retried fetches. Each one
    /// is handed out once.
    async fn take_problems(&self) -> Vec<Problem> {
        Vec::new()
    }
}

#[async_trait]
/// A remote (or remote-like) resource that can only be read by fetching ranges,
/// e.g. with HTTP range requests.
pub trait RangeFetcher: Debug + Send + Sync + 'static {
    async fn size(&self) -> SourceResult<u64>;

    /// Opens a connection streaming the bytes of `range` from its start.
    async fn fetch(&self, range: Range) -> SourceResult<ByteStream>;
}

pub(crate) fn clip(range: Range, size: u64) -> Range {
    let end = range.end.min(size);
    Range::new(range.start.min(end), end)
}

#[derive(Debug)]
/// Reads a local file.
pub struct FileReader {
    path: PathBuf,
    file: AsyncMutex<file::File>,
    size: u64,
}

impl FileReader {
    pub async fn open(path: impl Into<PathBuf>) -> SourceResult<Self> {
        let path = path.into();
        let (file, size) = file::open(&path).await.map_err(io_err)?;
        log::debug!("Opened {} ({size} bytes)", path.display());
        Ok(Self {
            path,
            file: AsyncMutex::new(file),
            size,
        })
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl ByteReader for FileReader {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read(&self, range: Range) -> SourceResult<Vec<u8>> {
        let range = clip(range, self.size);
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let mut file = self.file.lock().await;
        let bytes = file::read_at(&mut file, range.start, range.len() as usize)
            .await
            .map_err(io_err)?;
        if (bytes.len() as u64) < range.len() {
            return Err(ReplayErr::Backend(SourceErr::NotEnoughBytes));
        }
        Ok(bytes)
    }
}

#[derive(Debug, Clone)]
/// Reads from a buffer in memory. It is also a [`RangeFetcher`], so it can stand in for a
/// remote resource.
pub struct MemoryReader {
    bytes: Arc<Vec<u8>>,
    chunk_size: usize,
}

impl MemoryReader {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self {
            bytes: Arc::new(bytes),
            chunk_size: FETCH_CHUNK_SIZE,
        }
    }

    /// Size of the chunks a fetch is streamed in.
    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    fn slice(&self, range: Range) -> Vec<u8> {
        let range = clip(range, self.bytes.len() as u64);
        self.bytes[range.start as usize..range.end as usize].to_vec()
    }
}

#[async_trait]
impl ByteReader for MemoryReader {
    fn size(&self) -> u64 {
        self.bytes.len() as u64
    }

    async fn read(&self, range: Range) -> SourceResult<Vec<u8>> {
        Ok(self.slice(range))
    }
}

#[async_trait]
impl RangeFetcher for MemoryReader {
    async fn size(&self) -> SourceResult<u64> {
        Ok(self.bytes.len() as u64)
    }

    async fn fetch(&self, range: Range) -> SourceResult<ByteStream> {
        let bytes = self.slice(range);
        let chunks: Vec<Result<Vec<u8>, std::io::Error>> = bytes
            .chunks(self.chunk_size)
            .map(|c| Ok(c.to_vec()))
            .collect();
        Ok(sea_replay_types::export::futures::stream::iter(chunks).boxed())
    }
}

#[derive(Debug, Clone)]
/// Fetches ranges of a local file, opening the file anew for every connection.
pub struct FileFetcher {
    path: PathBuf,
}

impl FileFetcher {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl RangeFetcher for FileFetcher {
    async fn size(&self) -> SourceResult<u64> {
        let (_, size) = file::open(&self.path).await.map_err(io_err)?;
        Ok(size)
    }

    async fn fetch(&self, range: Range) -> SourceResult<ByteStream> {
        let (file, size) = file::open(&self.path).await.map_err(io_err)?;
        let range = clip(range, size);
        let stream = sea_replay_types::export::futures::stream::unfold(
            (file, range.start, range.end),
            |(mut file, pos, end)| async move {
                if pos >= end {
                    return None;
                }
                let len = ((end - pos) as usize).min(FETCH_CHUNK_SIZE);
                match file::read_at(&mut file, pos, len).await {
                    Ok(bytes) if bytes.is_empty() => Some((
                        Err(std::io::ErrorKind::UnexpectedEof.into()),
                        (file, end, end),
                    )),
                    Ok(bytes) => {
                        let next = pos + bytes.len() as u64;
                        Some((Ok(bytes), (file, next, end)))
                    }
                    Err(e) => Some((Err(e), (file, end, end))),
                }
            },
        );
        Ok(stream.boxed())
    }
}

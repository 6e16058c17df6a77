//! A byte reader over a remote resource, downloading ranges on demand through one connection
//! at a time and keeping every downloaded byte.
//!
//! The reader is an actor: a background task owns the downloaded bytes, the pending reads and
//! the in-flight connection. Handles talk to it over a channel.

use crate::{
    buffer::SparseBuffer,
    coordinator::{decide_next_range, ConnectionParams, CoordinatorErr},
    ByteReader, ByteStream, RangeFetcher, SourceErr, SourceResult,
};
use flume::{unbounded, Receiver, Sender};
use sea_replay_runtime::{sleep, spawn_task};
use sea_replay_types::{
    export::{
        async_trait,
        futures::{
            future::{select, Either},
            pin_mut, StreamExt,
        },
    },
    Problem, Range, ReplayErr,
};
use std::{collections::VecDeque, sync::Arc, time::Duration};

pub const DEFAULT_MAX_REQUEST_SIZE: u64 = 150 * 1024 * 1024;
pub const DEFAULT_CONTINUE_THRESHOLD: u64 = 5 * 1024 * 1024;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(100);
/// Older problems are dropped if nobody takes them.
const MAX_PROBLEMS: usize = 100;

#[derive(Debug, Clone)]
pub struct CachedReaderOptions {
    max_request_size: u64,
    continue_threshold: u64,
    max_retries: u32,
    retry_backoff: Duration,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub downloaded: Vec<Range>,
    /// Bytes received over all connections, including bytes downloaded twice.
    pub bytes_fetched: u64,
    pub connections: u32,
    /// Fetches that failed and were retried.
    pub retries: u32,
}

#[derive(Debug, Clone)]
/// A [`ByteReader`] over a [`RangeFetcher`]. Cloning gives another handle to the same cache.
pub struct CachedReader {
    size: u64,
    sender: Sender<CacheRequest>,
}

enum CacheRequest {
    Read {
        range: Range,
        reply: Sender<SourceResult<Vec<u8>>>,
    },
    Stats {
        reply: Sender<CacheStats>,
    },
    Problems {
        reply: Sender<Vec<Problem>>,
    },
}

struct PendingRead {
    range: Range,
    reply: Sender<SourceResult<Vec<u8>>>,
}

struct Connection {
    /// What this connection has yet to deliver.
    remaining: Range,
    stream: ByteStream,
}

struct Cache {
    fetcher: Arc<dyn RangeFetcher>,
    options: CachedReaderOptions,
    size: u64,
    store: SparseBuffer,
    pending: VecDeque<PendingRead>,
    connection: Option<Connection>,
    last_request_end: Option<u64>,
    failures: u32,
    /// Set after giving up on the fetcher; no read-ahead until the next read.
    stalled: bool,
    problems: VecDeque<Problem>,
    stats: CacheStats,
}

enum Event {
    Request(Option<CacheRequest>),
    Chunk(Option<Result<Vec<u8>, std::io::Error>>),
}

impl Default for CachedReaderOptions {
    fn default() -> Self {
        Self {
            max_request_size: DEFAULT_MAX_REQUEST_SIZE,
            continue_threshold: DEFAULT_CONTINUE_THRESHOLD,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff: RETRY_BACKOFF,
        }
    }
}

impl CachedReaderOptions {
    /// The largest range a single read may ask for, also the size of a read-ahead window.
    /// If it is at least the file size, the whole file is downloaded in the background.
    pub fn max_request_size(&self) -> &u64 {
        &self.max_request_size
    }
    pub fn set_max_request_size(&mut self, v: u64) -> &mut Self {
        self.max_request_size = v;
        self
    }

    /// How far behind the requested bytes the current connection may be before a new
    /// connection is opened instead of waiting.
    pub fn continue_threshold(&self) -> &u64 {
        &self.continue_threshold
    }
    pub fn set_continue_threshold(&mut self, v: u64) -> &mut Self {
        self.continue_threshold = v;
        self
    }

    /// Consecutive fetch failures tolerated before pending reads fail.
    pub fn max_retries(&self) -> &u32 {
        &self.max_retries
    }
    pub fn set_max_retries(&mut self, v: u32) -> &mut Self {
        self.max_retries = v;
        self
    }

    pub fn retry_backoff(&self) -> &Duration {
        &self.retry_backoff
    }
    pub fn set_retry_backoff(&mut self, v: Duration) -> &mut Self {
        self.retry_backoff = v;
        self
    }
}

impl CachedReader {
    pub async fn new<F: RangeFetcher>(fetcher: F, options: CachedReaderOptions) -> SourceResult<Self> {
        let fetcher: Arc<dyn RangeFetcher> = Arc::new(fetcher);
        let size = fetcher.size().await?;
        let (sender, receiver) = unbounded();
        let cache = Cache {
            fetcher,
            options,
            size,
            store: SparseBuffer::new(),
            pending: VecDeque::new(),
            connection: None,
            last_request_end: None,
            failures: 0,
            stalled: false,
            problems: VecDeque::new(),
            stats: CacheStats::default(),
        };
        let _handle = spawn_task(cache.run(receiver));
        Ok(Self { size, sender })
    }

    pub async fn stats(&self) -> SourceResult<CacheStats> {
        let (reply, receiver) = unbounded();
        self.sender
            .send_async(CacheRequest::Stats { reply })
            .await
            .map_err(|_| ReplayErr::TaskDead("CachedReader"))?;
        receiver
            .recv_async()
            .await
            .map_err(|_| ReplayErr::TaskDead("CachedReader"))
    }
}

#[async_trait]
impl ByteReader for CachedReader {
    fn size(&self) -> u64 {
        self.size
    }

    async fn read(&self, range: Range) -> SourceResult<Vec<u8>> {
        let range = crate::reader::clip(range, self.size);
        if range.is_empty() {
            return Ok(Vec::new());
        }
        let (reply, receiver) = unbounded();
        self.sender
            .send_async(CacheRequest::Read { range, reply })
            .await
            .map_err(|_| ReplayErr::TaskDead("CachedReader"))?;
        receiver
            .recv_async()
            .await
            .map_err(|_| ReplayErr::TaskDead("CachedReader"))?
    }

    async fn take_problems(&self) -> Vec<Problem> {
        let (reply, receiver) = unbounded();
        if self
            .sender
            .send_async(CacheRequest::Problems { reply })
            .await
            .is_err()
        {
            return Vec::new();
        }
        receiver.recv_async().await.unwrap_or_default()
    }
}

impl Cache {
    async fn run(mut self, receiver: Receiver<CacheRequest>) {
        loop {
            self.resolve();
            if let Err(e) = self.connect().await {
                self.on_failure(e).await;
                continue;
            }

            let event = match self.connection.as_mut() {
                Some(conn) => {
                    let request = receiver.recv_async();
                    pin_mut!(request);
                    match select(request, conn.stream.next()).await {
                        Either::Left((req, _)) => Event::Request(req.ok()),
                        Either::Right((chunk, _)) => Event::Chunk(chunk),
                    }
                }
                None => Event::Request(receiver.recv_async().await.ok()),
            };

            match event {
                Event::Request(None) => break,
                Event::Request(Some(CacheRequest::Read { range, reply })) => {
                    self.stalled = false;
                    self.pending.push_back(PendingRead { range, reply });
                }
                Event::Request(Some(CacheRequest::Stats { reply })) => {
                    let mut stats = self.stats.clone();
                    stats.downloaded = self.store.ranges();
                    reply.send(stats).ok();
                }
                Event::Request(Some(CacheRequest::Problems { reply })) => {
                    reply.send(self.problems.drain(..).collect()).ok();
                }
                Event::Chunk(Some(Ok(bytes))) => self.on_chunk(bytes),
                Event::Chunk(Some(Err(e))) => {
                    self.connection = None;
                    self.on_failure(ReplayErr::Backend(SourceErr::IoError(e)))
                        .await;
                }
                Event::Chunk(None) => {
                    if let Some(conn) = self.connection.take() {
                        if !conn.remaining.is_empty() {
                            self.on_failure(ReplayErr::Backend(SourceErr::IoError(
                                std::io::ErrorKind::UnexpectedEof.into(),
                            )))
                            .await;
                        }
                    }
                }
            }
        }
        log::debug!("CachedReader ended");
    }

    /// Replies to every pending read that is now fully downloaded.
    fn resolve(&mut self) {
        let store = &self.store;
        let mut last_end = self.last_request_end;
        self.pending.retain(|read| {
            if read.reply.is_disconnected() {
                return false;
            }
            match store.get(read.range) {
                Some(bytes) => {
                    last_end = Some(read.range.end);
                    read.reply.send(Ok(bytes)).ok();
                    false
                }
                None => true,
            }
        });
        self.last_request_end = last_end;
    }

    /// Opens a new connection if the coordinator says so.
    async fn connect(&mut self) -> SourceResult<()> {
        if self.stalled && self.pending.is_empty() {
            return Ok(());
        }
        let downloaded = self.store.ranges();
        let decision = decide_next_range(ConnectionParams {
            current_remaining: self.connection.as_ref().map(|c| c.remaining),
            requested: self.pending.front().map(|r| r.range),
            downloaded: &downloaded,
            last_request_end: self.last_request_end,
            max_request_size: self.options.max_request_size,
            file_size: self.size,
            continue_threshold: self.options.continue_threshold,
        });
        let range = match decision {
            Ok(Some(range)) => range,
            Ok(None) => return Ok(()),
            Err(e @ CoordinatorErr::RequestTooLarge { .. }) => {
                if let Some(read) = self.pending.pop_front() {
                    read.reply
                        .send(Err(ReplayErr::Backend(SourceErr::CoordinatorErr(e))))
                        .ok();
                }
                return Ok(());
            }
            Err(e) => return Err(ReplayErr::Backend(SourceErr::CoordinatorErr(e))),
        };
        log::debug!("New connection {range}");
        self.connection = None;
        let stream = self.fetcher.fetch(range).await?;
        self.stats.connections += 1;
        self.connection = Some(Connection {
            remaining: range,
            stream,
        });
        Ok(())
    }

    fn on_chunk(&mut self, bytes: Vec<u8>) {
        let conn = match self.connection.as_mut() {
            Some(conn) => conn,
            None => return,
        };
        let len = (bytes.len() as u64).min(conn.remaining.len());
        let offset = conn.remaining.start;
        conn.remaining = Range::new(offset + len, conn.remaining.end);
        self.stats.bytes_fetched += len;
        self.failures = 0;
        let mut bytes = bytes;
        bytes.truncate(len as usize);
        self.store.insert(offset, bytes);
        if self.connection.as_ref().map_or(false, |c| c.remaining.is_empty()) {
            self.connection = None;
        }
    }

    async fn on_failure(&mut self, err: ReplayErr<SourceErr>) {
        self.connection = None;
        self.failures += 1;
        if self.failures > self.options.max_retries {
            log::error!("Giving up after {} failed fetches: {err}", self.failures);
            let message = format!("Failed to fetch after {} attempts: {err}", self.failures);
            for read in self.pending.drain(..) {
                read.reply
                    .send(Err(ReplayErr::Disconnected(message.clone())))
                    .ok();
            }
            self.failures = 0;
            self.stalled = true;
            return;
        }
        let backoff = self
            .options
            .retry_backoff
            .saturating_mul(1 << (self.failures - 1).min(16));
        let jitter = Duration::from_millis(fastrand::u64(0..=backoff.as_millis() as u64 / 2));
        let backoff = backoff.saturating_add(jitter);
        log::warn!(
            "Fetch failed (attempt {}): {err}; retrying in {backoff:?}",
            self.failures
        );
        self.stats.retries += 1;
        if self.problems.len() >= MAX_PROBLEMS {
            self.problems.pop_front();
        }
        self.problems.push_back(
            Problem::warn(format!(
                "Fetch failed (attempt {} of {}): {err}; retrying",
                self.failures,
                self.options.max_retries.saturating_add(1)
            ))
            .with_tip("The connection to the remote file is unreliable"),
        );
        sleep(backoff).await;
    }
}

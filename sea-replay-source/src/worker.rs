//! Runs a source in its own task, exposing the same interface through channels.
//!
//! ```text
//!  WorkerSource ──WorkerRequest──▶ worker task (owns the source)
//!                                      │ spawns
//!  WorkerCursor ──CursorRequest──▶ cursor task (owns the inner cursor, reads ahead)
//! ```
//!
//! Every reply travels on its own channel. A [`WorkerCursor`] keeps the receiving end of an
//! unanswered request, so dropping a pull midway loses nothing: the reply is collected by the
//! next pull.

use crate::{IterableSource, MessageCursor, MessageStream, SourceErr, SourceResult};
use flume::{bounded, unbounded, Receiver, Sender};
use sea_replay_runtime::spawn_task;
use sea_replay_types::{
    export::{
        async_trait,
        futures::{
            future::{select, Either},
            pin_mut, stream, StreamExt,
        },
    },
    AbortSignal, BackfillArgs, Initialization, IteratorResult, MessageEvent, MessageIteratorArgs,
    ReplayErr, Time,
};
use std::{collections::VecDeque, sync::Arc};

pub const DEFAULT_READ_AHEAD: usize = 1024;
/// How many results a plain `next` asks the cursor task for.
const BATCH_SIZE: usize = 64;

type CursorReply = SourceResult<Option<Vec<IteratorResult>>>;

#[derive(Debug)]
/// An [`IterableSource`] whose work happens in a background task.
pub struct WorkerSource {
    sender: Sender<WorkerRequest>,
    read_ahead: usize,
}

#[derive(Debug)]
/// A [`MessageCursor`] proxied to a cursor task.
pub struct WorkerCursor {
    worker: Sender<WorkerRequest>,
    args: MessageIteratorArgs,
    abort: Option<AbortSignal>,
    read_ahead: usize,
    cursor: Option<Sender<CursorRequest>>,
    opening: Option<Receiver<SourceResult<Sender<CursorRequest>>>>,
    /// The reply of a request whose caller went away.
    inflight: Option<Receiver<CursorReply>>,
    buffer: VecDeque<IteratorResult>,
    exhausted: bool,
}

enum WorkerRequest {
    Initialize {
        reply: Sender<SourceResult<Initialization>>,
    },
    Backfill {
        args: BackfillArgs,
        abort: Option<AbortSignal>,
        reply: Sender<SourceResult<Vec<MessageEvent>>>,
    },
    Cursor {
        args: MessageIteratorArgs,
        abort: Option<AbortSignal>,
        read_ahead: usize,
        reply: Sender<SourceResult<Sender<CursorRequest>>>,
    },
}

enum CursorRequest {
    NextBatch {
        max: usize,
        reply: Sender<CursorReply>,
    },
    ReadUntil {
        end: Time,
        reply: Sender<CursorReply>,
    },
    Close,
}

enum CursorEvent {
    Request(Option<CursorRequest>),
    Filled(SourceResult<bool>),
}

impl std::fmt::Debug for WorkerRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initialize { .. } => write!(f, "Initialize"),
            Self::Backfill { args, .. } => write!(f, "Backfill({args:?})"),
            Self::Cursor { args, .. } => write!(f, "Cursor({args:?})"),
        }
    }
}

impl std::fmt::Debug for CursorRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NextBatch { max, .. } => write!(f, "NextBatch({max})"),
            Self::ReadUntil { end, .. } => write!(f, "ReadUntil({end})"),
            Self::Close => write!(f, "Close"),
        }
    }
}

fn worker_dead<T>() -> SourceResult<T> {
    Err(ReplayErr::Backend(SourceErr::WorkerDead))
}

impl WorkerSource {
    /// Moves `source` into a newly spawned worker task.
    pub fn new<S: IterableSource + 'static>(source: S) -> Self {
        Self::from_boxed(Box::new(source))
    }

    pub fn from_boxed(source: Box<dyn IterableSource>) -> Self {
        let (sender, receiver) = unbounded();
        let _handle = spawn_task(run_worker(source, receiver));
        Self {
            sender,
            read_ahead: DEFAULT_READ_AHEAD,
        }
    }

    /// How many results each cursor task pulls ahead of its consumer.
    pub fn read_ahead(&self) -> &usize {
        &self.read_ahead
    }
    pub fn set_read_ahead(&mut self, v: usize) -> &mut Self {
        self.read_ahead = v;
        self
    }

    fn cursor(&self, args: MessageIteratorArgs, abort: Option<AbortSignal>) -> WorkerCursor {
        WorkerCursor {
            worker: self.sender.clone(),
            args,
            abort,
            read_ahead: self.read_ahead,
            cursor: None,
            opening: None,
            inflight: None,
            buffer: VecDeque::new(),
            exhausted: false,
        }
    }
}

#[async_trait]
impl IterableSource for WorkerSource {
    async fn initialize(&mut self) -> SourceResult<Initialization> {
        let (reply, receiver) = bounded(1);
        if self
            .sender
            .send(WorkerRequest::Initialize { reply })
            .is_err()
        {
            return worker_dead();
        }
        match receiver.recv_async().await {
            Ok(result) => result,
            Err(_) => worker_dead(),
        }
    }

    fn message_iterator(&self, args: MessageIteratorArgs) -> MessageStream {
        let cursor = self.cursor(args, None);
        stream::unfold(Some(cursor), |cursor| async move {
            let mut cursor = cursor?;
            match cursor.next().await {
                Ok(Some(item)) => Some((Ok(item), Some(cursor))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
        .boxed()
    }

    async fn get_backfill_messages(
        &self,
        args: BackfillArgs,
        abort: Option<AbortSignal>,
    ) -> SourceResult<Vec<MessageEvent>> {
        let (reply, receiver) = bounded(1);
        let request = WorkerRequest::Backfill {
            args,
            abort: abort.clone(),
            reply,
        };
        if self.sender.send(request).is_err() {
            return worker_dead();
        }
        let result = match abort {
            Some(abort) => {
                let aborted = abort.aborted();
                let recv = receiver.recv_async();
                pin_mut!(aborted, recv);
                match select(recv, aborted).await {
                    Either::Left((result, _)) => result,
                    Either::Right(_) => return Err(ReplayErr::Aborted),
                }
            }
            None => receiver.recv_async().await,
        };
        match result {
            Ok(result) => result,
            Err(_) => worker_dead(),
        }
    }

    fn get_message_cursor(
        &self,
        args: MessageIteratorArgs,
        abort: Option<AbortSignal>,
    ) -> Box<dyn MessageCursor> {
        Box::new(self.cursor(args, abort))
    }
}

async fn run_worker(source: Box<dyn IterableSource>, requests: Receiver<WorkerRequest>) {
    let mut uninitialized = Some(source);
    let mut source: Option<Arc<dyn IterableSource>> = None;

    while let Ok(request) = requests.recv_async().await {
        log::trace!("Worker {request:?}");
        match request {
            WorkerRequest::Initialize { reply } => {
                let result = match uninitialized.take() {
                    Some(mut inner) => {
                        let result = inner.initialize().await;
                        source = Some(Arc::from(inner));
                        result
                    }
                    None => Err(ReplayErr::Contract(
                        "Source already initialized".to_owned(),
                    )),
                };
                reply.send_async(result).await.ok();
            }
            WorkerRequest::Backfill { args, abort, reply } => match &source {
                Some(source) => {
                    let source = source.clone();
                    let _handle = spawn_task(async move {
                        let result = source.get_backfill_messages(args, abort).await;
                        reply.send_async(result).await.ok();
                    });
                }
                None => {
                    reply
                        .send_async(Err(ReplayErr::Backend(SourceErr::NotInitialized)))
                        .await
                        .ok();
                }
            },
            WorkerRequest::Cursor {
                args,
                abort,
                read_ahead,
                reply,
            } => match &source {
                Some(source) => {
                    let (sender, receiver) = unbounded();
                    let cursor = source.get_message_cursor(args, abort);
                    let _handle = spawn_task(run_cursor(cursor, receiver, read_ahead));
                    reply.send_async(Ok(sender)).await.ok();
                }
                None => {
                    reply
                        .send_async(Err(ReplayErr::Backend(SourceErr::NotInitialized)))
                        .await
                        .ok();
                }
            },
        }
    }
    log::debug!("Worker exit");
}

async fn run_cursor(
    mut cursor: Box<dyn MessageCursor>,
    requests: Receiver<CursorRequest>,
    read_ahead: usize,
) {
    let mut filling = read_ahead > 0;
    // an error met while reading ahead, reported to the next request
    let mut error = None;

    loop {
        let event = if filling {
            let recv = requests.recv_async();
            let fill = cursor.fill(read_ahead);
            pin_mut!(recv, fill);
            match select(recv, fill).await {
                Either::Left((request, _)) => CursorEvent::Request(request.ok()),
                Either::Right((result, _)) => CursorEvent::Filled(result),
            }
        } else {
            CursorEvent::Request(requests.recv_async().await.ok())
        };

        let (result, reply) = match event {
            CursorEvent::Filled(Ok(true)) => continue,
            CursorEvent::Filled(Ok(false)) => {
                filling = false;
                continue;
            }
            CursorEvent::Filled(Err(e)) => {
                log::debug!("Read ahead failed: {e}");
                error = Some(e);
                filling = false;
                continue;
            }
            CursorEvent::Request(None) | CursorEvent::Request(Some(CursorRequest::Close)) => {
                break;
            }
            CursorEvent::Request(Some(CursorRequest::NextBatch { max, reply })) => {
                let result = match error.take() {
                    Some(e) => Err(e),
                    None => cursor.next_batch(max).await,
                };
                (result, reply)
            }
            CursorEvent::Request(Some(CursorRequest::ReadUntil { end, reply })) => {
                let result = match error.take() {
                    Some(e) => Err(e),
                    None => cursor.read_until(end).await,
                };
                (result, reply)
            }
        };
        filling = read_ahead > 0 && error.is_none();
        if let Err(e) = reply.send_async(result).await {
            if let Ok(Some(results)) = e.into_inner() {
                log::trace!("Reply dropped, keeping {} results", results.len());
                cursor.unread(results);
            }
        }
    }
    cursor.close().await;
    log::trace!("Cursor exit");
}

impl WorkerCursor {
    fn check_abort(&self) -> SourceResult<()> {
        match &self.abort {
            Some(abort) if abort.is_aborted() => Err(ReplayErr::Aborted),
            _ => Ok(()),
        }
    }

    async fn open(&mut self) -> SourceResult<Sender<CursorRequest>> {
        if let Some(cursor) = &self.cursor {
            return Ok(cursor.clone());
        }
        if self.opening.is_none() {
            let (reply, receiver) = bounded(1);
            let request = WorkerRequest::Cursor {
                args: self.args.clone(),
                abort: self.abort.clone(),
                read_ahead: self.read_ahead,
                reply,
            };
            if self.worker.send(request).is_err() {
                return worker_dead();
            }
            self.opening = Some(receiver);
        }
        let result = match &self.opening {
            Some(receiver) => receiver.recv_async().await,
            None => return worker_dead(),
        };
        self.opening = None;
        let cursor = match result {
            Ok(cursor) => cursor?,
            Err(_) => return worker_dead(),
        };
        self.cursor = Some(cursor.clone());
        Ok(cursor)
    }

    /// Collects the reply of an earlier request, if any.
    async fn settle(&mut self) -> SourceResult<()> {
        let result = match &self.inflight {
            Some(receiver) => receiver.recv_async().await,
            None => return Ok(()),
        };
        self.inflight = None;
        match result {
            Ok(Ok(Some(results))) => self.buffer.extend(results),
            Ok(Ok(None)) => self.exhausted = true,
            Ok(Err(e)) => return Err(e),
            Err(_) => return worker_dead(),
        }
        Ok(())
    }

    async fn request<F>(&mut self, make: F) -> SourceResult<()>
    where
        F: FnOnce(Sender<CursorReply>) -> CursorRequest + Send,
    {
        let cursor = self.open().await?;
        let (reply, receiver) = bounded(1);
        if cursor.send(make(reply)).is_err() {
            return worker_dead();
        }
        self.inflight = Some(receiver);
        self.settle().await
    }

    fn position_after(&self, end: Time) -> usize {
        self.buffer
            .iter()
            .position(|r| r.time().map_or(false, |t| t > end))
            .unwrap_or(self.buffer.len())
    }
}

#[async_trait]
impl MessageCursor for WorkerCursor {
    async fn next(&mut self) -> SourceResult<Option<IteratorResult>> {
        self.check_abort()?;
        self.settle().await?;
        if self.buffer.is_empty() && !self.exhausted {
            self.request(|reply| CursorRequest::NextBatch {
                max: BATCH_SIZE,
                reply,
            })
            .await?;
        }
        Ok(self.buffer.pop_front())
    }

    async fn next_batch(&mut self, max: usize) -> SourceResult<Option<Vec<IteratorResult>>> {
        self.check_abort()?;
        self.settle().await?;
        let max = max.max(1);
        if self.buffer.len() < max && !self.exhausted {
            let want = max - self.buffer.len();
            self.request(|reply| CursorRequest::NextBatch { max: want, reply })
                .await?;
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let take = max.min(self.buffer.len());
        Ok(Some(self.buffer.drain(..take).collect()))
    }

    async fn read_until(&mut self, end: Time) -> SourceResult<Option<Vec<IteratorResult>>> {
        self.check_abort()?;
        self.settle().await?;
        if !self.exhausted && self.position_after(end) == self.buffer.len() {
            self.request(|reply| CursorRequest::ReadUntil { end, reply })
                .await?;
        }
        if self.buffer.is_empty() && self.exhausted {
            return Ok(None);
        }
        let count = self.position_after(end);
        Ok(Some(self.buffer.drain(..count).collect()))
    }

    fn unread(&mut self, results: Vec<IteratorResult>) {
        for result in results.into_iter().rev() {
            self.buffer.push_front(result);
        }
    }

    async fn close(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            cursor.send(CursorRequest::Close).ok();
        }
        self.opening = None;
        self.inflight = None;
        self.buffer.clear();
        self.exhausted = true;
    }
}

#[cfg(all(test, feature = "runtime-tokio"))]
mod test {
    use super::*;
    use crate::MemorySource;
    use sea_replay_types::{topics, AbortController, Payload};
    use std::time::Duration;

    fn messages(n: u32) -> Vec<MessageEvent> {
        (1..=n)
            .map(|i| MessageEvent::new("/a", "s", Time::new(i, 0), Payload::from("x")))
            .collect()
    }

    fn times(results: &[IteratorResult]) -> Vec<u32> {
        results.iter().filter_map(|r| r.time()).map(|t| t.sec()).collect()
    }

    #[tokio::test]
    async fn test_worker_source() -> anyhow::Result<()> {
        let mut source = WorkerSource::new(MemorySource::new(messages(5)));
        let init = source.initialize().await?;
        assert_eq!(init.num_messages(), 5);
        assert!(matches!(
            source.initialize().await,
            Err(ReplayErr::Contract(_))
        ));

        let items: Vec<IteratorResult> = source
            .message_iterator(MessageIteratorArgs::new(topics(["/a"])))
            .collect::<Vec<_>>()
            .await
            .into_iter()
            .collect::<Result<_, _>>()?;
        assert_eq!(times(&items), vec![1, 2, 3, 4, 5]);

        let backfill = source
            .get_backfill_messages(
                BackfillArgs {
                    topics: topics(["/a"]),
                    time: Time::new(3, 500),
                },
                None,
            )
            .await?;
        assert_eq!(backfill, vec![messages(3).remove(2)]);

        let mut cursor = source.get_message_cursor(
            MessageIteratorArgs::new(topics(["/a"])).start(Time::new(2, 0)),
            None,
        );
        let batch = cursor.read_until(Time::new(3, 0)).await?.unwrap();
        assert_eq!(times(&batch), vec![2, 3]);
        let batch = cursor.next_batch(10).await?.unwrap();
        assert_eq!(times(&batch), vec![4, 5]);
        assert_eq!(cursor.read_until(Time::MAX).await?, None);
        cursor.close().await;
        Ok(())
    }

    #[tokio::test]
    async fn test_dropped_pulls_lose_nothing() -> anyhow::Result<()> {
        let mut source = WorkerSource::new(MemorySource::new(messages(200)));
        source.set_read_ahead(8);
        source.initialize().await?;
        let mut cursor = source.get_message_cursor(MessageIteratorArgs::new(topics(["/a"])), None);

        let mut seen = Vec::new();
        let mut end = 0;
        loop {
            end += 7;
            let pull = cursor.read_until(Time::new(end, 0));
            // most of these give up before the reply arrives
            match tokio::time::timeout(Duration::from_micros(1), pull).await {
                Ok(result) => match result? {
                    Some(batch) => seen.extend(times(&batch)),
                    None => break,
                },
                Err(_) => (),
            }
            if end > 300 {
                break;
            }
        }
        while let Some(batch) = cursor.read_until(Time::MAX).await? {
            if batch.is_empty() {
                break;
            }
            seen.extend(times(&batch));
        }
        assert_eq!(seen, (1..=200).collect::<Vec<_>>());
        Ok(())
    }

    #[tokio::test]
    async fn test_abort() -> anyhow::Result<()> {
        let mut source = WorkerSource::new(MemorySource::new(messages(5)));
        source.initialize().await?;
        let mut controller = AbortController::new();
        let mut cursor = source.get_message_cursor(
            MessageIteratorArgs::new(topics(["/a"])),
            Some(controller.signal()),
        );
        assert_eq!(times(&[cursor.next().await?.unwrap()]), vec![1]);
        controller.abort();
        controller.abort();
        assert!(matches!(cursor.next().await, Err(ReplayErr::Aborted)));
        assert!(matches!(
            source
                .get_backfill_messages(
                    BackfillArgs {
                        topics: topics(["/a"]),
                        time: Time::MAX,
                    },
                    Some(controller.signal()),
                )
                .await,
            Err(ReplayErr::Aborted)
        ));
        Ok(())
    }

    struct Panicky;

    #[async_trait]
    impl IterableSource for Panicky {
        async fn initialize(&mut self) -> SourceResult<Initialization> {
            panic!("cannot initialize")
        }

        fn message_iterator(&self, _: MessageIteratorArgs) -> MessageStream {
            stream::empty().boxed()
        }

        async fn get_backfill_messages(
            &self,
            _: BackfillArgs,
            _: Option<AbortSignal>,
        ) -> SourceResult<Vec<MessageEvent>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_worker_dead() {
        let mut source = WorkerSource::new(Panicky);
        let err = source.initialize().await.unwrap_err();
        assert!(matches!(err, ReplayErr::Backend(SourceErr::WorkerDead)));
        assert!(crate::is_fatal(&err));
        let mut cursor = source.get_message_cursor(MessageIteratorArgs::new(topics(["/a"])), None);
        assert!(matches!(
            cursor.next().await,
            Err(ReplayErr::Backend(SourceErr::WorkerDead))
        ));
    }

    #[tokio::test]
    async fn test_not_initialized() {
        let source = WorkerSource::new(MemorySource::new(messages(1)));
        assert!(matches!(
            source
                .get_backfill_messages(BackfillArgs::default(), None)
                .await,
            Err(ReplayErr::Backend(SourceErr::NotInitialized))
        ));
    }
}

use crate::SourceResult;
use sea_replay_types::{
    export::{
        async_trait,
        futures::{
            future::{select, Either},
            pin_mut,
            stream::BoxStream,
            StreamExt,
        },
    },
    AbortSignal, BackfillArgs, Initialization, IteratorResult, MessageEvent, MessageIteratorArgs,
    Problem, ReplayErr, Time,
};
use std::collections::VecDeque;

/// A lazy, finite, non-restartable sequence of iterator results.
pub type MessageStream = BoxStream<'static, SourceResult<IteratorResult>>;

#[async_trait]
/// A log format, presented as a time-ordered sequence of messages.
///
/// Within one source, message events are non-decreasing in receive time. A record that would
/// break this is reported as a [`Problem`] and not delivered.
pub trait IterableSource: Send + Sync {
    /// Reads whatever is needed to describe the source. Must be called exactly once, before
    /// anything else.
    async fn initialize(&mut self) -> SourceResult<Initialization>;

    /// Messages on `args.topics` within `[start, end]`. An empty topic set yields nothing.
    fn message_iterator(&self, args: MessageIteratorArgs) -> MessageStream;

    /// The latest message of each topic at or before `args.time`, sorted by receive time.
    async fn get_backfill_messages(
        &self,
        args: BackfillArgs,
        abort: Option<AbortSignal>,
    ) -> SourceResult<Vec<MessageEvent>>;

    /// A pull-based cursor over [`IterableSource::message_iterator`].
    fn get_message_cursor(
        &self,
        args: MessageIteratorArgs,
        abort: Option<AbortSignal>,
    ) -> Box<dyn MessageCursor> {
        Box::new(IteratorCursor::new(self.message_iterator(args), abort))
    }
}

#[async_trait]
/// Pulls from a message iterator on demand.
///
/// Every pull is cancel safe: if the future is dropped midway, whatever has been pulled is
/// kept and handed out by the next pull. Once the abort signal given at creation fires, every
/// pull fails with [`ReplayErr::Aborted`].
pub trait MessageCursor: Send {
    /// `None` once the iterator is exhausted.
    async fn next(&mut self) -> SourceResult<Option<IteratorResult>>;

    /// Up to `max` results, or fewer if the iterator ends. `None` once exhausted.
    async fn next_batch(&mut self, max: usize) -> SourceResult<Option<Vec<IteratorResult>>>;

    /// Every result up to and including `end`. Results without a time are included as they
    /// come. `None` once exhausted.
    async fn read_until(&mut self, end: Time) -> SourceResult<Option<Vec<IteratorResult>>>;

    /// Pulls one result ahead into the cursor's buffer, unless `limit` results are already
    /// buffered. Returns false if nothing was pulled.
    async fn fill(&mut self, _limit: usize) -> SourceResult<bool> {
        Ok(false)
    }

    /// Puts results back in front of the cursor, e.g. after a reply could not be delivered.
    fn unread(&mut self, results: Vec<IteratorResult>);

    async fn close(&mut self);
}

/// The default [`MessageCursor`], wrapping a [`MessageStream`].
pub struct IteratorCursor {
    stream: Option<MessageStream>,
    abort: Option<AbortSignal>,
    /// Pulled from the stream but not yet handed out.
    buffer: VecDeque<IteratorResult>,
}

impl std::fmt::Debug for IteratorCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IteratorCursor")
            .field("closed", &self.stream.is_none())
            .field("buffered", &self.buffer.len())
            .finish()
    }
}

impl IteratorCursor {
    pub fn new(stream: MessageStream, abort: Option<AbortSignal>) -> Self {
        Self {
            stream: Some(stream),
            abort,
            buffer: VecDeque::new(),
        }
    }

    fn check_abort(&self) -> SourceResult<()> {
        match &self.abort {
            Some(abort) if abort.is_aborted() => Err(ReplayErr::Aborted),
            _ => Ok(()),
        }
    }

    /// Pulls one result from the stream into the buffer. Returns false if the stream ended.
    async fn pull(&mut self) -> SourceResult<bool> {
        let stream = match self.stream.as_mut() {
            Some(stream) => stream,
            None => return Ok(false),
        };
        let item = match &self.abort {
            Some(abort) => {
                let aborted = abort.aborted();
                pin_mut!(aborted);
                match select(stream.next(), aborted).await {
                    Either::Left((item, _)) => item,
                    Either::Right(_) => return Err(ReplayErr::Aborted),
                }
            }
            None => stream.next().await,
        };
        match item {
            Some(Ok(item)) => {
                self.buffer.push_back(item);
                Ok(true)
            }
            Some(Err(e)) => Err(e),
            None => {
                self.stream = None;
                Ok(false)
            }
        }
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.stream.is_none() && self.buffer.is_empty()
    }
}

#[async_trait]
impl MessageCursor for IteratorCursor {
    async fn next(&mut self) -> SourceResult<Option<IteratorResult>> {
        self.check_abort()?;
        if self.buffer.is_empty() {
            self.pull().await?;
        }
        Ok(self.buffer.pop_front())
    }

    async fn next_batch(&mut self, max: usize) -> SourceResult<Option<Vec<IteratorResult>>> {
        self.check_abort()?;
        while self.buffer.len() < max.max(1) {
            if !self.pull().await? {
                break;
            }
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let take = max.max(1).min(self.buffer.len());
        Ok(Some(self.buffer.drain(..take).collect()))
    }

    async fn read_until(&mut self, end: Time) -> SourceResult<Option<Vec<IteratorResult>>> {
        self.check_abort()?;
        // the buffer only grows here, so a cancelled pull loses nothing
        let mut count = 0;
        loop {
            if count == self.buffer.len() && !self.pull().await? {
                break;
            }
            match self.buffer[count].time() {
                Some(time) if time > end => break,
                _ => count += 1,
            }
        }
        if count == 0 && self.is_exhausted() {
            return Ok(None);
        }
        Ok(Some(self.buffer.drain(..count).collect()))
    }

    async fn fill(&mut self, limit: usize) -> SourceResult<bool> {
        if self.buffer.len() >= limit {
            return Ok(false);
        }
        self.check_abort()?;
        self.pull().await
    }

    fn unread(&mut self, results: Vec<IteratorResult>) {
        for result in results.into_iter().rev() {
            self.buffer.push_front(result);
        }
    }

    async fn close(&mut self) {
        self.stream = None;
        self.buffer.clear();
    }
}

/// Enforces non-decreasing receive time on a sequence of results.
#[derive(Debug, Default, Clone)]
pub struct OrderGuard {
    last: Option<Time>,
}

impl OrderGuard {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn last(&self) -> Option<Time> {
        self.last
    }

    /// Passes the result through, or turns it into a problem if it goes back in time.
    pub fn check(&mut self, result: IteratorResult) -> IteratorResult {
        let time = match result.time() {
            Some(time) => time,
            None => return result,
        };
        match self.last {
            Some(last) if time < last => match result {
                IteratorResult::MessageEvent(event) => IteratorResult::Problem(
                    Problem::warn(format!(
                        "Message on {} at {} is earlier than the previous message at {}; dropped",
                        event.topic, time, last
                    ))
                    .with_topic(event.topic)
                    .with_tip("The recording is not sorted by receive time"),
                ),
                // a stale progress marker carries no information
                _ => IteratorResult::Stamp(last),
            },
            _ => {
                self.last = Some(time);
                result
            }
        }
    }
}

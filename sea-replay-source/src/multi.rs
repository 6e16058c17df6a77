//! Merges several sources of one recording into a single, time-ordered source.

use crate::{memory::latest_per_topic, IterableSource, MessageStream, SourceErr, SourceResult};
use sea_replay_types::{
    export::{
        async_trait,
        futures::{future::join_all, stream, StreamExt},
    },
    AbortSignal, BackfillArgs, Initialization, IteratorResult, MessageEvent, MessageIteratorArgs,
    ReplayErr, Time, Topic,
};
use std::{
    cmp::Reverse,
    collections::{BinaryHeap, VecDeque},
};

/// Presents N sources as one. Each pull hands out the pending item with the smallest
/// receive time across all sources; equal times go to the source given first, then to the
/// smaller topic name.
pub struct MultiSource {
    sources: Vec<Box<dyn IterableSource>>,
}

impl std::fmt::Debug for MultiSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiSource")
            .field("sources", &self.sources.len())
            .finish()
    }
}

/// Heap key. `Reverse` turns the max-heap into a min-heap.
type Head = Reverse<(Time, usize, String)>;

struct Merger {
    streams: Vec<Option<MessageStream>>,
    /// At most one item per source, waiting for its turn.
    pending: Vec<Option<IteratorResult>>,
    heap: BinaryHeap<Head>,
    problems: VecDeque<IteratorResult>,
    error: Option<ReplayErr<SourceErr>>,
    primed: bool,
    done: bool,
}

impl MultiSource {
    pub fn new(sources: Vec<Box<dyn IterableSource>>) -> Self {
        Self { sources }
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[async_trait]
impl IterableSource for MultiSource {
    async fn initialize(&mut self) -> SourceResult<Initialization> {
        let results = join_all(self.sources.iter_mut().map(|s| s.initialize())).await;
        let mut inits = Vec::with_capacity(results.len());
        for result in results {
            inits.push(result?);
        }
        merge_initializations(inits)
    }

    fn message_iterator(&self, args: MessageIteratorArgs) -> MessageStream {
        let merger = Merger {
            streams: self
                .sources
                .iter()
                .map(|s| Some(s.message_iterator(args.clone())))
                .collect(),
            pending: self.sources.iter().map(|_| None).collect(),
            heap: BinaryHeap::with_capacity(self.sources.len()),
            problems: VecDeque::new(),
            error: None,
            primed: false,
            done: false,
        };
        stream::unfold(merger, |mut merger| async move {
            let item = merger.next().await?;
            Some((item, merger))
        })
        .boxed()
    }

    async fn get_backfill_messages(
        &self,
        args: BackfillArgs,
        abort: Option<AbortSignal>,
    ) -> SourceResult<Vec<MessageEvent>> {
        let results = join_all(
            self.sources
                .iter()
                .map(|s| s.get_backfill_messages(args.clone(), abort.clone())),
        )
        .await;
        let mut messages = Vec::new();
        for result in results {
            messages.extend(result?);
        }
        Ok(latest_per_topic(messages.iter(), &args))
    }
}

impl Merger {
    async fn next(&mut self) -> Option<SourceResult<IteratorResult>> {
        if self.done {
            return None;
        }
        if let Some(e) = self.error.take() {
            return Some(self.fail(e));
        }
        if !self.primed {
            for i in 0..self.streams.len() {
                if let Err(e) = self.refill(i).await {
                    return Some(self.fail(e));
                }
            }
            self.primed = true;
        }
        if let Some(problem) = self.problems.pop_front() {
            return Some(Ok(problem));
        }
        let Reverse((_, i, _)) = match self.heap.pop() {
            Some(head) => head,
            None => {
                self.done = true;
                return None;
            }
        };
        let item = self.pending[i].take()?;
        if let Err(e) = self.refill(i).await {
            // the item is still good; the error comes with the next pull
            self.error = Some(e);
        }
        Some(Ok(item))
    }

    fn fail(&mut self, e: ReplayErr<SourceErr>) -> SourceResult<IteratorResult> {
        log::warn!("Merged source failed: {e}");
        self.done = true;
        Err(e)
    }

    /// Pulls from source `i` until it has a pending item or ends. Problems found on the way
    /// are queued for delivery.
    async fn refill(&mut self, i: usize) -> SourceResult<()> {
        loop {
            let stream = match self.streams.get_mut(i).and_then(|s| s.as_mut()) {
                Some(stream) => stream,
                None => return Ok(()),
            };
            match stream.next().await {
                None => {
                    log::trace!("Source {i} ended");
                    self.streams[i] = None;
                    return Ok(());
                }
                Some(Err(e)) => {
                    self.streams[i] = None;
                    return Err(e);
                }
                Some(Ok(IteratorResult::Problem(mut problem))) => {
                    if problem.connection_id.is_none() {
                        problem.connection_id = Some(i as u32);
                    }
                    self.problems.push_back(IteratorResult::Problem(problem));
                }
                Some(Ok(item)) => {
                    let time = item.time().unwrap_or(Time::ZERO);
                    let topic = match &item {
                        IteratorResult::MessageEvent(event) => event.topic.clone(),
                        _ => String::new(),
                    };
                    self.heap.push(Reverse((time, i, topic)));
                    self.pending[i] = Some(item);
                    return Ok(());
                }
            }
        }
    }
}

/// Unites the descriptions of several sources of one recording.
pub fn merge_initializations(inits: Vec<Initialization>) -> SourceResult<Initialization> {
    let mut merged = Initialization::default();
    let mut range: Option<(Time, Time)> = None;

    for (i, init) in inits.into_iter().enumerate() {
        if init.num_messages() > 0 || !init.end.is_zero() {
            range = Some(match range {
                Some((start, end)) => (start.min(init.start), end.max(init.end)),
                None => (init.start, init.end),
            });
        }
        for topic in init.topics {
            match merged.topics.iter_mut().find(|t| t.name == topic.name) {
                Some(existing) => {
                    if let (Some(expected), Some(found)) =
                        (&existing.schema_name, &topic.schema_name)
                    {
                        if expected != found {
                            return Err(ReplayErr::Backend(SourceErr::SchemaMismatch {
                                topic: topic.name.clone(),
                                expected: expected.clone(),
                                found: found.clone(),
                            }));
                        }
                    }
                    if existing.schema_name.is_none() {
                        existing.schema_name = topic.schema_name;
                    }
                }
                None => merged.topics.push(Topic::new(topic.name, topic.schema_name)),
            }
        }
        for (topic, stats) in init.topic_stats {
            merged.topic_stats.entry(topic).or_default().merge(&stats);
        }
        for (topic, publishers) in init.publishers_by_topic {
            merged
                .publishers_by_topic
                .entry(topic)
                .or_default()
                .extend(publishers);
        }
        merged.metadata.extend(init.metadata);
        if merged.profile.is_none() {
            merged.profile = init.profile;
        }
        merged
            .problems
            .extend(init.problems.into_iter().map(|mut p| {
                if p.connection_id.is_none() {
                    p.connection_id = Some(i as u32);
                }
                p
            }));
    }

    if let Some((start, end)) = range {
        merged.start = start;
        merged.end = end;
    }
    merged.topics.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(merged)
}

use crate::{
    error::format_err,
    format::{
        checksum, read_chunk, read_header, Channel, ChunkIndex, FormatErr, RecordRef, Summary,
        Trailer, HEADER_SIZE, TRAILER_SIZE,
    },
    ByteReader, IterableSource, MessageStream, OrderGuard, SourceErr, SourceResult,
};
use sea_replay_types::{
    export::{async_trait, futures::StreamExt},
    AbortSignal, BackfillArgs, Initialization, IteratorResult, MessageEvent, MessageIteratorArgs,
    Payload, Problem, Range, ReplayErr, Time, Topic, TopicSet, TopicStats,
};
use std::{
    cmp::{Ordering, Reverse},
    collections::{BTreeMap, BinaryHeap, HashMap, VecDeque},
    sync::Arc,
};

/// Reads a SeaLog file. Initializing reads the tail of the file; chunks are read on demand.
#[derive(Debug)]
pub struct SeaLogSource {
    reader: Arc<dyn ByteReader>,
    index: Option<Arc<Index>>,
}

#[derive(Debug)]
struct Index {
    channels: HashMap<u16, Channel>,
    /// Sorted by start time, then offset.
    chunks: Vec<ChunkIndex>,
}

/// A decoded chunk: its bytes and the records inside.
struct Chunk {
    bytes: Arc<Vec<u8>>,
    records: Vec<RecordRef>,
}

impl SeaLogSource {
    pub fn new<R: ByteReader + 'static>(reader: R) -> Self {
        Self::from_shared(Arc::new(reader))
    }

    pub fn from_shared(reader: Arc<dyn ByteReader>) -> Self {
        Self {
            reader,
            index: None,
        }
    }

    fn index(&self) -> SourceResult<Arc<Index>> {
        self.index
            .clone()
            .ok_or(ReplayErr::Backend(SourceErr::NotInitialized))
    }

    async fn read_summary(&self) -> SourceResult<Summary> {
        let size = self.reader.size();
        if size < HEADER_SIZE + TRAILER_SIZE {
            return Err(ReplayErr::Backend(SourceErr::NotEnoughBytes));
        }
        let header = self.reader.read(Range::new(0, HEADER_SIZE)).await?;
        read_header(&header).map_err(format_err)?;

        let trailer = self
            .reader
            .read(Range::new(size - TRAILER_SIZE, size))
            .await?;
        let trailer = Trailer::read_from(&trailer).map_err(format_err)?;
        let range = trailer.summary_range(size).map_err(format_err)?;
        log::debug!("Reading summary {range}");
        let bytes = self.reader.read(range).await?;
        let computed = checksum(&bytes);
        if computed != trailer.summary_checksum {
            return Err(format_err(FormatErr::ChecksumErr {
                received: trailer.summary_checksum,
                computed,
            }));
        }
        Summary::read_from(&bytes).map_err(format_err)
    }
}

impl Index {
    fn channel_ids(&self, topics: &TopicSet) -> Vec<u16> {
        self.channels
            .values()
            .filter(|c| topics.contains(&c.topic))
            .map(|c| c.id)
            .collect()
    }
}

async fn load_chunk(reader: &dyn ByteReader, index: &ChunkIndex) -> SourceResult<Chunk> {
    let bytes = reader.read(index.range()).await?;
    if (bytes.len() as u64) < index.length {
        return Err(ReplayErr::Backend(SourceErr::NotEnoughBytes));
    }
    let (_, records) = read_chunk(&bytes).map_err(format_err)?;
    Ok(Chunk {
        bytes: Arc::new(bytes),
        records,
    })
}

fn corrupt_chunk(index: &ChunkIndex, err: &ReplayErr<SourceErr>) -> Problem {
    Problem::error(format!(
        "Chunk at offset {} ({} messages) is unreadable: {err}",
        index.offset, index.num_messages
    ))
    .with_tip("The file may be truncated or corrupted")
}

fn is_corruption(err: &ReplayErr<SourceErr>) -> bool {
    matches!(
        err,
        ReplayErr::Backend(SourceErr::FormatErr(_)) | ReplayErr::Backend(SourceErr::NotEnoughBytes)
    )
}

fn to_event(channel: &Channel, chunk: &Chunk, record: &RecordRef) -> MessageEvent {
    let payload = Payload::shared(
        chunk.bytes.clone(),
        record.payload.start as usize,
        record.payload.len() as usize,
    );
    let mut event = MessageEvent::new(
        channel.topic.clone(),
        channel.schema_name.clone(),
        record.receive_time,
        payload,
    );
    event.publish_time = record.publish_time;
    event
}

/// A record waiting for its turn; ordered by receive time, then by load order.
struct Pending {
    time: Time,
    seq: u64,
    chunk: Arc<Chunk>,
    record: RecordRef,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        (self.time, self.seq) == (other.time, other.seq)
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.time, self.seq).cmp(&(other.time, other.seq))
    }
}

/// Walks the chunks overlapping the requested time span in start time order. Chunks may
/// overlap in time, so records wait in a heap until no unread chunk can hold an earlier one.
struct ChunkWalker {
    reader: Arc<dyn ByteReader>,
    index: Arc<Index>,
    channels: Vec<u16>,
    chunks: VecDeque<ChunkIndex>,
    start: Time,
    end: Time,
    heap: BinaryHeap<Reverse<Pending>>,
    seq: u64,
    /// The latest end time of the chunks loaded so far.
    loaded_until: Option<Time>,
    queue: VecDeque<IteratorResult>,
    guard: OrderGuard,
}

impl ChunkWalker {
    async fn next(&mut self) -> Option<SourceResult<IteratorResult>> {
        loop {
            if let Some(item) = self.queue.pop_front() {
                return Some(Ok(item));
            }
            let next_start = self.chunks.front().map(|c| c.start_time);
            let ready = match (self.heap.peek(), next_start) {
                (Some(Reverse(head)), Some(start)) => head.time < start,
                (Some(_), None) => true,
                (None, _) => false,
            };
            if ready {
                if let Some(Reverse(pending)) = self.heap.pop() {
                    let channel = &self.index.channels[&pending.record.channel_id];
                    let item = IteratorResult::MessageEvent(to_event(
                        channel,
                        &pending.chunk,
                        &pending.record,
                    ));
                    return Some(Ok(self.guard.check(item)));
                }
            }
            if self.heap.is_empty() {
                if let Some(loaded_until) = self.loaded_until {
                    let stamp = loaded_until.min(self.end);
                    let covered = next_start.map_or(true, |start| start > loaded_until);
                    if covered && self.guard.last().map_or(true, |last| stamp > last) {
                        self.queue.push_back(self.guard.check(IteratorResult::Stamp(stamp)));
                        continue;
                    }
                }
            }
            let chunk_index = self.chunks.pop_front()?;
            self.loaded_until = Some(
                self.loaded_until
                    .map_or(chunk_index.end_time, |t| t.max(chunk_index.end_time)),
            );
            let loaded = load_chunk(self.reader.as_ref(), &chunk_index).await;
            for problem in self.reader.take_problems().await {
                self.queue.push_back(IteratorResult::Problem(problem));
            }
            let chunk = match loaded {
                Ok(chunk) => Arc::new(chunk),
                Err(e) if is_corruption(&e) => {
                    log::warn!("Skipping chunk at {}: {e}", chunk_index.offset);
                    self.queue
                        .push_back(IteratorResult::Problem(corrupt_chunk(&chunk_index, &e)));
                    continue;
                }
                Err(e) => {
                    self.chunks.clear();
                    self.heap.clear();
                    return Some(Err(e));
                }
            };
            for record in chunk.records.iter() {
                if record.receive_time < self.start || record.receive_time > self.end {
                    continue;
                }
                if !self.channels.contains(&record.channel_id) {
                    if !self.index.channels.contains_key(&record.channel_id) {
                        self.queue.push_back(IteratorResult::Problem(Problem::warn(format!(
                            "Record at {} refers to unknown channel {}",
                            record.receive_time, record.channel_id
                        ))));
                    }
                    continue;
                }
                self.heap.push(Reverse(Pending {
                    time: record.receive_time,
                    seq: self.seq,
                    chunk: chunk.clone(),
                    record: *record,
                }));
                self.seq += 1;
            }
        }
    }
}

#[async_trait]
impl IterableSource for SeaLogSource {
    async fn initialize(&mut self) -> SourceResult<Initialization> {
        let summary = self.read_summary().await?;
        let mut init = Initialization {
            profile: if summary.profile.is_empty() {
                None
            } else {
                Some(summary.profile.clone())
            },
            metadata: summary.metadata.clone(),
            ..Default::default()
        };

        let mut topics: BTreeMap<String, Topic> = BTreeMap::new();
        for channel in summary.channels.iter() {
            topics
                .entry(channel.topic.clone())
                .or_insert_with(|| Topic::new(&channel.topic, Some(channel.schema_name.clone())));
            if channel.num_messages > 0 {
                init.topic_stats
                    .entry(channel.topic.clone())
                    .or_default()
                    .merge(&TopicStats {
                        num_messages: channel.num_messages,
                        first_message_time: Some(channel.first_time),
                        last_message_time: Some(channel.last_time),
                    });
            }
            if !channel.publisher.is_empty() {
                init.publishers_by_topic
                    .entry(channel.topic.clone())
                    .or_default()
                    .insert(channel.publisher.clone());
            }
        }
        init.topics = topics.into_values().collect();

        let mut chunks = summary.chunks.clone();
        chunks.sort_by_key(|c| (c.start_time, c.offset));
        init.start = chunks.iter().map(|c| c.start_time).min().unwrap_or(Time::ZERO);
        init.end = chunks.iter().map(|c| c.end_time).max().unwrap_or(Time::ZERO);
        init.problems.extend(self.reader.take_problems().await);
        let total: u64 = chunks.iter().map(|c| c.num_messages as u64).sum();
        if total == 0 {
            init.problems
                .push(Problem::warn("This file contains no messages."));
        }
        log::debug!(
            "SeaLog initialized: {} topics, {} chunks, {} messages",
            init.topics.len(),
            chunks.len(),
            total
        );

        self.index = Some(Arc::new(Index {
            channels: summary
                .channels
                .into_iter()
                .map(|c| (c.id, c))
                .collect(),
            chunks,
        }));
        Ok(init)
    }

    fn message_iterator(&self, args: MessageIteratorArgs) -> MessageStream {
        let index = match self.index() {
            Ok(index) => index,
            Err(e) => {
                return sea_replay_types::export::futures::stream::once(async move { Err(e) })
                    .boxed()
            }
        };
        let start = args.start.unwrap_or(Time::ZERO);
        let end = args.end.unwrap_or(Time::MAX);
        let channels = index.channel_ids(&args.topics);
        let chunks: VecDeque<ChunkIndex> = if channels.is_empty() {
            VecDeque::new()
        } else {
            index
                .chunks
                .iter()
                .filter(|c| c.overlaps(start, end))
                .copied()
                .collect()
        };
        let walker = ChunkWalker {
            reader: self.reader.clone(),
            index,
            channels,
            chunks,
            start,
            end,
            heap: BinaryHeap::new(),
            seq: 0,
            loaded_until: None,
            queue: VecDeque::new(),
            guard: OrderGuard::new(),
        };
        sea_replay_types::export::futures::stream::unfold(walker, |mut walker| async move {
            let item = walker.next().await?;
            Some((item, walker))
        })
        .boxed()
    }

    async fn get_backfill_messages(
        &self,
        args: BackfillArgs,
        abort: Option<AbortSignal>,
    ) -> SourceResult<Vec<MessageEvent>> {
        let index = self.index()?;
        let mut loaded: HashMap<u64, Arc<Chunk>> = HashMap::new();
        let mut found = Vec::new();

        for topic in args.topics.iter() {
            let channels = index.channel_ids(&TopicSet::from([topic.clone()]));
            if channels.is_empty() {
                continue;
            }
            // the best a chunk can offer is its end time, capped at the backfill time
            let mut candidates: Vec<(Time, &ChunkIndex)> = index
                .chunks
                .iter()
                .filter(|c| c.start_time <= args.time && c.num_messages > 0)
                .map(|c| (c.end_time.min(args.time), c))
                .collect();
            candidates.sort_by_key(|(bound, c)| (Reverse(*bound), Reverse(c.offset)));

            let mut best: Option<(Arc<Chunk>, RecordRef)> = None;
            for (bound, chunk_index) in candidates {
                if best
                    .as_ref()
                    .map_or(false, |(_, record)| record.receive_time >= bound)
                {
                    break;
                }
                if abort.as_ref().map_or(false, |a| a.is_aborted()) {
                    return Err(ReplayErr::Aborted);
                }
                let chunk = match loaded.get(&chunk_index.offset) {
                    Some(chunk) => chunk.clone(),
                    None => match load_chunk(self.reader.as_ref(), chunk_index).await {
                        Ok(chunk) => {
                            let chunk = Arc::new(chunk);
                            loaded.insert(chunk_index.offset, chunk.clone());
                            chunk
                        }
                        Err(e) if is_corruption(&e) => {
                            log::warn!("Backfill skipping chunk at {}: {e}", chunk_index.offset);
                            continue;
                        }
                        Err(e) => return Err(e),
                    },
                };
                let latest = chunk
                    .records
                    .iter()
                    .filter(|r| channels.contains(&r.channel_id) && r.receive_time <= args.time)
                    .max_by_key(|r| r.receive_time);
                if let Some(record) = latest {
                    if best
                        .as_ref()
                        .map_or(true, |(_, b)| record.receive_time > b.receive_time)
                    {
                        best = Some((chunk.clone(), *record));
                    }
                }
            }
            if let Some((chunk, record)) = best {
                let channel = &index.channels[&record.channel_id];
                found.push(to_event(channel, &chunk, &record));
            }
        }

        found.sort_by(|a: &MessageEvent, b: &MessageEvent| {
            a.receive_time
                .cmp(&b.receive_time)
                .then_with(|| a.topic.cmp(&b.topic))
        });
        Ok(found)
    }
}

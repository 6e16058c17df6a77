use crate::{IterableSource, MessageStream, OrderGuard, SourceResult};
use sea_replay_types::{
    export::{async_trait, futures::StreamExt},
    AbortSignal, BackfillArgs, Initialization, IteratorResult, MessageEvent, MessageIteratorArgs,
    Problem, ReplayErr, Time, Topic,
};
use std::{collections::BTreeMap, sync::Arc};

#[derive(Debug, Clone, Default)]
/// A source over messages held in memory, in the order given.
pub struct MemorySource {
    messages: Arc<Vec<MessageEvent>>,
    problems: Vec<Problem>,
    profile: Option<String>,
}

impl MemorySource {
    pub fn new(messages: Vec<MessageEvent>) -> Self {
        Self {
            messages: Arc::new(messages),
            problems: Vec::new(),
            profile: None,
        }
    }

    /// Problems reported on initialize, in addition to the ones found in the messages.
    pub fn with_problems(mut self, problems: Vec<Problem>) -> Self {
        self.problems = problems;
        self
    }

    pub fn with_profile<S: Into<String>>(mut self, profile: S) -> Self {
        self.profile = Some(profile.into());
        self
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[async_trait]
impl IterableSource for MemorySource {
    async fn initialize(&mut self) -> SourceResult<Initialization> {
        let mut init = Initialization {
            profile: self.profile.clone(),
            problems: self.problems.clone(),
            ..Default::default()
        };
        let mut schemas: BTreeMap<&str, &str> = BTreeMap::new();
        for message in self.messages.iter() {
            schemas
                .entry(message.topic.as_str())
                .or_insert(message.schema_name.as_str());
            init.topic_stats
                .entry(message.topic.clone())
                .or_default()
                .record(message.receive_time);
        }
        init.topics = schemas
            .into_iter()
            .map(|(topic, schema)| Topic::new(topic, Some(schema.to_owned())))
            .collect();
        let stats = init.topic_stats.values();
        init.start = stats
            .clone()
            .filter_map(|s| s.first_message_time)
            .min()
            .unwrap_or(Time::ZERO);
        init.end = stats
            .filter_map(|s| s.last_message_time)
            .max()
            .unwrap_or(Time::ZERO);
        if self.messages.is_empty() {
            init.problems
                .push(Problem::warn("This file contains no messages."));
        }
        Ok(init)
    }

    fn message_iterator(&self, args: MessageIteratorArgs) -> MessageStream {
        let messages = self.messages.clone();
        let start = args.start.unwrap_or(Time::ZERO);
        let end = args.end.unwrap_or(Time::MAX);
        let mut guard = OrderGuard::new();
        let items: Vec<IteratorResult> = messages
            .iter()
            .filter(|m| args.topics.contains(&m.topic))
            .filter(|m| start <= m.receive_time && m.receive_time <= end)
            .map(|m| guard.check(IteratorResult::MessageEvent(m.clone())))
            .collect();
        sea_replay_types::export::futures::stream::iter(items.into_iter().map(Ok)).boxed()
    }

    async fn get_backfill_messages(
        &self,
        args: BackfillArgs,
        abort: Option<AbortSignal>,
    ) -> SourceResult<Vec<MessageEvent>> {
        if abort.map_or(false, |a| a.is_aborted()) {
            return Err(ReplayErr::Aborted);
        }
        Ok(latest_per_topic(self.messages.iter(), &args))
    }
}

/// The latest message of each topic at or before `args.time`, sorted by receive time.
pub(crate) fn latest_per_topic<'a, I>(messages: I, args: &BackfillArgs) -> Vec<MessageEvent>
where
    I: Iterator<Item = &'a MessageEvent>,
{
    let mut latest: BTreeMap<&str, &MessageEvent> = BTreeMap::new();
    for message in messages {
        if message.receive_time > args.time || !args.topics.contains(&message.topic) {
            continue;
        }
        let entry = latest.entry(message.topic.as_str()).or_insert(message);
        if message.receive_time >= entry.receive_time {
            *entry = message;
        }
    }
    let mut messages: Vec<MessageEvent> = latest.into_values().cloned().collect();
    messages.sort_by(|a, b| {
        a.receive_time
            .cmp(&b.receive_time)
            .then_with(|| a.topic.cmp(&b.topic))
    });
    messages
}

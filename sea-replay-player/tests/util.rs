#![allow(dead_code)]

use flume::Receiver;
use sea_replay_player::PlayerOptions;
use sea_replay_source::{IterableSource, MemorySource, MessageStream, SourceErr, SourceResult};
use sea_replay_types::{
    export::{
        async_trait,
        futures::{stream, StreamExt},
    },
    AbortSignal, BackfillArgs, Initialization, MessageEvent, MessageIteratorArgs, Payload,
    PlayerPresence, PlayerState, ReplayErr, Time,
};
use std::{
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    time::Duration,
};

pub fn message(topic: &str, sec: u32) -> MessageEvent {
    MessageEvent::new(
        topic,
        "std_msgs/String",
        Time::new(sec, 0),
        Payload::from(format!("{topic}:{sec}").as_str()),
    )
}

/// One message per second on each topic, from `from` to `to` inclusive.
pub fn messages(topics: &[&str], from: u32, to: u32) -> Vec<MessageEvent> {
    let mut messages = Vec::new();
    for sec in from..=to {
        for topic in topics {
            messages.push(message(topic, sec));
        }
    }
    messages
}

/// Fast enough that a ten second recording plays in a few dozen milliseconds.
pub fn fast() -> PlayerOptions {
    let mut options = PlayerOptions::default();
    options
        .set_speed(1000.0)
        .set_tick_interval(Duration::from_millis(1))
        .set_reconnect_backoff(Duration::from_millis(1));
    options
}

pub fn payloads<'a, I: IntoIterator<Item = &'a MessageEvent>>(messages: I) -> Vec<String> {
    messages
        .into_iter()
        .map(|m| m.message.as_str().unwrap().to_owned())
        .collect()
}

/// Receives states until playback stops after having started, or fails.
pub async fn play_through(states: &Receiver<Arc<PlayerState>>) -> Vec<Arc<PlayerState>> {
    let mut seen = Vec::new();
    let mut started = false;
    while let Ok(state) = states.recv_async().await {
        let playing = state.is_playing();
        let presence = state.presence;
        seen.push(state);
        if presence == PlayerPresence::Error {
            break;
        }
        if playing {
            started = true;
        } else if started && presence == PlayerPresence::Present {
            break;
        }
    }
    seen
}

pub fn delivered(states: &[Arc<PlayerState>]) -> Vec<MessageEvent> {
    states
        .iter()
        .flat_map(|s| s.messages().iter().cloned())
        .collect()
}

#[derive(Debug)]
/// Serves messages from memory, but its iterators fail with a lost connection after
/// `break_after` items, a given number of times.
pub struct FlakySource {
    inner: MemorySource,
    breaks: Arc<AtomicU32>,
    break_after: usize,
}

impl FlakySource {
    pub fn new(messages: Vec<MessageEvent>, breaks: u32, break_after: usize) -> Self {
        Self {
            inner: MemorySource::new(messages),
            breaks: Arc::new(AtomicU32::new(breaks)),
            break_after,
        }
    }
}

#[async_trait]
impl IterableSource for FlakySource {
    async fn initialize(&mut self) -> SourceResult<Initialization> {
        self.inner.initialize().await
    }

    fn message_iterator(&self, args: MessageIteratorArgs) -> MessageStream {
        let stream = self.inner.message_iterator(args);
        let breaking = self
            .breaks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !breaking {
            return stream;
        }
        stream
            .take(self.break_after)
            .chain(stream::once(async {
                Err(ReplayErr::Disconnected("connection reset".to_owned()))
            }))
            .boxed()
    }

    async fn get_backfill_messages(
        &self,
        args: BackfillArgs,
        abort: Option<AbortSignal>,
    ) -> SourceResult<Vec<MessageEvent>> {
        self.inner.get_backfill_messages(args, abort).await
    }
}

#[derive(Debug)]
/// A source that cannot be initialized.
pub struct BrokenSource;

#[async_trait]
impl IterableSource for BrokenSource {
    async fn initialize(&mut self) -> SourceResult<Initialization> {
        Err(ReplayErr::Backend(SourceErr::UnknownFormat(
            "not a recording".to_owned(),
        )))
    }

    fn message_iterator(&self, _: MessageIteratorArgs) -> MessageStream {
        stream::empty().boxed()
    }

    async fn get_backfill_messages(
        &self,
        _: BackfillArgs,
        _: Option<AbortSignal>,
    ) -> SourceResult<Vec<MessageEvent>> {
        Err(ReplayErr::Backend(SourceErr::NotInitialized))
    }
}

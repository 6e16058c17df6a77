#![allow(dead_code)]

use sea_replay_source::{
    ByteStream, MemoryReader, RangeFetcher, SeaLogWriter, SeaLogWriterOptions, SourceResult,
};
use sea_replay_types::{
    export::{async_trait, futures::StreamExt},
    MessageEvent, Payload, Range, Time,
};
use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
};

pub fn temp_file(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("{}-{name}", std::process::id()));
    path
}

pub fn message(topic: &str, time: Time, payload: &str) -> MessageEvent {
    MessageEvent::new(topic, "std_msgs/String", time, Payload::from(payload))
}

/// One message per second on `topic`, from `from` to `to` inclusive. The payload names the
/// source and the second.
pub fn messages(source: &str, topic: &str, from: u32, to: u32) -> Vec<MessageEvent> {
    (from..=to)
        .map(|sec| message(topic, Time::new(sec, 0), &format!("{source}:{sec}")))
        .collect()
}

pub fn sealog(messages: &[MessageEvent], chunk_size: usize) -> Vec<u8> {
    let mut options = SeaLogWriterOptions::default();
    options.set_chunk_size(chunk_size);
    let mut writer = SeaLogWriter::new(Vec::new(), options).unwrap();
    for message in messages {
        writer.write(message).unwrap();
    }
    writer.finish().unwrap()
}

#[derive(Debug)]
/// A fetcher whose connections break after about `break_after` bytes, a given number of
/// times.
pub struct FlakyFetcher {
    inner: MemoryReader,
    /// Connections left to break.
    breaks: Arc<AtomicU32>,
    break_after: usize,
    pub fetches: Arc<AtomicU32>,
}

impl FlakyFetcher {
    pub fn new(bytes: Vec<u8>, breaks: u32, break_after: usize) -> Self {
        Self {
            inner: MemoryReader::new(bytes).chunk_size(16),
            breaks: Arc::new(AtomicU32::new(breaks)),
            break_after,
            fetches: Default::default(),
        }
    }
}

#[async_trait]
impl RangeFetcher for FlakyFetcher {
    async fn size(&self) -> SourceResult<u64> {
        RangeFetcher::size(&self.inner).await
    }

    async fn fetch(&self, range: Range) -> SourceResult<ByteStream> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let stream = self.inner.fetch(range).await?;
        let breaking = self
            .breaks
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if !breaking {
            return Ok(stream);
        }
        let take = self.break_after / 16;
        Ok(stream
            .take(take)
            .chain(sea_replay_types::export::futures::stream::once(async {
                Err(std::io::ErrorKind::ConnectionReset.into())
            }))
            .boxed())
    }
}

//! Recordings as JSON lines, one message per line:
//!
//! ```json
//! {"topic": "/imu", "schema": "sensor_msgs/Imu", "time": 1700000000.25, "message": {"x": 1}}
//! {"topic": "/imu", "time": {"sec": 1700000000, "nsec": 500000000}, "message": {"x": 2}}
//! {"topic": "/log", "time": "2023-11-14T22:13:21.0", "publish_time": 1700000000, "message": "hi"}
//! ```
//!
//! The payload of a message is its `message` value serialized as compact JSON. Lines that do
//! not parse are reported as problems. The whole file is read on initialize, so this is meant
//! for small, hand-written recordings.

use crate::{ByteReader, IterableSource, MemorySource, MessageStream, SourceErr, SourceResult};
use sea_replay_types::{
    export::{async_trait, futures::StreamExt},
    AbortSignal, BackfillArgs, Initialization, MessageEvent, MessageIteratorArgs, Payload, Problem,
    Range, ReplayErr, Time,
};
use serde::Deserialize;
use std::sync::Arc;

pub const DEFAULT_SCHEMA: &str = "json";

#[derive(Debug)]
pub struct JsonLinesSource {
    reader: Arc<dyn ByteReader>,
    inner: Option<MemorySource>,
}

#[derive(Debug, Deserialize)]
struct JsonRecord {
    topic: String,
    #[serde(default)]
    schema: Option<String>,
    time: JsonTime,
    #[serde(default)]
    publish_time: Option<JsonTime>,
    message: serde_json::Value,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum JsonTime {
    Seconds(f64),
    Parts { sec: u32, nsec: u32 },
    Text(String),
}

impl JsonTime {
    fn to_time(&self) -> Result<Time, String> {
        match self {
            Self::Seconds(secs) => Time::from_secs_f64(*secs).map_err(|e| e.to_string()),
            Self::Parts { sec, nsec } => Ok(Time::new(*sec, *nsec)),
            Self::Text(s) => s.parse().map_err(|e: sea_replay_types::TimeErr| e.to_string()),
        }
    }
}

/// Parses one line. `Ok(None)` for blank lines.
fn parse_line(line: &str) -> Result<Option<MessageEvent>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let record: JsonRecord = serde_json::from_str(line).map_err(|e| e.to_string())?;
    let receive_time = record.time.to_time()?;
    let payload = serde_json::to_vec(&record.message).map_err(|e| e.to_string())?;
    let mut event = MessageEvent::new(
        record.topic,
        record.schema.unwrap_or_else(|| DEFAULT_SCHEMA.to_owned()),
        receive_time,
        Payload::new(payload),
    );
    event.publish_time = match record.publish_time {
        Some(t) => Some(t.to_time()?),
        None => None,
    };
    Ok(Some(event))
}

impl JsonLinesSource {
    pub fn new<R: ByteReader + 'static>(reader: R) -> Self {
        Self::from_shared(Arc::new(reader))
    }

    pub fn from_shared(reader: Arc<dyn ByteReader>) -> Self {
        Self {
            reader,
            inner: None,
        }
    }

    fn inner(&self) -> SourceResult<&MemorySource> {
        self.inner
            .as_ref()
            .ok_or(ReplayErr::Backend(SourceErr::NotInitialized))
    }
}

#[async_trait]
impl IterableSource for JsonLinesSource {
    async fn initialize(&mut self) -> SourceResult<Initialization> {
        let bytes = self
            .reader
            .read(Range::new(0, self.reader.size()))
            .await?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|e| ReplayErr::Backend(SourceErr::Utf8Error(e)))?;

        let mut messages = Vec::new();
        let mut problems = self.reader.take_problems().await;
        for (i, line) in text.lines().enumerate() {
            match parse_line(line) {
                Ok(Some(event)) => messages.push(event),
                Ok(None) => (),
                Err(e) => {
                    log::debug!("Line {}: {e}", i + 1);
                    problems.push(
                        Problem::warn(format!("Line {} is not a valid record: {e}", i + 1))
                            .with_tip(r#"Each line should look like {"topic": ..., "time": ..., "message": ...}"#),
                    );
                }
            }
        }

        let mut inner = MemorySource::new(messages).with_problems(problems);
        let init = inner.initialize().await?;
        self.inner = Some(inner);
        Ok(init)
    }

    fn message_iterator(&self, args: MessageIteratorArgs) -> MessageStream {
        match self.inner() {
            Ok(inner) => inner.message_iterator(args),
            Err(e) => {
                sea_replay_types::export::futures::stream::once(async move { Err(e) }).boxed()
            }
        }
    }

    async fn get_backfill_messages(
        &self,
        args: BackfillArgs,
        abort: Option<AbortSignal>,
    ) -> SourceResult<Vec<MessageEvent>> {
        self.inner()?.get_backfill_messages(args, abort).await
    }
}

#[cfg(all(test, feature = "runtime-tokio"))]
mod test {
    use super::*;
    use crate::MemoryReader;
    use sea_replay_types::topics;

    const SAMPLE: &str = r#"
{"topic": "/imu", "schema": "sensor_msgs/Imu", "time": 10.5, "message": {"x": 1}}
{"topic": "/imu", "time": {"sec": 11, "nsec": 0}, "message": {"x": 2}}
not json
{"topic": "/log", "time": "1970-01-01T00:00:12.0", "publish_time": 11.5, "message": "hi"}
{"topic": "/log", "time": "yesterday", "message": "?"}
"#;

    #[tokio::test]
    async fn test_json_lines() -> anyhow::Result<()> {
        let mut source = JsonLinesSource::new(MemoryReader::new(SAMPLE.as_bytes().to_vec()));
        let init = source.initialize().await?;
        assert_eq!(init.num_messages(), 3);
        assert_eq!(init.start, Time::new(10, 500_000_000));
        assert_eq!(init.end, Time::new(12, 0));
        assert_eq!(init.problems.len(), 2);
        assert!(init.problems[0].message.starts_with("Line 4 "));
        assert_eq!(
            init.topic("/imu").and_then(|t| t.schema_name.as_deref()),
            Some("sensor_msgs/Imu")
        );

        let items: Vec<_> = source
            .message_iterator(MessageIteratorArgs::new(topics(["/imu", "/log"])))
            .collect()
            .await;
        assert_eq!(items.len(), 3);
        let last = items[2].as_ref().ok().and_then(|i| i.message_event()).unwrap();
        assert_eq!(last.message.as_str()?, r#""hi""#);
        assert_eq!(last.publish_time, Some(Time::new(11, 500_000_000)));
        assert_eq!(last.schema_name, DEFAULT_SCHEMA);
        Ok(())
    }
}

use std::{
    collections::{BTreeMap, BTreeSet},
    str::Utf8Error,
    sync::Arc,
};

use crate::Time;

#[derive(Debug, Clone)]
/// The raw bytes of a message. It uses an `Arc` to hold the bytes, so is cheap to clone,
/// and a decoded chunk can hand out slices of itself without copying.
pub struct Payload {
    bytes: Arc<Vec<u8>>,
    offset: u32,
    length: u32,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
/// A message as delivered to consumers.
pub struct MessageEvent {
    pub topic: String,
    pub schema_name: String,
    pub receive_time: Time,
    pub publish_time: Option<Time>,
    pub message: Payload,
    /// Approximate memory footprint; used for buffer accounting.
    pub size_in_bytes: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Severity {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// A non-fatal condition: malformed record, empty file, schema oddity.
/// It never stops playback.
pub struct Problem {
    pub severity: Severity,
    pub message: String,
    pub topic: Option<String>,
    pub connection_id: Option<u32>,
    pub tip: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
/// One item pulled from a message iterator.
pub enum IteratorResult {
    MessageEvent(MessageEvent),
    Problem(Problem),
    /// Progress marker; the source has read everything up to this time.
    Stamp(Time),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Topic {
    pub name: String,
    pub schema_name: Option<String>,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TopicStats {
    pub num_messages: u64,
    pub first_message_time: Option<Time>,
    pub last_message_time: Option<Time>,
}

#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
/// Produced once by a source; immutable afterwards.
pub struct Initialization {
    pub start: Time,
    pub end: Time,
    pub topics: Vec<Topic>,
    pub topic_stats: BTreeMap<String, TopicStats>,
    pub publishers_by_topic: BTreeMap<String, BTreeSet<String>>,
    /// Named key-value records stored in the file.
    pub metadata: Vec<(String, BTreeMap<String, String>)>,
    pub profile: Option<String>,
    pub problems: Vec<Problem>,
}

/// The set of topics a consumer subscribes to.
pub type TopicSet = BTreeSet<String>;

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MessageIteratorArgs {
    pub topics: TopicSet,
    /// Inclusive. Defaults to the source's start.
    pub start: Option<Time>,
    /// Inclusive. Defaults to the source's end.
    pub end: Option<Time>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BackfillArgs {
    pub topics: TopicSet,
    pub time: Time,
}

impl Payload {
    pub fn new(bytes: Vec<u8>) -> Self {
        let length = bytes.len();
        Self::shared(Arc::new(bytes), 0, length)
    }

    /// A view into `bytes[offset..offset + length]`.
    pub fn shared(bytes: Arc<Vec<u8>>, offset: usize, length: usize) -> Self {
        assert!(offset + length <= bytes.len());
        Self {
            bytes,
            offset: offset as u32,
            length: length as u32,
        }
    }

    pub fn size(&self) -> usize {
        self.length as usize
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[self.offset as usize..(self.offset + self.length) as usize]
    }

    pub fn as_str(&self) -> Result<&str, Utf8Error> {
        std::str::from_utf8(self.as_bytes())
    }

    /// This will attempt to take the bytes *without* copying,
    /// if the bytes are not shared with any other.
    pub fn into_bytes(self) -> Vec<u8> {
        if self.offset == 0 && self.length as usize == self.bytes.len() {
            Arc::try_unwrap(self.bytes).unwrap_or_else(|arc| (*arc).clone())
        } else {
            self.as_bytes().to_vec()
        }
    }

    #[cfg(feature = "json")]
    #[cfg_attr(docsrs, doc(cfg(feature = "json")))]
    pub fn deserialize_json<D: serde::de::DeserializeOwned>(&self) -> Result<D, crate::JsonErr> {
        Ok(serde_json::from_str(self.as_str()?)?)
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Payload {}

impl std::hash::Hash for Payload {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state);
    }
}

impl Default for Payload {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self::new(bytes)
    }
}

impl From<&str> for Payload {
    fn from(s: &str) -> Self {
        Self::new(s.as_bytes().to_vec())
    }
}

#[cfg(feature = "serde")]
impl serde::Serialize for Payload {
    /// UTF-8 payloads serialize as a string, anything else as an array of bytes.
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self.as_str() {
            Ok(s) => serializer.serialize_str(s),
            Err(_) => serializer.serialize_bytes(self.as_bytes()),
        }
    }
}

impl MessageEvent {
    pub fn new<T: Into<String>, S: Into<String>>(
        topic: T,
        schema_name: S,
        receive_time: Time,
        message: Payload,
    ) -> Self {
        let size_in_bytes = message.size();
        Self {
            topic: topic.into(),
            schema_name: schema_name.into(),
            receive_time,
            publish_time: None,
            message,
            size_in_bytes,
        }
    }
}

impl Problem {
    pub fn new<S: Into<String>>(severity: Severity, message: S) -> Self {
        Self {
            severity,
            message: message.into(),
            topic: None,
            connection_id: None,
            tip: None,
        }
    }

    pub fn warn<S: Into<String>>(message: S) -> Self {
        Self::new(Severity::Warn, message)
    }

    pub fn error<S: Into<String>>(message: S) -> Self {
        Self::new(Severity::Error, message)
    }

    pub fn with_topic<S: Into<String>>(mut self, topic: S) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn with_connection_id(mut self, id: u32) -> Self {
        self.connection_id = Some(id);
        self
    }

    pub fn with_tip<S: Into<String>>(mut self, tip: S) -> Self {
        self.tip = Some(tip.into());
        self
    }
}

impl IteratorResult {
    /// The time this item is ordered by; problems carry no time.
    pub fn time(&self) -> Option<Time> {
        match self {
            Self::MessageEvent(m) => Some(m.receive_time),
            Self::Stamp(t) => Some(*t),
            Self::Problem(_) => None,
        }
    }

    pub fn message_event(&self) -> Option<&MessageEvent> {
        match self {
            Self::MessageEvent(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_message_event(self) -> Option<MessageEvent> {
        match self {
            Self::MessageEvent(m) => Some(m),
            _ => None,
        }
    }
}

impl Topic {
    pub fn new<T: Into<String>>(name: T, schema_name: Option<String>) -> Self {
        Self {
            name: name.into(),
            schema_name,
        }
    }
}

impl TopicStats {
    /// Accounts for one more message received at `time`.
    pub fn record(&mut self, time: Time) {
        self.num_messages += 1;
        self.first_message_time = Some(self.first_message_time.map_or(time, |t| t.min(time)));
        self.last_message_time = Some(self.last_message_time.map_or(time, |t| t.max(time)));
    }

    pub fn merge(&mut self, other: &TopicStats) {
        self.num_messages += other.num_messages;
        self.first_message_time = match (self.first_message_time, other.first_message_time) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.last_message_time = match (self.last_message_time, other.last_message_time) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
}

impl Initialization {
    pub fn topic(&self, name: &str) -> Option<&Topic> {
        self.topics.iter().find(|t| t.name == name)
    }

    /// Total number of messages across all topics, if the source knows it.
    pub fn num_messages(&self) -> u64 {
        self.topic_stats.values().map(|s| s.num_messages).sum()
    }
}

impl MessageIteratorArgs {
    pub fn new(topics: TopicSet) -> Self {
        Self {
            topics,
            start: None,
            end: None,
        }
    }

    pub fn start(mut self, start: Time) -> Self {
        self.start = Some(start);
        self
    }

    pub fn end(mut self, end: Time) -> Self {
        self.end = Some(end);
        self
    }
}

/// Convenience constructor of a [`TopicSet`].
pub fn topics<I, S>(names: I) -> TopicSet
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    names.into_iter().map(Into::into).collect()
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_payload() {
        let bytes = Arc::new(b"hello world".to_vec());
        let world = Payload::shared(bytes.clone(), 6, 5);
        assert_eq!(world.as_str().unwrap(), "world");
        assert_eq!(world.size(), 5);
        assert_eq!(world.into_bytes(), b"world".to_vec());

        let whole = Payload::new(b"abc".to_vec());
        assert_eq!(whole.into_bytes(), b"abc".to_vec());
        assert!(Payload::default().is_empty());
    }

    #[test]
    fn test_topic_stats() {
        let mut a = TopicStats::default();
        a.record(Time::new(5, 0));
        a.record(Time::new(2, 0));
        assert_eq!(a.num_messages, 2);
        assert_eq!(a.first_message_time, Some(Time::new(2, 0)));
        assert_eq!(a.last_message_time, Some(Time::new(5, 0)));

        let mut b = TopicStats::default();
        b.record(Time::new(9, 0));
        a.merge(&b);
        assert_eq!(a.num_messages, 3);
        assert_eq!(a.first_message_time, Some(Time::new(2, 0)));
        assert_eq!(a.last_message_time, Some(Time::new(9, 0)));
    }
}

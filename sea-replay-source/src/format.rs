//! The SeaLog file format is designed for random access over slow, range-addressable storage.
//! Messages are grouped into chunks; a summary at the end of the file indexes every chunk by
//! byte offset and time span, so a reader only needs the tail of the file to start, and then
//! fetches the chunks it needs.
//!
//! ```ignore
//! +--------+---------~--------+-----+---------~--------+------~------+---------+
//! | header |       chunk      | ... |       chunk      |   summary   | trailer |
//! +--------+---------~--------+-----+---------~--------+------~------+---------+
//!
//! Header is 8 bytes:
//! +------+------+------+------+------+------+---------+------+
//! | 0x53 | 0x52 | 0x4C | 0x47 | 0x0D | 0x0A | version | 0x00 |
//! +------+------+------+------+------+------+---------+------+
//!
//! Chunk is:
//! +------+------------+----------+--------------+----~----+----------+
//! | 0x43 | start time | end time | records size | records | checksum |
//! +------+------------+----------+--------------+----~----+----------+
//!
//! Record is:
//! +------------+--------------+--------------+--------------+----~----+
//! | channel id | receive time | publish time | payload size | payload |
//! +------------+--------------+--------------+--------------+----~----+
//!
//! Summary is:
//! +------+---------+--------------+-----~-----+------------+---~---+--------------+---~---+
//! | 0x53 | profile | num channels |  channel  | num chunks | chunk | num metadata |  meta |
//! +------+---------+--------------+-----~-----+------------+---~---+--------------+---~---+
//!
//! Channel is:
//! +----+-------+--------+-----------+--------------+------------+-----------+
//! | id | topic | schema | publisher | num messages | first time | last time |
//! +----+-------+--------+-----------+--------------+------------+-----------+
//!
//! Chunk index is:
//! +--------+--------+------------+----------+--------------+
//! | offset | length | start time | end time | num messages |
//! +--------+--------+------------+----------+--------------+
//!
//! Metadata is a name followed by key-value entries:
//! +------+-------------+-----+-------+-----+
//! | name | num entries | key | value | ... |
//! +------+-------------+-----+-------+-----+
//!
//! Trailer is 16 bytes:
//! +----------------+------------------+------+------+------+------+
//! | summary offset | summary checksum | 0x53 | 0x52 | 0x4C | 0x47 |
//! +----------------+------------------+------+------+------+------+
//! ```
//!
//! Channel ids are u16, sizes and counts are u32, offsets and lengths are u64.
//! A time is two u32: seconds and nanoseconds. A zero publish time means absent.
//! Topic, schema, publisher, profile, names and keys are short strings (u8 length + UTF-8);
//! metadata values are long strings (u32 length + UTF-8).
//! Checksums are Adler-32 over the records (chunk) or the summary bytes.
//! All numbers are encoded in big endian.

use sea_replay_types::{Range, Time};
use std::collections::BTreeMap;
use thiserror::Error;

pub const MAGIC: [u8; 4] = [0x53, 0x52, 0x4C, 0x47];
const LINE_BREAK: [u8; 2] = [0x0D, 0x0A];
pub const VERSION: u8 = 1;
pub const HEADER_SIZE: u64 = 8;
pub const TRAILER_SIZE: u64 = 16;
const CHUNK_MARKER: u8 = 0x43;
const SUMMARY_MARKER: u8 = 0x53;
/// Marker + start time + end time + records size.
pub const CHUNK_HEADER_SIZE: usize = 1 + 8 + 8 + 4;
/// Channel id + receive time + publish time + payload size.
pub const RECORD_HEADER_SIZE: usize = 2 + 8 + 8 + 4;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatErr {
    #[error("Byte mark mismatch")]
    ByteMark,
    #[error("Version mismatch: {0}")]
    Version(u8),
    #[error("Unexpected marker {0:#04x}")]
    Marker(u8),
    #[error("Not enough bytes")]
    NotEnoughBytes,
    #[error("String too long")]
    StringTooLong,
    #[error("Invalid UTF-8")]
    Utf8,
    #[error("Checksum mismatch: received {received:#010x}, computed {computed:#010x}")]
    ChecksumErr { received: u32, computed: u32 },
    #[error("Summary offset {0} out of bounds")]
    SummaryOffset(u64),
    #[error("Duplicate channel id {0}")]
    DuplicateChannel(u16),
    #[error("Too many channels")]
    TooManyChannels,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub id: u16,
    pub topic: String,
    pub schema_name: String,
    /// Empty if unknown.
    pub publisher: String,
    pub num_messages: u64,
    pub first_time: Time,
    pub last_time: Time,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkIndex {
    pub offset: u64,
    pub length: u64,
    pub start_time: Time,
    pub end_time: Time,
    pub num_messages: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub profile: String,
    pub channels: Vec<Channel>,
    pub chunks: Vec<ChunkIndex>,
    pub metadata: Vec<(String, BTreeMap<String, String>)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trailer {
    pub summary_offset: u64,
    pub summary_checksum: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub start_time: Time,
    pub end_time: Time,
    pub records_size: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// A record inside a chunk; the payload is a range of the chunk bytes.
pub struct RecordRef {
    pub channel_id: u16,
    pub receive_time: Time,
    pub publish_time: Option<Time>,
    pub payload: Range,
}

/// Reads big endian numbers and strings off a byte slice.
#[derive(Debug)]
pub struct Decoder<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    pub fn bytes(&mut self, len: usize) -> Result<&'a [u8], FormatErr> {
        if self.remaining() < len {
            return Err(FormatErr::NotEnoughBytes);
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], FormatErr> {
        let mut array = [0u8; N];
        array.copy_from_slice(self.bytes(N)?);
        Ok(array)
    }

    pub fn u8(&mut self) -> Result<u8, FormatErr> {
        Ok(self.array::<1>()?[0])
    }

    pub fn u16(&mut self) -> Result<u16, FormatErr> {
        Ok(u16::from_be_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, FormatErr> {
        Ok(u32::from_be_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, FormatErr> {
        Ok(u64::from_be_bytes(self.array()?))
    }

    pub fn time(&mut self) -> Result<Time, FormatErr> {
        let sec = self.u32()?;
        let nsec = self.u32()?;
        Ok(Time::new(sec, nsec))
    }

    pub fn short_string(&mut self) -> Result<String, FormatErr> {
        let len = self.u8()? as usize;
        self.string(len)
    }

    pub fn long_string(&mut self) -> Result<String, FormatErr> {
        let len = self.u32()? as usize;
        self.string(len)
    }

    fn string(&mut self, len: usize) -> Result<String, FormatErr> {
        let bytes = self.bytes(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| FormatErr::Utf8)
    }
}

/// Writes big endian numbers and strings into a buffer.
#[derive(Debug, Default)]
pub struct Encoder {
    buffer: Vec<u8>,
}

impl Encoder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buffer.extend_from_slice(bytes);
        self
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buffer.push(v);
        self
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.bytes(&v.to_be_bytes())
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.bytes(&v.to_be_bytes())
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.bytes(&v.to_be_bytes())
    }

    pub fn time(&mut self, t: Time) -> &mut Self {
        self.u32(t.sec()).u32(t.nsec())
    }

    pub fn short_string(&mut self, s: &str) -> Result<&mut Self, FormatErr> {
        if s.len() > u8::MAX as usize {
            return Err(FormatErr::StringTooLong);
        }
        Ok(self.u8(s.len() as u8).bytes(s.as_bytes()))
    }

    pub fn long_string(&mut self, s: &str) -> Result<&mut Self, FormatErr> {
        if s.len() > u32::MAX as usize {
            return Err(FormatErr::StringTooLong);
        }
        Ok(self.u32(s.len() as u32).bytes(s.as_bytes()))
    }
}

/// Adler-32.
pub fn checksum(bytes: &[u8]) -> u32 {
    const MOD: u32 = 65521;
    let (mut a, mut b) = (1u32, 0u32);
    // 5552 is the largest n such that the sums cannot overflow before the modulo
    for block in bytes.chunks(5552) {
        for byte in block {
            a += *byte as u32;
            b += a;
        }
        a %= MOD;
        b %= MOD;
    }
    (b << 16) | a
}

pub fn write_header(encoder: &mut Encoder) {
    encoder
        .bytes(&MAGIC)
        .bytes(&LINE_BREAK)
        .u8(VERSION)
        .u8(0);
}

pub fn read_header(bytes: &[u8]) -> Result<u8, FormatErr> {
    let mut decoder = Decoder::new(bytes);
    if decoder.bytes(4)? != MAGIC || decoder.bytes(2)? != LINE_BREAK {
        return Err(FormatErr::ByteMark);
    }
    let version = decoder.u8()?;
    if version != VERSION {
        return Err(FormatErr::Version(version));
    }
    Ok(version)
}

/// Whether the bytes start like a SeaLog file.
pub fn sniff(bytes: &[u8]) -> bool {
    bytes.len() >= MAGIC.len() && bytes[..MAGIC.len()] == MAGIC
}

impl Trailer {
    pub fn write_to(&self, encoder: &mut Encoder) {
        encoder
            .u64(self.summary_offset)
            .u32(self.summary_checksum)
            .bytes(&MAGIC);
    }

    pub fn read_from(bytes: &[u8]) -> Result<Self, FormatErr> {
        let mut decoder = Decoder::new(bytes);
        let summary_offset = decoder.u64()?;
        let summary_checksum = decoder.u32()?;
        if decoder.bytes(4)? != MAGIC {
            return Err(FormatErr::ByteMark);
        }
        Ok(Self {
            summary_offset,
            summary_checksum,
        })
    }

    /// The byte range of the summary in a file of `file_size`.
    pub fn summary_range(&self, file_size: u64) -> Result<Range, FormatErr> {
        let end = file_size.saturating_sub(TRAILER_SIZE);
        if self.summary_offset < HEADER_SIZE || self.summary_offset > end {
            return Err(FormatErr::SummaryOffset(self.summary_offset));
        }
        Ok(Range::new(self.summary_offset, end))
    }
}

impl Summary {
    pub fn write_to(&self, encoder: &mut Encoder) -> Result<(), FormatErr> {
        encoder.u8(SUMMARY_MARKER).short_string(&self.profile)?;
        let num_channels =
            u16::try_from(self.channels.len()).map_err(|_| FormatErr::TooManyChannels)?;
        encoder.u16(num_channels);
        for channel in self.channels.iter() {
            encoder
                .u16(channel.id)
                .short_string(&channel.topic)?
                .short_string(&channel.schema_name)?
                .short_string(&channel.publisher)?
                .u64(channel.num_messages)
                .time(channel.first_time)
                .time(channel.last_time);
        }
        encoder.u32(self.chunks.len() as u32);
        for chunk in self.chunks.iter() {
            encoder
                .u64(chunk.offset)
                .u64(chunk.length)
                .time(chunk.start_time)
                .time(chunk.end_time)
                .u32(chunk.num_messages);
        }
        encoder.u16(self.metadata.len() as u16);
        for (name, entries) in self.metadata.iter() {
            encoder.short_string(name)?.u16(entries.len() as u16);
            for (key, value) in entries.iter() {
                encoder.short_string(key)?.long_string(value)?;
            }
        }
        Ok(())
    }

    pub fn read_from(bytes: &[u8]) -> Result<Self, FormatErr> {
        let mut decoder = Decoder::new(bytes);
        let marker = decoder.u8()?;
        if marker != SUMMARY_MARKER {
            return Err(FormatErr::Marker(marker));
        }
        let profile = decoder.short_string()?;

        let num_channels = decoder.u16()?;
        let mut channels: Vec<Channel> = Vec::with_capacity(num_channels as usize);
        for _ in 0..num_channels {
            let channel = Channel {
                id: decoder.u16()?,
                topic: decoder.short_string()?,
                schema_name: decoder.short_string()?,
                publisher: decoder.short_string()?,
                num_messages: decoder.u64()?,
                first_time: decoder.time()?,
                last_time: decoder.time()?,
            };
            if channels.iter().any(|c| c.id == channel.id) {
                return Err(FormatErr::DuplicateChannel(channel.id));
            }
            channels.push(channel);
        }

        let num_chunks = decoder.u32()?;
        let mut chunks = Vec::new();
        for _ in 0..num_chunks {
            chunks.push(ChunkIndex {
                offset: decoder.u64()?,
                length: decoder.u64()?,
                start_time: decoder.time()?,
                end_time: decoder.time()?,
                num_messages: decoder.u32()?,
            });
        }

        let num_metadata = decoder.u16()?;
        let mut metadata = Vec::new();
        for _ in 0..num_metadata {
            let name = decoder.short_string()?;
            let num_entries = decoder.u16()?;
            let mut entries = BTreeMap::new();
            for _ in 0..num_entries {
                let key = decoder.short_string()?;
                let value = decoder.long_string()?;
                entries.insert(key, value);
            }
            metadata.push((name, entries));
        }

        Ok(Self {
            profile,
            channels,
            chunks,
            metadata,
        })
    }
}

impl ChunkIndex {
    pub fn range(&self) -> Range {
        Range::new(self.offset, self.offset + self.length)
    }

    /// Whether the chunk may hold messages in `[start, end]`.
    pub fn overlaps(&self, start: Time, end: Time) -> bool {
        self.start_time <= end && self.end_time >= start
    }
}

/// Frames already encoded records into a chunk.
pub fn write_chunk(encoder: &mut Encoder, start_time: Time, end_time: Time, records: &[u8]) {
    encoder
        .u8(CHUNK_MARKER)
        .time(start_time)
        .time(end_time)
        .u32(records.len() as u32)
        .bytes(records)
        .u32(checksum(records));
}

pub fn write_record(
    encoder: &mut Encoder,
    channel_id: u16,
    receive_time: Time,
    publish_time: Option<Time>,
    payload: &[u8],
) {
    encoder
        .u16(channel_id)
        .time(receive_time)
        .time(publish_time.unwrap_or(Time::ZERO))
        .u32(payload.len() as u32)
        .bytes(payload);
}

/// Verifies a whole chunk and lists its records. Payload ranges are relative to `bytes`.
pub fn read_chunk(bytes: &[u8]) -> Result<(ChunkHeader, Vec<RecordRef>), FormatErr> {
    let mut decoder = Decoder::new(bytes);
    let marker = decoder.u8()?;
    if marker != CHUNK_MARKER {
        return Err(FormatErr::Marker(marker));
    }
    let header = ChunkHeader {
        start_time: decoder.time()?,
        end_time: decoder.time()?,
        records_size: decoder.u32()?,
    };
    let records_start = decoder.pos();
    let records = decoder.bytes(header.records_size as usize)?;
    let received = decoder.u32()?;
    let computed = checksum(records);
    if received != computed {
        return Err(FormatErr::ChecksumErr { received, computed });
    }

    let mut decoder = Decoder::new(records);
    let mut refs = Vec::new();
    while decoder.remaining() > 0 {
        let channel_id = decoder.u16()?;
        let receive_time = decoder.time()?;
        let publish_time = decoder.time()?;
        let size = decoder.u32()? as usize;
        let start = (records_start + decoder.pos()) as u64;
        decoder.bytes(size)?;
        refs.push(RecordRef {
            channel_id,
            receive_time,
            publish_time: if publish_time.is_zero() {
                None
            } else {
                Some(publish_time)
            },
            payload: Range::new(start, start + size as u64),
        });
    }
    Ok((header, refs))
}

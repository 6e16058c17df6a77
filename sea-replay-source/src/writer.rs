use crate::{
    error::{format_err, io_err},
    format::{
        checksum, write_chunk, write_header, write_record, Channel, ChunkIndex, Encoder, FormatErr,
        Summary, Trailer,
    },
    SourceResult,
};
use sea_replay_types::{MessageEvent, Time};
use std::{collections::BTreeMap, io::Write};

pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

#[derive(Debug, Clone)]
pub struct SeaLogWriterOptions {
    chunk_size: usize,
    profile: String,
}

impl Default for SeaLogWriterOptions {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            profile: String::new(),
        }
    }
}

impl SeaLogWriterOptions {
    /// A chunk is closed once its records reach this many bytes.
    pub fn chunk_size(&self) -> &usize {
        &self.chunk_size
    }
    pub fn set_chunk_size(&mut self, v: usize) -> &mut Self {
        self.chunk_size = v.max(1);
        self
    }

    pub fn profile(&self) -> &str {
        &self.profile
    }
    pub fn set_profile<S: Into<String>>(&mut self, v: S) -> &mut Self {
        self.profile = v.into();
        self
    }
}

/// Writes a SeaLog file. Messages should be written in receive time order; the file
/// records whatever order it is given.
#[derive(Debug)]
pub struct SeaLogWriter<W: Write> {
    writer: W,
    options: SeaLogWriterOptions,
    offset: u64,
    channels: Vec<Channel>,
    chunks: Vec<ChunkIndex>,
    metadata: Vec<(String, BTreeMap<String, String>)>,
    records: Encoder,
    chunk_span: Option<(Time, Time)>,
    chunk_messages: u32,
}

impl<W: Write> SeaLogWriter<W> {
    pub fn new(mut writer: W, options: SeaLogWriterOptions) -> SourceResult<Self> {
        let mut header = Encoder::new();
        write_header(&mut header);
        writer.write_all(header.as_bytes()).map_err(io_err)?;
        Ok(Self {
            writer,
            options,
            offset: header.len() as u64,
            channels: Vec::new(),
            chunks: Vec::new(),
            metadata: Vec::new(),
            records: Encoder::new(),
            chunk_span: None,
            chunk_messages: 0,
        })
    }

    /// Returns the id of the channel for `topic`, registering it on first use.
    pub fn channel(&mut self, topic: &str, schema_name: &str, publisher: &str) -> SourceResult<u16> {
        if let Some(channel) = self.channels.iter().find(|c| c.topic == topic) {
            return Ok(channel.id);
        }
        let id = u16::try_from(self.channels.len())
            .map_err(|_| format_err(FormatErr::TooManyChannels))?;
        self.channels.push(Channel {
            id,
            topic: topic.to_owned(),
            schema_name: schema_name.to_owned(),
            publisher: publisher.to_owned(),
            num_messages: 0,
            first_time: Time::ZERO,
            last_time: Time::ZERO,
        });
        Ok(id)
    }

    pub fn add_metadata<S: Into<String>>(&mut self, name: S, entries: BTreeMap<String, String>) {
        self.metadata.push((name.into(), entries));
    }

    pub fn write(&mut self, message: &MessageEvent) -> SourceResult<()> {
        let id = self.channel(&message.topic, &message.schema_name, "")?;
        let channel = &mut self.channels[id as usize];
        let time = message.receive_time;
        if channel.num_messages == 0 {
            channel.first_time = time;
            channel.last_time = time;
        } else {
            channel.first_time = channel.first_time.min(time);
            channel.last_time = channel.last_time.max(time);
        }
        channel.num_messages += 1;

        write_record(
            &mut self.records,
            id,
            time,
            message.publish_time,
            message.message.as_bytes(),
        );
        self.chunk_span = Some(match self.chunk_span {
            Some((start, end)) => (start.min(time), end.max(time)),
            None => (time, time),
        });
        self.chunk_messages += 1;

        if self.records.len() >= self.options.chunk_size {
            self.flush_chunk()?;
        }
        Ok(())
    }

    fn flush_chunk(&mut self) -> SourceResult<()> {
        let (start_time, end_time) = match self.chunk_span.take() {
            Some(span) => span,
            None => return Ok(()),
        };
        let records = std::mem::take(&mut self.records);
        let mut chunk = Encoder::new();
        write_chunk(&mut chunk, start_time, end_time, records.as_bytes());
        self.writer.write_all(chunk.as_bytes()).map_err(io_err)?;
        self.chunks.push(ChunkIndex {
            offset: self.offset,
            length: chunk.len() as u64,
            start_time,
            end_time,
            num_messages: self.chunk_messages,
        });
        log::trace!(
            "Chunk at {} ({} messages, {} bytes)",
            self.offset,
            self.chunk_messages,
            chunk.len()
        );
        self.offset += chunk.len() as u64;
        self.chunk_messages = 0;
        Ok(())
    }

    /// Flushes the last chunk, writes the summary and returns the inner writer.
    pub fn finish(mut self) -> SourceResult<W> {
        self.flush_chunk()?;
        let summary = Summary {
            profile: std::mem::take(&mut self.options.profile),
            channels: std::mem::take(&mut self.channels),
            chunks: std::mem::take(&mut self.chunks),
            metadata: std::mem::take(&mut self.metadata),
        };
        let mut encoder = Encoder::new();
        summary.write_to(&mut encoder).map_err(format_err)?;
        Trailer {
            summary_offset: self.offset,
            summary_checksum: checksum(encoder.as_bytes()),
        }
        .write_to(&mut encoder);
        self.writer.write_all(encoder.as_bytes()).map_err(io_err)?;
        self.writer.flush().map_err(io_err)?;
        Ok(self.writer)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::format::{read_chunk, read_header, Summary, HEADER_SIZE, TRAILER_SIZE};
    use sea_replay_types::Payload;

    #[test]
    fn test_writer() {
        let mut options = SeaLogWriterOptions::default();
        options.set_chunk_size(64).set_profile("test");
        let mut writer = SeaLogWriter::new(Vec::new(), options).unwrap();
        for i in 0..10u32 {
            let topic = if i % 2 == 0 { "/even" } else { "/odd" };
            let mut message =
                MessageEvent::new(topic, "std_msgs/String", Time::new(i, 0), Payload::from("0123456789"));
            message.publish_time = Some(Time::new(i, 1));
            writer.write(&message).unwrap();
        }
        let bytes = writer.finish().unwrap();
        read_header(&bytes).unwrap();

        let size = bytes.len() as u64;
        let trailer = Trailer::read_from(&bytes[(size - TRAILER_SIZE) as usize..]).unwrap();
        let range = trailer.summary_range(size).unwrap();
        let summary_bytes = &bytes[range.start as usize..range.end as usize];
        assert_eq!(checksum(summary_bytes), trailer.summary_checksum);
        let summary = Summary::read_from(summary_bytes).unwrap();

        assert_eq!(summary.profile, "test");
        assert_eq!(summary.channels.len(), 2);
        assert_eq!(summary.channels[1].topic, "/odd");
        assert_eq!(summary.channels[1].num_messages, 5);
        assert_eq!(summary.channels[1].first_time, Time::new(1, 0));
        assert_eq!(summary.channels[1].last_time, Time::new(9, 0));
        // each record is 32 bytes, so every chunk holds two
        assert_eq!(summary.chunks.len(), 5);
        assert_eq!(summary.chunks[0].offset, HEADER_SIZE);
        let total: u32 = summary.chunks.iter().map(|c| c.num_messages).sum();
        assert_eq!(total, 10);

        let last = summary.chunks[4];
        let (header, records) = read_chunk(&bytes[last.range().start as usize..last.range().end as usize]).unwrap();
        assert_eq!(header.start_time, Time::new(8, 0));
        assert_eq!(header.end_time, Time::new(9, 0));
        assert_eq!(records[1].publish_time, Some(Time::new(9, 1)));
    }
}

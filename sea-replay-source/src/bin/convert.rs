//! This program converts a JSON lines recording into a SeaLog file.
//!
//! ```sh
//! jsonl-to-sealog --input drive.jsonl --output drive.sealog
//! ```
use anyhow::Result;
use clap::Parser;
use sea_replay_source::{
    FileReader, IterableSource, JsonLinesSource, SeaLogWriter, SeaLogWriterOptions,
    DEFAULT_CHUNK_SIZE, DEFAULT_SCHEMA,
};
use sea_replay_types::{export::futures::StreamExt, IteratorResult, MessageIteratorArgs};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
};

#[derive(Parser)]
struct Args {
    #[clap(long, help = "Read this JSON lines file")]
    input: PathBuf,
    #[clap(long, help = "Write to this file. Overwrites if exists")]
    output: PathBuf,
    #[clap(long, help = "Bytes of records per chunk", default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
    #[clap(long, help = "Profile name recorded in the file", default_value = "")]
    profile: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let Args {
        input,
        output,
        chunk_size,
        profile,
    } = Args::parse();

    let mut source = JsonLinesSource::new(FileReader::open(&input).await?);
    let init = source.initialize().await?;
    for problem in init.problems.iter() {
        log::warn!("{}", problem.message);
    }

    let mut options = SeaLogWriterOptions::default();
    options.set_chunk_size(chunk_size).set_profile(profile);
    let mut writer = SeaLogWriter::new(BufWriter::new(File::create(&output)?), options)?;
    for topic in init.topics.iter() {
        writer.channel(
            &topic.name,
            topic.schema_name.as_deref().unwrap_or(DEFAULT_SCHEMA),
            "",
        )?;
    }

    let topics = init.topics.iter().map(|t| t.name.clone()).collect();
    let mut stream = source.message_iterator(MessageIteratorArgs::new(topics));
    let mut count = 0;
    while let Some(item) = stream.next().await {
        match item? {
            IteratorResult::MessageEvent(message) => {
                writer.write(&message)?;
                count += 1;
            }
            IteratorResult::Problem(problem) => log::warn!("{}", problem.message),
            IteratorResult::Stamp(_) => (),
        }
    }
    writer.finish()?.flush()?;
    log::info!("Wrote {count} messages to {}", output.display());

    Ok(())
}

//! This program prints a recording (SeaLog or JSON lines) as plain text.
//!
//! Example `log` format:
//!
//! ```ignore
//! # 2023-06-05T13:55:53.001 - 2023-06-05T13:56:10.25 | 3 topics | 1200 messages
//! # /imu (sensor_msgs/Imu) 1000 messages
//! [2023-06-05T13:55:53.001 | /imu | 48] {"x":1}
//! ```
//!
//! Example `ndjson` format:
//!
//! ```ignore
//! {"topic":"/imu","schema_name":"sensor_msgs/Imu","receive_time":{"sec":1685973353,"nsec":1000000},...}
//! ```
use anyhow::Result;
use clap::Parser;
use sea_replay_source::{open_source, IterableSource, MessageCursor};
use sea_replay_types::{IteratorResult, MessageIteratorArgs, Time, TopicSet};
use std::{path::PathBuf, str::FromStr};

#[derive(Parser)]
struct Args {
    #[clap(long, help = "Read this file")]
    file: PathBuf,
    #[clap(long, help = "Only print these topics. All topics if unset")]
    topic: Vec<String>,
    #[clap(long, help = "Skip messages before this time, e.g. 2023-06-05T13:55:53.001")]
    start: Option<Time>,
    #[clap(long, help = "Stop after this time")]
    end: Option<Time>,
    #[clap(long, help = "If set, only print the summary")]
    summary_only: bool,
    #[clap(long, help = "If set, skip printing the payload")]
    header_only: bool,
    #[clap(long, help = "The output format", default_value = "log")]
    format: Format,
}

#[derive(Debug, Clone, Copy)]
enum Format {
    Log,
    Ndjson,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let Args {
        file,
        topic,
        start,
        end,
        summary_only,
        header_only,
        format,
    } = Args::parse();

    let mut source = open_source(&file).await?;
    let init = source.initialize().await?;
    for problem in init.problems.iter() {
        log::warn!("{}", problem.message);
    }

    if let Format::Log = format {
        println!(
            "# {} - {} | {} topics | {} messages",
            init.start,
            init.end,
            init.topics.len(),
            init.num_messages()
        );
        for t in init.topics.iter() {
            println!(
                "# {} ({}) {} messages",
                t.name,
                t.schema_name.as_deref().unwrap_or("?"),
                init.topic_stats.get(&t.name).map_or(0, |s| s.num_messages)
            );
        }
    }
    if summary_only {
        return Ok(());
    }

    let topics: TopicSet = if topic.is_empty() {
        init.topics.iter().map(|t| t.name.clone()).collect()
    } else {
        topic.into_iter().collect()
    };
    let mut args = MessageIteratorArgs::new(topics);
    args.start = start;
    args.end = end;

    let mut cursor = source.get_message_cursor(args, None);
    let mut count = 0;
    while let Some(batch) = cursor.next_batch(256).await? {
        for item in batch {
            let mut message = match item {
                IteratorResult::MessageEvent(message) => message,
                IteratorResult::Problem(problem) => {
                    log::warn!("{}", problem.message);
                    continue;
                }
                IteratorResult::Stamp(_) => continue,
            };
            count += 1;
            match format {
                Format::Log => {
                    print!(
                        "[{} | {} | {}]",
                        message.receive_time,
                        message.topic,
                        message.message.size()
                    );
                    if !header_only {
                        if let Ok(string) = message.message.as_str() {
                            print!(" {string}");
                        } else {
                            print!(" <BINARY BLOB>");
                        }
                    }
                    println!();
                }
                Format::Ndjson => {
                    if header_only {
                        message.message = Default::default();
                    }
                    println!("{}", serde_json::to_string(&message)?);
                }
            }
        }
    }
    cursor.close().await;
    log::info!("Printed {count} messages.");

    Ok(())
}

impl FromStr for Format {
    type Err = &'static str;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "log" => Ok(Self::Log),
            "ndjson" => Ok(Self::Ndjson),
            _ => Err("Invalid Format"),
        }
    }
}

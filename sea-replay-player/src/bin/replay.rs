//! This program plays a recording back in real time (or faster) and prints the messages
//! as they are delivered.
//!
//! ```ignore
//! replay --file drive.sealog --speed 4 --topic /imu
//! [2023-06-05T13:55:53.001 | /imu | 48] {"x":1}
//! ```
//!
//! Several files of one recording can be given; they are merged by receive time.
use anyhow::{bail, Result};
use clap::Parser;
use sea_replay_player::{Player, PlayerOptions};
use sea_replay_types::{PlayerPresence, Time, TopicSet};
use std::{path::PathBuf, str::FromStr};

#[derive(Parser)]
struct Args {
    #[clap(long, required = true, help = "Play this file. Repeat to merge several files")]
    file: Vec<PathBuf>,
    #[clap(long, help = "Playback speed", default_value_t = 1.0)]
    speed: f64,
    #[clap(long, help = "Start from this time, e.g. 2023-06-05T13:55:53.001")]
    start: Option<Time>,
    #[clap(long, help = "Stop at this time. The end of the recording if unset")]
    until: Option<Time>,
    #[clap(long, help = "Only play these topics. All topics if unset")]
    topic: Vec<String>,
    #[clap(long, help = "If set, skip printing the payload")]
    header_only: bool,
    #[clap(long, help = "The output format", default_value = "log")]
    format: Format,
}

#[derive(Debug, Clone, Copy)]
enum Format {
    Log,
    /// One player state per line
    Ndjson,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let Args {
        file,
        speed,
        start,
        until,
        topic,
        header_only,
        format,
    } = Args::parse();

    let mut options = PlayerOptions::default();
    options.set_speed(speed);
    if let Some(name) = file.first() {
        options.set_name(name.display().to_string());
    }
    if let Some(start) = start {
        options.set_start_time(start);
    }
    if !topic.is_empty() {
        options.set_topics(topic.into_iter().collect::<TopicSet>());
    }

    let player = if file.len() == 1 {
        Player::open(&file[0], options).await?
    } else {
        Player::open_all(&file, options).await?
    };
    let states = player.subscribe(16)?;
    match until {
        Some(until) => player.play_until(until)?,
        None => player.play()?,
    }

    let mut started = false;
    let mut count = 0;
    while let Ok(state) = states.recv_async().await {
        if state.presence == PlayerPresence::Error {
            for alert in state.alerts.iter() {
                log::error!("{}", alert.message);
            }
            bail!("Playback failed");
        }
        count += state.messages().len();
        match format {
            Format::Log => {
                for message in state.messages() {
                    print!(
                        "[{} | {} | {}]",
                        message.receive_time,
                        message.topic,
                        message.message.size()
                    );
                    if !header_only {
                        match message.message.as_str() {
                            Ok(string) => print!(" {string}"),
                            Err(_) => print!(" <BINARY BLOB>"),
                        }
                    }
                    println!();
                }
            }
            Format::Ndjson => {
                let mut state = (*state).clone();
                if header_only {
                    if let Some(active) = state.active_data.as_mut() {
                        active.messages.iter_mut().for_each(|m| m.message = Default::default());
                    }
                }
                println!("{}", serde_json::to_string(&state)?);
            }
        }
        if state.is_playing() {
            started = true;
        } else if started {
            break;
        }
    }
    log::info!("Played {count} messages.");
    player.close().await?;

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

//! <div align="center">
//!
//!   <h1>SeaReplay</h1>
//!
//!   <p>
//!     <strong>🌊 Seekable, paced playback of large recorded message logs</strong>
//!   </p>
//!
//! </div>
//!
//! SeaReplay plays robotics recordings back in recorded time. A recording is a long,
//! time-ordered sequence of messages on named topics; SeaReplay reads it from a local file or
//! from a remote resource fetched range by range, and delivers it at the chosen speed, with
//! pause, seek and topic selection.
//!
//! ## Features
//!
//! 1. Async
//!
//! SeaReplay provides an async API, and it supports both `tokio` and `async-std`.
//!
//! 2. Large files
//!
//! Recordings are read lazily. A remote resource is fetched range by range and cached, so
//! seeking into a recording of many gigabytes only downloads what is needed around the
//! playhead.
//!
//! 3. Resilient
//!
//! Malformed records are reported as alerts without stopping playback. Lost connections are
//! retried with backoff, and playback resumes where it left off, with nothing lost and
//! nothing delivered twice.
//!
//! ## Architecture
//!
//! `sea-replay` is the facade crate re-exporting implementation from a number of sub-crates:
//!
//! + `sea-replay-types`: messages, time, the player state
//! + `sea-replay-runtime`: async runtime abstraction
//! + `sea-replay-source`: byte readers, the remote range cache, log formats
//! + `sea-replay-player`: the playback loop
//!
//! ## Quick Start
//!
//! ```ignore
//! use sea_replay::{Player, PlayerOptions};
//!
//! let mut options = PlayerOptions::default();
//! options.set_speed(2.0);
//! let player = Player::open("drive.sealog", options).await?;
//! let states = player.subscribe(8)?;
//! player.play()?;
//! while let Ok(state) = states.recv_async().await {
//!     println!("{:?}: {} messages", state.current_time(), state.messages().len());
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]

pub use sea_replay_types::*;

#[cfg(feature = "sea-replay-source")]
#[cfg_attr(docsrs, doc(cfg(feature = "source")))]
pub use sea_replay_source as source;

#[cfg(feature = "sea-replay-source")]
#[cfg_attr(docsrs, doc(cfg(feature = "source")))]
pub use sea_replay_source::{
    open_remote, open_source, CachedReader, CachedReaderOptions, IterableSource, MessageCursor,
    RangeFetcher,
};

#[cfg(feature = "sea-replay-player")]
#[cfg_attr(docsrs, doc(cfg(feature = "player")))]
pub use sea_replay_player::*;

#[cfg(feature = "sea-replay-runtime")]
#[cfg_attr(docsrs, doc(cfg(feature = "runtime")))]
pub use sea_replay_runtime as runtime;

//! ### `sea-replay-player`: paced playback
//!
//! A [`Player`] plays an [`IterableSource`](sea_replay_source::IterableSource) back in
//! recorded time: at the chosen speed, pausable, seekable, with the topics it delivers
//! changeable at any moment. Consumers observe it through [`PlayerState`] snapshots, each
//! carrying the messages delivered since the previous one.
//!
//! ```ignore
//! let mut options = PlayerOptions::default();
//! options.set_speed(2.0).set_autoplay(true);
//! let player = Player::open("drive.sealog", options).await?;
//! let states = player.subscribe(8)?;
//! while let Ok(state) = states.recv_async().await {
//!     for message in state.messages() {
//!         // ...
//!     }
//! }
//! ```
//!
//! All playback state lives in one task. Commands sent through the handle are handled in
//! the order they were sent; a seek sent while the previous one is still backfilling
//! supersedes it.
//!
//! [`PlayerState`]: sea_replay_types::PlayerState

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_debug_implementations)]

mod error;
mod options;
mod playback;
mod player;

pub use error::*;
pub use options::*;
pub use player::*;

//! # 🌊 SeaReplay Types
//!
//! This crate defines the data model shared by all SeaReplay crates: receive time, byte ranges,
//! message events, source initialization, player state snapshots and the abort signal that
//! carries cancellation across task boundaries. It does not provide any implementation.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_debug_implementations)]

mod abort;
mod error;
mod message;
mod player;
mod range;
mod timestamp;

pub use abort::*;
pub use error::*;
pub use message::*;
pub use player::*;
pub use range::*;
pub use timestamp::*;

pub mod export;

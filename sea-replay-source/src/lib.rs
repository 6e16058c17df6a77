//! ### `sea-replay-source`: log sources
//!
//! Everything between the bytes of a recording and a time-ordered stream of messages.
//!
//! + [`ByteReader`]: random access to the bytes of one resource. [`FileReader`] reads a local
//!   file, [`MemoryReader`] a buffer, and [`CachedReader`] a remote resource fetched range by
//!   range through a [`RangeFetcher`], with the [`coordinator`] deciding what to download next.
//! + [`IterableSource`]: a log format presented as messages. [`SeaLogSource`] reads the chunked,
//!   indexed SeaLog format (see [`format`]), `JsonLinesSource` reads JSON lines (feature `json`),
//!   and [`MemorySource`] serves messages held in memory.
//! + [`MultiSource`] merges several sources of one recording, and [`WorkerSource`] runs a
//!   source in its own task.
//!
//! [`open_source`] sniffs the format of a local file and opens it.
//!
//! ```ignore
//! let mut source = open_source("drive.sealog").await?;
//! let init = source.initialize().await?;
//! let mut cursor = source.get_message_cursor(
//!     MessageIteratorArgs::new(topics(["/imu"])).start(init.start),
//!     None,
//! );
//! while let Some(batch) = cursor.next_batch(100).await? {
//!     // ...
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_debug_implementations)]

mod buffer;
mod cached;
pub mod coordinator;
mod dyn_source;
mod error;
pub mod format;
#[cfg(feature = "json")]
mod json;
mod memory;
mod multi;
pub mod range;
mod reader;
mod sealog;
mod source;
mod worker;
mod writer;

pub use buffer::*;
pub use cached::*;
pub use dyn_source::*;
pub use error::*;
#[cfg(feature = "json")]
#[cfg_attr(docsrs, doc(cfg(feature = "json")))]
pub use json::*;
pub use memory::MemorySource;
pub use multi::*;
pub use reader::*;
pub use sealog::*;
pub use source::*;
pub use worker::*;
pub use writer::*;

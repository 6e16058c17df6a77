//! ### `sea-replay-runtime`: Async runtime abstraction
//!
//! This crate provides a small set of functions aligning the type signatures between `async-std` and `tokio`,
//! so that the playback engine can be built generic to both runtimes.
//!
//! `runtime-tokio` is enabled by default. Disable default features to pick `runtime-async-std`.

#[cfg(all(feature = "runtime-async-std", feature = "runtime-tokio"))]
compile_error!("'runtime-async-std' and 'runtime-tokio' cannot be enabled at the same time");

pub mod file;
mod mutex;
mod sleep;
mod task;
mod timeout;

pub use mutex::*;
pub use sleep::*;
pub use task::*;
pub use timeout::*;

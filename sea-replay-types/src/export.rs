//! Re-exports of the crates that appear in the public API.

pub use async_trait::async_trait;
pub use futures;
pub use time;

#[cfg(feature = "runtime-tokio")]
pub use tokio::sync::Mutex as AsyncMutex;

#[cfg(feature = "runtime-async-std")]
pub use async_std::sync::Mutex as AsyncMutex;

/// Without a runtime there is no file to guard, but in-memory readers still need a lock.
#[cfg(not(any(feature = "runtime-tokio", feature = "runtime-async-std")))]
pub use futures::lock::Mutex as AsyncMutex;

use futures::future::Future;

#[cfg(feature = "runtime-tokio")]
pub use tokio::task::{JoinError, JoinHandle as TaskHandle};

#[cfg(feature = "runtime-tokio")]
pub fn spawn_task<F, T>(future: F) -> TaskHandle<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn(future)
}

#[cfg(feature = "runtime-async-std")]
pub type TaskHandle<T> =
    futures::future::Map<async_std::task::JoinHandle<T>, fn(T) -> Result<T, JoinError>>;

#[cfg(feature = "runtime-async-std")]
pub fn spawn_task<F, T>(future: F) -> TaskHandle<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    use futures::FutureExt;
    async_std::task::spawn(future).map(Result::Ok)
}

#[cfg(not(feature = "runtime-tokio"))]
#[derive(Debug)]
/// async-std propagates panics instead of reporting them; without a runtime nothing runs.
pub struct JoinError;

#[cfg(not(feature = "runtime-tokio"))]
impl std::fmt::Display for JoinError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "JoinError")
    }
}

#[cfg(not(feature = "runtime-tokio"))]
impl std::error::Error for JoinError {}

#[cfg(not(any(feature = "runtime-tokio", feature = "runtime-async-std")))]
pub type TaskHandle<T> = futures::future::Ready<Result<T, JoinError>>;

#[cfg(not(any(feature = "runtime-tokio", feature = "runtime-async-std")))]
pub fn spawn_task<F, T>(_: F) -> TaskHandle<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    futures::future::ready(Err(JoinError))
}


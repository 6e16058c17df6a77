use thiserror::Error;

/// Type alias of the [`Result`] type specific to `sea-replay`.
pub type ReplayResult<T, E> = std::result::Result<T, ReplayErr<E>>;

#[derive(Error, Debug)]
/// Common errors that may occur. Backend specific errors are wrapped in `Backend`.
pub enum ReplayErr<E: std::error::Error> {
    #[error("Operation aborted")]
    Aborted,
    #[error("Task Dead ({0})")]
    TaskDead(&'static str),
    #[error("Disconnected: {0}")]
    Disconnected(String),
    #[error("Contract violation: {0}")]
    Contract(String),
    #[error("Unsupported feature: {0}")]
    Unsupported(String),
    #[error("Backend error: {0}")]
    Backend(E),
    #[error("Runtime error: {0}")]
    Runtime(Box<dyn std::error::Error + Send + Sync>),
}

impl<E: std::error::Error> ReplayErr<E> {
    /// A lost connection that may recover by retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Disconnected(_))
    }

    /// Whether no further pulls should be issued after this error.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Aborted | Self::Disconnected(_))
    }

    /// Converts the backend error type, keeping every other variant.
    pub fn map_backend<F: std::error::Error, M: FnOnce(E) -> F>(self, m: M) -> ReplayErr<F> {
        match self {
            Self::Aborted => ReplayErr::Aborted,
            Self::TaskDead(s) => ReplayErr::TaskDead(s),
            Self::Disconnected(s) => ReplayErr::Disconnected(s),
            Self::Contract(s) => ReplayErr::Contract(s),
            Self::Unsupported(s) => ReplayErr::Unsupported(s),
            Self::Backend(e) => ReplayErr::Backend(m(e)),
            Self::Runtime(e) => ReplayErr::Runtime(e),
        }
    }
}

#[cfg(feature = "json")]
#[cfg_attr(docsrs, doc(cfg(feature = "json")))]
#[derive(Error, Debug)]
/// Errors that may happen when processing JSON
pub enum JsonErr {
    #[error("Utf8Error {0}")]
    Utf8Error(#[from] std::str::Utf8Error),
    #[error("serde_json::Error {0}")]
    SerdeJson(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// Errors that may happen when parsing a [`crate::Time`]
pub enum TimeErr {
    #[error("Empty time string")]
    Empty,
    #[error("Time out of range")]
    OutOfRange,
    #[error("Cannot parse time: {0}")]
    Parse(String),
}

/// Function to construct a [`ReplayErr::Runtime`] error variant.
pub fn runtime_error<T: std::error::Error, E: std::error::Error + Send + Sync + 'static>(
    e: E,
) -> ReplayErr<T> {
    ReplayErr::Runtime(Box::new(e))
}

use crate::{coordinator::CoordinatorErr, format::FormatErr};
use sea_replay_types::{ReplayErr, ReplayResult};
use std::{io::ErrorKind, str::Utf8Error};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SourceErr {
    #[error("Utf8Error: {0}")]
    Utf8Error(#[source] Utf8Error),
    #[error("IO Error: {0}")]
    IoError(#[source] std::io::Error),
    #[error("FormatErr: {0}")]
    FormatErr(#[source] FormatErr),
    #[error("CoordinatorErr: {0}")]
    CoordinatorErr(#[source] CoordinatorErr),
    #[error("Topic `{topic}` has schema `{expected}` in one source but `{found}` in another")]
    SchemaMismatch {
        topic: String,
        expected: String,
        found: String,
    },
    #[error("Unrecognized file format: {0}")]
    UnknownFormat(String),
    #[error("Source not initialized")]
    NotInitialized,
    #[error("Worker Dead")]
    WorkerDead,
    #[error("Not Enough Bytes: the file might be truncated.")]
    NotEnoughBytes,
}

pub type SourceResult<T> = ReplayResult<T, SourceErr>;

impl SourceErr {
    /// Errors that may go away by retrying the same read later.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::IoError(e) => matches!(
                e.kind(),
                ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::TimedOut
                    | ErrorKind::Interrupted
                    | ErrorKind::UnexpectedEof
            ),
            _ => false,
        }
    }

    /// Errors after which the source cannot make progress.
    pub fn is_fatal(&self) -> bool {
        !self.is_transient()
    }
}

/// Whether a failed pull may succeed if retried.
pub fn is_transient(err: &ReplayErr<SourceErr>) -> bool {
    match err {
        ReplayErr::Backend(e) => e.is_transient(),
        e => e.is_transient(),
    }
}

/// Whether a failed pull leaves the source unusable.
pub fn is_fatal(err: &ReplayErr<SourceErr>) -> bool {
    match err {
        ReplayErr::Backend(e) => e.is_fatal(),
        e => e.is_fatal(),
    }
}

pub(crate) fn io_err(e: std::io::Error) -> ReplayErr<SourceErr> {
    ReplayErr::Backend(SourceErr::IoError(e))
}

pub(crate) fn format_err(e: FormatErr) -> ReplayErr<SourceErr> {
    ReplayErr::Backend(SourceErr::FormatErr(e))
}

//! Decides which byte range of a remote file to fetch next.
//!
//! There is at most one connection in flight per resource. Given what has been downloaded,
//! what is being downloaded, and what the reader is waiting for, [`decide_next_range`]
//! tells the caller whether to (re)open a connection, and for which range.

use crate::range::{is_overlapping, is_range_covered_by_ranges, missing_ranges};
use sea_replay_types::Range;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
/// The caller broke the contract of [`decide_next_range`].
pub enum CoordinatorErr {
    #[error("Range {range} exceeds max request size {max_request_size} (file size {file_size})")]
    RequestTooLarge {
        range: Range,
        max_request_size: u64,
        file_size: u64,
    },
    #[error("Range {0} for the read request is fully downloaded; it should have been resolved")]
    AlreadyDownloaded(Range),
}

#[derive(Debug, Clone, Copy)]
pub struct ConnectionParams<'a> {
    /// What the current connection, if any, has yet to download.
    pub current_remaining: Option<Range>,
    /// The read request we are trying to satisfy.
    pub requested: Option<Range>,
    pub downloaded: &'a [Range],
    /// End of the last read request that was resolved; read-ahead continues from here.
    pub last_request_end: Option<u64>,
    /// The cache size. If `>= file_size`, the whole file will eventually be downloaded.
    pub max_request_size: u64,
    pub file_size: u64,
    /// How many bytes we are willing to wait for the current connection to reach
    /// the requested range before opening a new one.
    pub continue_threshold: u64,
}

/// Returns the range a new connection should fetch, or `None` to keep the current one
/// (or stay idle).
pub fn decide_next_range(params: ConnectionParams<'_>) -> Result<Option<Range>, CoordinatorErr> {
    match (params.requested, params.current_remaining) {
        (Some(requested), _) => with_read_request(requested, &params),
        (None, None) => Ok(without_connection(&params)),
        (None, Some(_)) => Ok(None),
    }
}

fn with_read_request(
    requested: Range,
    params: &ConnectionParams<'_>,
) -> Result<Option<Range>, CoordinatorErr> {
    if requested.len() > params.max_request_size {
        return Err(CoordinatorErr::RequestTooLarge {
            range: requested,
            max_request_size: params.max_request_size,
            file_size: params.file_size,
        });
    }

    let not_downloaded = missing_ranges(requested, params.downloaded);
    let first = match not_downloaded.first() {
        Some(first) => *first,
        None => return Err(CoordinatorErr::AlreadyDownloaded(requested)),
    };

    let start_new_connection = match params.current_remaining {
        None => true,
        Some(current) => {
            !is_overlapping(&not_downloaded, &[current])
                || current.start + params.continue_threshold < first.start
        }
    };
    if !start_new_connection {
        return Ok(None);
    }

    if params.max_request_size >= params.file_size {
        // fetch everything up to the next downloaded byte
        let range = Range::new(first.start, params.file_size.max(first.start));
        return Ok(missing_ranges(range, params.downloaded).into_iter().next());
    }

    if first.end == requested.end {
        // reading to the end of the request anyway: read ahead while we are at it
        let end = (requested.start + params.max_request_size).min(params.file_size);
        return Ok(Some(Range::new(first.start, end.max(first.end))));
    }

    Ok(Some(first))
}

fn without_connection(params: &ConnectionParams<'_>) -> Option<Range> {
    let read_ahead = if params.max_request_size >= params.file_size {
        // unlimited cache: read the whole file, starting near the last request
        let near = Range::new(
            params.last_request_end.unwrap_or(0).min(params.file_size),
            params.file_size,
        );
        if !is_range_covered_by_ranges(near, params.downloaded) {
            near
        } else {
            Range::new(0, params.file_size)
        }
    } else {
        let start = params.last_request_end?.min(params.file_size);
        Range::new(
            start,
            start
                .saturating_add(params.max_request_size)
                .min(params.file_size),
        )
    };
    missing_ranges(read_ahead, params.downloaded)
        .into_iter()
        .next()
}

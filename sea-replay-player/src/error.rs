use sea_replay_source::SourceErr;
use sea_replay_types::{ReplayErr, ReplayResult};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PlayerErr {
    #[error("SourceErr: {0}")]
    SourceErr(#[source] SourceErr),
    #[error("Invalid playback speed: {0}")]
    InvalidSpeed(f64),
    #[error("Player closed")]
    Closed,
}

pub type PlayerResult<T> = ReplayResult<T, PlayerErr>;

pub(crate) fn source_err(e: ReplayErr<SourceErr>) -> ReplayErr<PlayerErr> {
    e.map_backend(PlayerErr::SourceErr)
}

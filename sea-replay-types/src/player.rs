use std::collections::BTreeMap;

use crate::{MessageEvent, Problem, Time, Topic, TopicStats};

/// Alerts shown to consumers are the problems collected along the way.
pub type PlayerAlert = Problem;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Top-level connectivity / lifecycle status of a player.
pub enum PlayerPresence {
    #[default]
    NotPresent,
    Initializing,
    Present,
    Reconnecting,
    Error,
}

#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
/// An immutable snapshot of a player. Consumers derive everything they show from this.
/// It is always replaced wholesale, never mutated after being published.
pub struct PlayerState {
    pub name: Option<String>,
    pub presence: PlayerPresence,
    pub progress: Progress,
    pub alerts: Vec<PlayerAlert>,
    /// Absent until the source has been initialized.
    pub active_data: Option<ActiveData>,
}

#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Progress {
    /// Ranges of the recording, as fractions of `[start, end]`, that have been read.
    pub fully_loaded_fraction_ranges: Vec<(f64, f64)>,
}

#[derive(Debug, Default, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ActiveData {
    /// Messages delivered with this snapshot, non-decreasing in receive time.
    pub messages: Vec<MessageEvent>,
    pub start_time: Time,
    pub end_time: Time,
    pub current_time: Time,
    pub is_playing: bool,
    pub speed: f64,
    /// Incremented on every seek, so consumers can drop state derived before it.
    pub last_seek_time: u64,
    pub topics: Vec<Topic>,
    pub topic_stats: BTreeMap<String, TopicStats>,
    pub total_bytes_received: u64,
}

impl PlayerState {
    pub fn current_time(&self) -> Option<Time> {
        self.active_data.as_ref().map(|a| a.current_time)
    }

    pub fn is_playing(&self) -> bool {
        self.active_data.as_ref().map_or(false, |a| a.is_playing)
    }

    pub fn messages(&self) -> &[MessageEvent] {
        self.active_data
            .as_ref()
            .map_or(&[][..], |a| a.messages.as_slice())
    }
}

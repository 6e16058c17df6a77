use sea_replay_types::{Time, TopicSet};
use std::time::Duration;

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(16);
pub const DEFAULT_MAX_TICK: Duration = Duration::from_millis(300);
pub const DEFAULT_READ_AHEAD: usize = 1024;
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 5;
pub const DEFAULT_RECONNECT_BACKOFF: Duration = Duration::from_millis(200);
pub const DEFAULT_BEHIND_SCHEDULE: Duration = Duration::from_millis(500);
pub const DEFAULT_LISTENER_CAPACITY: usize = 1;
pub const DEFAULT_LISTENER_TIMEOUT: Duration = Duration::from_secs(10);
/// Older alerts are dropped beyond this many.
pub const MAX_ALERTS: usize = 100;

#[derive(Debug, Clone)]
pub struct PlayerOptions {
    name: Option<String>,
    speed: f64,
    tick_interval: Duration,
    max_tick: Duration,
    read_ahead: usize,
    autoplay: bool,
    start_time: Option<Time>,
    topics: Option<TopicSet>,
    reconnect_attempts: u32,
    reconnect_backoff: Duration,
    behind_schedule: Duration,
    listener_timeout: Duration,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            name: None,
            speed: 1.0,
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_tick: DEFAULT_MAX_TICK,
            read_ahead: DEFAULT_READ_AHEAD,
            autoplay: false,
            start_time: None,
            topics: None,
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_backoff: DEFAULT_RECONNECT_BACKOFF,
            behind_schedule: DEFAULT_BEHIND_SCHEDULE,
            listener_timeout: DEFAULT_LISTENER_TIMEOUT,
        }
    }
}

impl PlayerOptions {
    /// Shown in every snapshot, e.g. the file name.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
    pub fn set_name<S: Into<String>>(&mut self, v: S) -> &mut Self {
        self.name = Some(v.into());
        self
    }

    pub fn speed(&self) -> &f64 {
        &self.speed
    }
    /// Non-positive or non-finite speeds are ignored.
    pub fn set_speed(&mut self, v: f64) -> &mut Self {
        if v.is_finite() && v > 0.0 {
            self.speed = v;
        }
        self
    }

    pub fn tick_interval(&self) -> &Duration {
        &self.tick_interval
    }
    pub fn set_tick_interval(&mut self, v: Duration) -> &mut Self {
        self.tick_interval = v;
        self
    }

    /// Upper bound of the wall time a single tick accounts for. A stalled loop does not
    /// jump ahead by more than this (times speed).
    pub fn max_tick(&self) -> &Duration {
        &self.max_tick
    }
    pub fn set_max_tick(&mut self, v: Duration) -> &mut Self {
        self.max_tick = v;
        self
    }

    /// How many results the cursor reads ahead of playback. Only applies to sources
    /// running in a worker.
    pub fn read_ahead(&self) -> &usize {
        &self.read_ahead
    }
    pub fn set_read_ahead(&mut self, v: usize) -> &mut Self {
        self.read_ahead = v;
        self
    }

    /// Start playing as soon as the source is initialized.
    pub fn autoplay(&self) -> &bool {
        &self.autoplay
    }
    pub fn set_autoplay(&mut self, v: bool) -> &mut Self {
        self.autoplay = v;
        self
    }

    /// Where playback starts. Defaults to the start of the recording.
    pub fn start_time(&self) -> Option<&Time> {
        self.start_time.as_ref()
    }
    pub fn set_start_time(&mut self, v: Time) -> &mut Self {
        self.start_time = Some(v);
        self
    }

    /// The initial subscriptions. Defaults to every topic of the recording.
    pub fn topics(&self) -> Option<&TopicSet> {
        self.topics.as_ref()
    }
    pub fn set_topics(&mut self, v: TopicSet) -> &mut Self {
        self.topics = Some(v);
        self
    }

    pub fn reconnect_attempts(&self) -> &u32 {
        &self.reconnect_attempts
    }
    pub fn set_reconnect_attempts(&mut self, v: u32) -> &mut Self {
        self.reconnect_attempts = v;
        self
    }

    /// Base of the exponential backoff between reconnect attempts.
    pub fn reconnect_backoff(&self) -> &Duration {
        &self.reconnect_backoff
    }
    pub fn set_reconnect_backoff(&mut self, v: Duration) -> &mut Self {
        self.reconnect_backoff = v;
        self
    }

    /// A pull taking longer than this raises a "behind schedule" alert.
    pub fn behind_schedule(&self) -> &Duration {
        &self.behind_schedule
    }
    pub fn set_behind_schedule(&mut self, v: Duration) -> &mut Self {
        self.behind_schedule = v;
        self
    }

    /// A listener whose channel stays full for longer than this is unsubscribed.
    pub fn listener_timeout(&self) -> &Duration {
        &self.listener_timeout
    }
    pub fn set_listener_timeout(&mut self, v: Duration) -> &mut Self {
        self.listener_timeout = v;
        self
    }
}

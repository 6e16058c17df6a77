//! The playback loop. One task owns the source, the cursor and all mutable state; the
//! [`crate::Player`] handle talks to it through a command channel and reads the snapshots it
//! publishes.

use crate::{player::Command, PlayerOptions, MAX_ALERTS};
use flume::{Receiver, Sender};
use sea_replay_runtime::{sleep, sleep_until, AsyncMutex};
use sea_replay_source::{
    is_transient, IterableSource, MessageCursor, OrderGuard, SourceErr, SourceResult,
};
use sea_replay_types::{
    export::futures::{
        future::{select, Either},
        pin_mut,
    },
    AbortController, ActiveData, BackfillArgs, Initialization, IteratorResult, MessageEvent,
    MessageIteratorArgs, PlayerPresence, PlayerState, Problem, Progress, ReplayErr, Time,
    TopicSet,
};
use std::{
    collections::VecDeque,
    sync::Arc,
    time::{Duration, Instant},
};

const ONE_NANO: Duration = Duration::from_nanos(1);
/// A single tick never advances further than this, whatever the speed.
const MAX_ADVANCE_SECS: f64 = 1_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Initializing,
    Playing,
    Paused,
    Seeking,
    Reconnecting,
    Errored,
    Closed,
}

enum Wake {
    Command(Option<Command>),
    Tick,
}

enum Pull {
    Command(Option<Command>),
    Done(SourceResult<Option<Vec<IteratorResult>>>),
}

enum Backfill {
    Done(SourceResult<Vec<MessageEvent>>),
    Reseek(Time),
    Closed,
}

pub(crate) struct Playback {
    source: Box<dyn IterableSource>,
    options: PlayerOptions,
    commands: Receiver<Command>,
    deferred: VecDeque<Command>,
    listeners: Vec<Sender<Arc<PlayerState>>>,
    latest: Arc<AsyncMutex<Arc<PlayerState>>>,
    closing: Option<Sender<()>>,
    init: Option<Initialization>,
    status: Status,
    speed: f64,
    subscriptions: TopicSet,
    current_time: Time,
    /// Every subscribed message up to this time has been delivered.
    delivered_until: Option<Time>,
    play_until: Option<Time>,
    cursor: Option<Box<dyn MessageCursor>>,
    /// Where the current cursor was opened.
    reading_from: Time,
    abort: Option<AbortController>,
    guard: OrderGuard,
    last_tick: Option<Instant>,
    last_seek_time: u64,
    /// Read spans of the recording, sorted and disjoint.
    loaded: Vec<(Time, Time)>,
    alerts: Vec<Problem>,
    total_bytes: u64,
}

impl Playback {
    pub(crate) fn new(
        source: Box<dyn IterableSource>,
        options: PlayerOptions,
        commands: Receiver<Command>,
        latest: Arc<AsyncMutex<Arc<PlayerState>>>,
    ) -> Self {
        let speed = *options.speed();
        Self {
            source,
            options,
            commands,
            deferred: VecDeque::new(),
            listeners: Vec::new(),
            latest,
            closing: None,
            init: None,
            status: Status::Initializing,
            speed,
            subscriptions: TopicSet::new(),
            current_time: Time::ZERO,
            delivered_until: None,
            play_until: None,
            cursor: None,
            reading_from: Time::ZERO,
            abort: None,
            guard: OrderGuard::new(),
            last_tick: None,
            last_seek_time: 0,
            loaded: Vec::new(),
            alerts: Vec::new(),
            total_bytes: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        self.initialize().await;
        while self.status != Status::Closed {
            let wake = if let Some(command) = self.deferred.pop_front() {
                Wake::Command(Some(command))
            } else if self.status == Status::Playing {
                let deadline = self
                    .last_tick
                    .map_or_else(Instant::now, |t| t + *self.options.tick_interval());
                let recv = self.commands.recv_async();
                let tick = sleep_until(deadline);
                pin_mut!(recv, tick);
                match select(recv, tick).await {
                    Either::Left((command, _)) => Wake::Command(command.ok()),
                    Either::Right(_) => Wake::Tick,
                }
            } else {
                Wake::Command(self.commands.recv_async().await.ok())
            };
            match wake {
                Wake::Command(Some(command)) => self.handle(command).await,
                Wake::Command(None) => {
                    log::debug!("Every player handle dropped");
                    self.status = Status::Closed;
                }
                Wake::Tick => self.tick().await,
            }
        }
        self.shutdown().await;
        let closing = self.closing.take();
        // later commands must fail once close returns
        drop(self);
        if let Some(reply) = closing {
            reply.send(()).ok();
        }
    }

    async fn initialize(&mut self) {
        self.publish(Vec::new()).await;
        let init = match self.source.initialize().await {
            Ok(init) => init,
            Err(e) => return self.fail(e).await,
        };
        log::info!(
            "Initialized: {} topics, {} messages from {} to {}",
            init.topics.len(),
            init.num_messages(),
            init.start,
            init.end
        );
        for problem in init.problems.iter() {
            self.push_alert(problem.clone());
        }
        self.subscriptions = match self.options.topics() {
            Some(topics) => topics.clone(),
            None => init.topics.iter().map(|t| t.name.clone()).collect(),
        };
        let (start, end) = (init.start, init.end.max(init.start));
        let start_time = self
            .options
            .start_time()
            .map_or(start, |t| (*t).max(start).min(end));
        self.init = Some(init);
        self.status = Status::Paused;

        if start_time == start {
            self.current_time = start;
            self.open_cursor(start);
            self.publish(Vec::new()).await;
        } else {
            self.seek(start_time).await;
        }
        if *self.options.autoplay() && self.status == Status::Paused {
            self.play().await;
        }
    }

    async fn handle(&mut self, command: Command) {
        log::trace!("{command:?} while {:?}", self.status);
        match command {
            Command::Subscribe(listener) => {
                let state = self.latest.lock().await.clone();
                if listener.try_send(state).is_ok() {
                    self.listeners.push(listener);
                }
            }
            Command::Close(reply) => {
                self.closing = Some(reply);
                self.status = Status::Closed;
            }
            Command::SetSpeed(speed) => {
                self.speed = speed;
                self.publish(Vec::new()).await;
            }
            command if self.status == Status::Errored => {
                log::warn!("Ignoring {command:?}: the player has failed");
            }
            Command::Play => self.play().await,
            Command::Pause => self.pause().await,
            Command::Seek(time) => self.seek(time).await,
            Command::SetSubscriptions(topics) => {
                self.subscriptions = topics;
                // re-seek in place so that newly added topics are backfilled
                let time = self.current_time;
                self.seek(time).await;
            }
            Command::PlayUntil(time) => {
                self.play_until = Some(time);
                self.play().await;
            }
        }
    }

    fn bounds(&self) -> Option<(Time, Time)> {
        self.init
            .as_ref()
            .map(|i| (i.start, i.end.max(i.start)))
    }

    async fn play(&mut self) {
        let (start, end) = match self.bounds() {
            Some(bounds) => bounds,
            None => return,
        };
        if self.status == Status::Playing {
            return;
        }
        if self.current_time >= end {
            self.seek(start).await;
        }
        if self.status == Status::Paused {
            self.status = Status::Playing;
            self.last_tick = None;
            self.publish(Vec::new()).await;
        }
    }

    async fn pause(&mut self) {
        self.play_until = None;
        if self.status == Status::Playing {
            self.status = Status::Paused;
            self.last_tick = None;
            self.publish(Vec::new()).await;
        }
    }

    /// Advances the playhead by the wall time since the last tick, scaled by speed, and
    /// delivers everything up to it.
    async fn tick(&mut self) {
        let (_, end_time) = match self.bounds() {
            Some(bounds) => bounds,
            None => return,
        };
        let now = Instant::now();
        let elapsed = self
            .last_tick
            .map_or(Duration::ZERO, |t| now.saturating_duration_since(t))
            .min(*self.options.max_tick());
        self.last_tick = Some(now);
        let advance =
            Duration::from_secs_f64((elapsed.as_secs_f64() * self.speed).min(MAX_ADVANCE_SECS));
        let mut end = (self.current_time + advance).min(end_time);
        if let Some(until) = self.play_until {
            end = end.min(until.max(self.current_time));
        }
        if self.cursor.is_none() {
            let from = self.resume_from();
            self.open_cursor(from);
        }

        let started = Instant::now();
        let pull = match self.cursor.as_mut() {
            Some(cursor) => {
                let pull = cursor.read_until(end);
                let recv = self.commands.recv_async();
                pin_mut!(recv);
                match select(pull, recv).await {
                    Either::Left((result, _)) => Pull::Done(result),
                    Either::Right((command, _)) => Pull::Command(command.ok()),
                }
            }
            None => return,
        };

        match pull {
            Pull::Command(command) => {
                // the pull is dropped; the cursor keeps whatever it read for the next one
                self.last_tick = Some(now.checked_sub(elapsed).unwrap_or(now));
                match command {
                    Some(command) => self.handle(command).await,
                    None => self.status = Status::Closed,
                }
            }
            Pull::Done(Ok(batch)) => {
                let took = started.elapsed();
                if took > *self.options.behind_schedule() {
                    log::warn!("Pull took {took:?}; playback is behind schedule");
                    self.push_alert_once(
                        Problem::warn("Playback is behind schedule")
                            .with_tip("The source cannot keep up; try a lower speed"),
                    );
                }
                let messages = batch.map(|b| self.accept(b)).unwrap_or_default();
                self.current_time = end;
                self.delivered_until = Some(end);
                self.extend_loaded(end);
                if end >= end_time || self.play_until.map_or(false, |u| end >= u) {
                    log::debug!("Paused at {end}");
                    self.status = Status::Paused;
                    self.play_until = None;
                    self.last_tick = None;
                }
                self.publish(messages).await;
            }
            Pull::Done(Err(e)) => self.on_error(e).await,
        }
    }

    /// Keeps the subscribed messages of a batch, turning problems into alerts.
    fn accept(&mut self, batch: Vec<IteratorResult>) -> Vec<MessageEvent> {
        let mut messages = Vec::with_capacity(batch.len());
        for result in batch {
            match self.guard.check(result) {
                IteratorResult::MessageEvent(event) => {
                    if self.subscriptions.contains(&event.topic) {
                        self.total_bytes += event.size_in_bytes as u64;
                        messages.push(event);
                    }
                }
                IteratorResult::Problem(problem) => self.push_alert(problem),
                IteratorResult::Stamp(_) => (),
            }
        }
        messages
    }

    /// Jumps to `time`: backfills the subscribed topics, then reopens the cursor just after
    /// it. A seek arriving while backfilling supersedes it; other commands wait their turn.
    async fn seek(&mut self, time: Time) {
        let (start, end) = match self.bounds() {
            Some(bounds) => bounds,
            None => return,
        };
        let resume = if self.status == Status::Playing {
            Status::Playing
        } else {
            Status::Paused
        };
        let mut target = time;
        let result = loop {
            target = target.max(start).min(end);
            log::debug!("Seeking to {target}");
            self.status = Status::Seeking;
            self.close_cursor().await;
            self.last_seek_time += 1;
            self.current_time = target;
            self.delivered_until = None;
            self.guard = OrderGuard::new();
            self.last_tick = None;

            let mut controller = AbortController::new();
            let args = BackfillArgs {
                topics: self.subscriptions.clone(),
                time: target,
            };
            let mut backfill = self
                .source
                .get_backfill_messages(args, Some(controller.signal()));
            let outcome = loop {
                let recv = self.commands.recv_async();
                pin_mut!(recv);
                match select(&mut backfill, recv).await {
                    Either::Left((result, _)) => break Backfill::Done(result),
                    Either::Right((Ok(Command::Seek(time)), _)) => break Backfill::Reseek(time),
                    Either::Right((Ok(Command::Close(reply)), _)) => {
                        self.closing = Some(reply);
                        break Backfill::Closed;
                    }
                    Either::Right((Ok(command), _)) => self.deferred.push_back(command),
                    Either::Right((Err(_), _)) => break Backfill::Closed,
                }
            };
            drop(backfill);
            match outcome {
                Backfill::Done(result) => break result,
                Backfill::Reseek(time) => {
                    controller.abort();
                    target = time;
                }
                Backfill::Closed => {
                    controller.abort();
                    self.status = Status::Closed;
                    return;
                }
            }
        };

        self.status = resume;
        match result {
            Ok(messages) => {
                let messages: Vec<MessageEvent> = messages
                    .into_iter()
                    .filter(|m| self.subscriptions.contains(&m.topic))
                    .collect();
                self.total_bytes += messages
                    .iter()
                    .map(|m| m.size_in_bytes as u64)
                    .sum::<u64>();
                self.delivered_until = Some(target);
                self.open_cursor(target + ONE_NANO);
                self.publish(messages).await;
            }
            Err(e) => {
                // playback goes on from the target, without the backfill
                self.delivered_until = Some(target);
                self.on_error(e).await;
            }
        }
    }

    async fn on_error(&mut self, e: ReplayErr<SourceErr>) {
        if matches!(e, ReplayErr::Aborted) {
            log::debug!("Pull aborted");
        } else if is_transient(&e) {
            self.reconnect(e).await;
        } else {
            self.fail(e).await;
        }
    }

    /// Reopens the cursor where delivery left off, with jittered exponential backoff.
    async fn reconnect(&mut self, e: ReplayErr<SourceErr>) {
        let resume = if self.status == Status::Playing {
            Status::Playing
        } else {
            Status::Paused
        };
        log::warn!("Connection lost: {e}");
        self.push_alert(
            Problem::warn(format!("Connection lost: {e}")).with_tip("Reconnecting to the source"),
        );
        self.status = Status::Reconnecting;
        self.close_cursor().await;
        self.publish(Vec::new()).await;
        if self.status == Status::Closed {
            return;
        }

        let attempts = *self.options.reconnect_attempts();
        for attempt in 1..=attempts {
            if !self.wait(self.backoff(attempt)).await {
                return;
            }
            let from = self.resume_from();
            self.open_cursor(from);
            let until = self.current_time;
            let caught_up = match self.cursor.as_mut() {
                Some(cursor) => cursor.read_until(until).await,
                None => return,
            };
            match caught_up {
                Ok(batch) => {
                    log::info!("Reconnected after {attempt} attempt(s)");
                    let messages = batch.map(|b| self.accept(b)).unwrap_or_default();
                    self.delivered_until = Some(until);
                    self.status = resume;
                    self.last_tick = None;
                    self.publish(messages).await;
                    return;
                }
                Err(e) if is_transient(&e) => {
                    log::warn!("Reconnect attempt {attempt} of {attempts} failed: {e}");
                    self.close_cursor().await;
                }
                Err(e) => return self.fail(e).await,
            }
        }
        self.fail(ReplayErr::Disconnected(format!(
            "gave up after {attempts} reconnect attempts"
        )))
        .await;
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let base = *self.options.reconnect_backoff();
        let backoff = base.saturating_mul(1 << attempt.saturating_sub(1).min(16));
        let jitter = fastrand::u64(0..=backoff.as_millis() as u64 / 2);
        backoff.saturating_add(Duration::from_millis(jitter))
    }

    /// Sleeps, queueing the commands that arrive meanwhile. Returns false if the player got
    /// closed.
    async fn wait(&mut self, duration: Duration) -> bool {
        let timer = sleep(duration);
        pin_mut!(timer);
        loop {
            let recv = self.commands.recv_async();
            pin_mut!(recv);
            match select(&mut timer, recv).await {
                Either::Left(_) => return true,
                Either::Right((Ok(Command::Close(reply)), _)) => {
                    self.closing = Some(reply);
                    self.status = Status::Closed;
                    return false;
                }
                Either::Right((Ok(command), _)) => self.deferred.push_back(command),
                Either::Right((Err(_), _)) => {
                    self.status = Status::Closed;
                    return false;
                }
            }
        }
    }

    async fn fail(&mut self, e: ReplayErr<SourceErr>) {
        log::error!("Playback failed: {e}");
        self.close_cursor().await;
        self.push_alert(Problem::error(e.to_string()));
        self.status = Status::Errored;
        self.publish(Vec::new()).await;
    }

    fn resume_from(&self) -> Time {
        match self.delivered_until {
            Some(time) => time + ONE_NANO,
            None => self.current_time,
        }
    }

    fn open_cursor(&mut self, start: Time) {
        let controller = AbortController::new();
        let args = MessageIteratorArgs::new(self.subscriptions.clone()).start(start);
        self.cursor = Some(
            self.source
                .get_message_cursor(args, Some(controller.signal())),
        );
        self.abort = Some(controller);
        self.reading_from = start;
    }

    async fn close_cursor(&mut self) {
        if let Some(mut controller) = self.abort.take() {
            controller.abort();
        }
        if let Some(mut cursor) = self.cursor.take() {
            cursor.close().await;
        }
    }

    fn extend_loaded(&mut self, end: Time) {
        self.add_loaded((self.reading_from, end));
    }

    fn add_loaded(&mut self, span: (Time, Time)) {
        self.loaded.push(span);
        self.loaded.sort();
        let mut merged: Vec<(Time, Time)> = Vec::with_capacity(self.loaded.len());
        for (start, end) in self.loaded.drain(..) {
            match merged.last_mut() {
                Some(last) if start <= last.1 => last.1 = last.1.max(end),
                _ => merged.push((start, end)),
            }
        }
        self.loaded = merged;
    }

    fn push_alert(&mut self, problem: Problem) {
        log::debug!("Alert: {}", problem.message);
        if self.alerts.len() >= MAX_ALERTS {
            self.alerts.remove(0);
        }
        self.alerts.push(problem);
    }

    fn push_alert_once(&mut self, problem: Problem) {
        if !self.alerts.contains(&problem) {
            self.push_alert(problem);
        }
    }

    fn presence(&self) -> PlayerPresence {
        match self.status {
            Status::Initializing => PlayerPresence::Initializing,
            Status::Playing | Status::Paused | Status::Seeking => PlayerPresence::Present,
            Status::Reconnecting => PlayerPresence::Reconnecting,
            Status::Errored => PlayerPresence::Error,
            Status::Closed => PlayerPresence::NotPresent,
        }
    }

    fn snapshot(&self, messages: Vec<MessageEvent>) -> PlayerState {
        let active_data = self.init.as_ref().map(|init| {
            let end_time = init.end.max(init.start);
            ActiveData {
                messages,
                start_time: init.start,
                end_time,
                current_time: self.current_time,
                is_playing: self.status == Status::Playing,
                speed: self.speed,
                last_seek_time: self.last_seek_time,
                topics: init.topics.clone(),
                topic_stats: init.topic_stats.clone(),
                total_bytes_received: self.total_bytes,
            }
        });
        let progress = match self.bounds() {
            Some((start, end)) => Progress {
                fully_loaded_fraction_ranges: self
                    .loaded
                    .iter()
                    .filter(|(s, e)| s < e)
                    .map(|(s, e)| (s.fraction_of(start, end), e.fraction_of(start, end)))
                    .collect(),
            },
            None => Progress::default(),
        };
        PlayerState {
            name: self.options.name().map(|s| s.to_owned()),
            presence: self.presence(),
            progress,
            alerts: self.alerts.clone(),
            active_data,
        }
    }

    /// Replaces the latest snapshot and hands it to every listener, waiting for room.
    async fn publish(&mut self, messages: Vec<MessageEvent>) {
        let state = Arc::new(self.snapshot(messages));
        *self.latest.lock().await = state.clone();
        let mut alive = Vec::with_capacity(self.listeners.len());
        for listener in std::mem::take(&mut self.listeners) {
            // once closing, the rest only get the final snapshot
            if self.status == Status::Closed || self.deliver(&listener, state.clone()).await {
                alive.push(listener);
            }
        }
        self.listeners = alive;
    }

    /// Waits for room in one listener's channel, still taking commands meanwhile. Returns
    /// false if the listener is gone or stayed full past the listener timeout.
    async fn deliver(
        &mut self,
        listener: &Sender<Arc<PlayerState>>,
        state: Arc<PlayerState>,
    ) -> bool {
        let send = listener.send_async(state);
        let timer = sleep(*self.options.listener_timeout());
        pin_mut!(send, timer);
        loop {
            let recv = self.commands.recv_async();
            pin_mut!(recv);
            match select(select(&mut send, &mut timer), recv).await {
                Either::Left((Either::Left((sent, _)), _)) => return sent.is_ok(),
                Either::Left((Either::Right(_), _)) => {
                    log::warn!("Unsubscribing a listener that stopped reading");
                    return false;
                }
                Either::Right((Ok(Command::Close(reply)), _)) => {
                    self.closing = Some(reply);
                    self.status = Status::Closed;
                    return true;
                }
                Either::Right((Ok(command), _)) => self.deferred.push_back(command),
                Either::Right((Err(_), _)) => {
                    self.status = Status::Closed;
                    return true;
                }
            }
        }
    }

    async fn shutdown(&mut self) {
        self.close_cursor().await;
        self.status = Status::Closed;
        let state = Arc::new(self.snapshot(Vec::new()));
        *self.latest.lock().await = state.clone();
        for listener in self.listeners.drain(..) {
            listener.try_send(state.clone()).ok();
        }
        log::debug!("Player closed");
    }
}

use crate::{error::source_err, playback::Playback, PlayerErr, PlayerOptions, PlayerResult};
use flume::{bounded, unbounded, Receiver, Sender};
use sea_replay_runtime::{spawn_task, AsyncMutex};
use sea_replay_source::{open_source, IterableSource, MultiSource, WorkerSource};
use sea_replay_types::{PlayerState, ReplayErr, Time, TopicSet};
use std::{path::Path, sync::Arc};

#[derive(Debug, Clone)]
/// A handle to a playback loop. Commands are queued and handled in order; clones share the
/// same loop. The loop ends when the player is closed or every handle is dropped.
pub struct Player {
    sender: Sender<Command>,
    latest: Arc<AsyncMutex<Arc<PlayerState>>>,
}

#[derive(Debug)]
pub(crate) enum Command {
    Play,
    Pause,
    Seek(Time),
    SetSpeed(f64),
    SetSubscriptions(TopicSet),
    PlayUntil(Time),
    Subscribe(Sender<Arc<PlayerState>>),
    Close(Sender<()>),
}

impl Player {
    /// Spawns a playback loop over `source`. The source is initialized in the background;
    /// watch the presence of the published states to know when it is ready.
    pub fn new<S: IterableSource + 'static>(source: S, options: PlayerOptions) -> Self {
        Self::from_boxed(Box::new(source), options)
    }

    pub fn from_boxed(source: Box<dyn IterableSource>, options: PlayerOptions) -> Self {
        let (sender, receiver) = unbounded();
        let latest = Arc::new(AsyncMutex::new(Arc::new(PlayerState {
            name: options.name().map(|s| s.to_owned()),
            ..Default::default()
        })));
        let playback = Playback::new(source, options, receiver, latest.clone());
        let _handle = spawn_task(playback.run());
        Self { sender, latest }
    }

    /// Plays a local file, parsing it in a worker.
    pub async fn open(path: impl AsRef<Path>, options: PlayerOptions) -> PlayerResult<Self> {
        let source = open_source(path).await.map_err(source_err)?;
        let mut source = WorkerSource::new(source);
        source.set_read_ahead(*options.read_ahead());
        Ok(Self::new(source, options))
    }

    /// Plays several files of one recording as one, each parsed in its own worker.
    pub async fn open_all<I, P>(paths: I, options: PlayerOptions) -> PlayerResult<Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut sources: Vec<Box<dyn IterableSource>> = Vec::new();
        for path in paths {
            let source = open_source(path).await.map_err(source_err)?;
            sources.push(Box::new(WorkerSource::new(source)));
        }
        let mut source = WorkerSource::new(MultiSource::new(sources));
        source.set_read_ahead(*options.read_ahead());
        Ok(Self::new(source, options))
    }

    fn send(&self, command: Command) -> PlayerResult<()> {
        self.sender
            .send(command)
            .map_err(|_| ReplayErr::Backend(PlayerErr::Closed))
    }

    pub fn play(&self) -> PlayerResult<()> {
        self.send(Command::Play)
    }

    /// Whatever the in-flight pull has read is kept for the next play.
    pub fn pause(&self) -> PlayerResult<()> {
        self.send(Command::Pause)
    }

    /// Jumps to `time`, clamped to the recording. The latest message of every subscribed
    /// topic at or before `time` is delivered first, then playback continues from there.
    pub fn seek(&self, time: Time) -> PlayerResult<()> {
        self.send(Command::Seek(time))
    }

    pub fn set_speed(&self, speed: f64) -> PlayerResult<()> {
        if !speed.is_finite() || speed <= 0.0 {
            return Err(ReplayErr::Backend(PlayerErr::InvalidSpeed(speed)));
        }
        self.send(Command::SetSpeed(speed))
    }

    /// Changes the topics delivered. Newly added topics are backfilled at the current time.
    pub fn set_subscriptions(&self, topics: TopicSet) -> PlayerResult<()> {
        self.send(Command::SetSubscriptions(topics))
    }

    /// Plays, then pauses at `time`.
    pub fn play_until(&self, time: Time) -> PlayerResult<()> {
        self.send(Command::PlayUntil(time))
    }

    /// Every state published from now on, starting with the latest one. The playback loop
    /// waits for room in the channel, so a slow listener slows playback down; one that stays
    /// full past the listener timeout is unsubscribed. Drop the receiver to unsubscribe.
    pub fn subscribe(&self, capacity: usize) -> PlayerResult<Receiver<Arc<PlayerState>>> {
        let (sender, receiver) = bounded(capacity.max(1));
        self.send(Command::Subscribe(sender))?;
        Ok(receiver)
    }

    /// The latest published state.
    pub async fn state(&self) -> Arc<PlayerState> {
        self.latest.lock().await.clone()
    }

    /// Stops playback and waits for the loop to end. Listeners receive a last state with
    /// presence `NotPresent` if they have room for it.
    pub async fn close(&self) -> PlayerResult<()> {
        let (sender, receiver) = bounded(1);
        self.send(Command::Close(sender))?;
        receiver.recv_async().await.ok();
        Ok(())
    }
}

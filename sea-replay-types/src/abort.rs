use futures::{
    channel::oneshot,
    future::{pending, FutureExt, Shared},
};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// The sending half of a cancellation. Aborting is idempotent: the second call is a no-op.
#[derive(Debug)]
pub struct AbortController {
    sender: Option<oneshot::Sender<()>>,
    signal: AbortSignal,
}

/// The receiving half of a cancellation. It is cheap to clone and can be moved
/// into another task, so a pull running elsewhere observes the same abort.
#[derive(Clone)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
    receiver: Shared<oneshot::Receiver<()>>,
}

impl AbortController {
    pub fn new() -> Self {
        let (sender, receiver) = oneshot::channel();
        Self {
            sender: Some(sender),
            signal: AbortSignal {
                flag: Arc::new(AtomicBool::new(false)),
                receiver: receiver.shared(),
            },
        }
    }

    pub fn signal(&self) -> AbortSignal {
        self.signal.clone()
    }

    /// Returns true if this call is the one that aborted.
    pub fn abort(&mut self) -> bool {
        match self.sender.take() {
            Some(sender) => {
                // the flag must be visible before any waiter wakes up
                self.signal.flag.store(true, Ordering::SeqCst);
                sender.send(()).ok();
                true
            }
            None => false,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.signal.is_aborted()
    }
}

impl Default for AbortController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AbortSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AbortSignal")
            .field("aborted", &self.is_aborted())
            .finish()
    }
}

impl AbortSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let mut controller = AbortController::new();
        // dropping the sender without setting the flag leaves the signal pending forever
        controller.sender.take();
        controller.signal
    }

    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once aborted. If the controller is dropped without aborting,
    /// this never resolves.
    pub async fn aborted(&self) {
        if self.is_aborted() {
            return;
        }
        self.receiver.clone().await.ok();
        if !self.is_aborted() {
            pending::<()>().await;
        }
    }
}

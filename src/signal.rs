use tokio::sync::broadcast;

/// Room-level milestones emitted by timelines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineSignal {
    /// The first sync for a room has been applied.
    InitialSyncCompleted { room_id: String },
    /// A limited sync opened a gap; cached history was dropped.
    TimelineResynced { room_id: String },
}

/// Receiver side handed to subscribers.
pub type SignalStream = broadcast::Receiver<TimelineSignal>;

/// Broadcast channel carrying [`TimelineSignal`]s to whoever subscribes.
///
/// Cloning yields another sender on the same channel.
#[derive(Clone, Debug)]
pub struct SignalSender {
    tx: broadcast::Sender<TimelineSignal>,
}

impl SignalSender {
    /// Create a channel buffering up to `capacity` signals per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every signal emitted from now on.
    pub fn subscribe(&self) -> SignalStream {
        self.tx.subscribe()
    }

    /// Emit a signal to all subscribers.
    ///
    /// Best-effort: with no subscribers the signal is dropped.
    pub fn emit(&self, signal: TimelineSignal) {
        let _ = self.tx.send(signal);
    }
}

impl Default for SignalSender {
    fn default() -> Self {
        Self::new(64)
    }
}

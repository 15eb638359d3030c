use crate::event::{Direction, Event};
use crate::state::RoomState;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

/// Callback invoked for each event a timeline delivers.
///
/// Receives the event, the direction it arrived from, and the room state
/// in effect before the event was applied.
pub type EventCallback = dyn Fn(&Event, Direction, &RoomState) + Send + Sync;

/// Handle returned by [`ListenerRegistry::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Listener {
    id: ListenerId,
    types: Option<HashSet<String>>,
    callback: Arc<EventCallback>,
}

impl Listener {
    fn accepts(&self, event_type: &str) -> bool {
        self.types
            .as_ref()
            .is_none_or(|types| types.contains(event_type))
    }
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: Vec<Arc<Listener>>,
}

/// Ordered set of event listeners.
///
/// Cloning yields another handle to the same registry, so a callback can
/// hold one and unregister listeners while a delivery is in progress.
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    inner: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

impl ListenerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a callback for events whose type is in `types`, or for every
    /// event when `types` is `None`.
    pub fn register<F>(&self, types: Option<&[&str]>, callback: F) -> ListenerId
    where
        F: Fn(&Event, Direction, &RoomState) + Send + Sync + 'static,
    {
        let mut registry = self.inner.lock();
        let id = ListenerId(registry.next_id);
        registry.next_id += 1;
        registry.listeners.push(Arc::new(Listener {
            id,
            types: types.map(|types| types.iter().map(|t| t.to_string()).collect()),
            callback: Arc::new(callback),
        }));
        id
    }

    /// Remove a listener. Returns `false` if it was not registered.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let mut registry = self.inner.lock();
        let before = registry.listeners.len();
        registry.listeners.retain(|listener| listener.id != id);
        registry.listeners.len() != before
    }

    /// Remove every listener.
    pub fn clear(&self) {
        self.inner.lock().listeners.clear();
    }

    /// Number of registered listeners.
    pub fn len(&self) -> usize {
        self.inner.lock().listeners.len()
    }

    /// Whether no listener is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_registered(&self, id: ListenerId) -> bool {
        self.inner
            .lock()
            .listeners
            .iter()
            .any(|listener| listener.id == id)
    }

    /// Deliver `event` to every matching listener, in registration order.
    ///
    /// The listener list is captured before the first callback runs.
    /// Listeners registered during delivery do not see this event; listeners
    /// removed during delivery are skipped if their turn has not come yet.
    /// The lock is never held while a callback runs.
    pub fn notify(&self, event: &Event, direction: Direction, state_before: &RoomState) {
        let captured: Vec<Arc<Listener>> = self.inner.lock().listeners.clone();
        for listener in captured {
            if !listener.accepts(&event.event_type) || !self.is_registered(listener.id) {
                continue;
            }
            (listener.callback)(event, direction, state_before);
        }
    }
}

//! Room state snapshots.

use crate::event::{Event, MEMBER_TYPE};
use log::trace;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Membership of a user in a room, read from `m.room.member` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Membership {
    Invite,
    Join,
    Leave,
    Ban,
    Knock,
    /// No membership state is known for the user.
    Unknown,
}

impl Membership {
    fn parse(value: &str) -> Self {
        match value {
            "invite" => Membership::Invite,
            "join" => Membership::Join,
            "leave" => Membership::Leave,
            "ban" => Membership::Ban,
            "knock" => Membership::Knock,
            _ => Membership::Unknown,
        }
    }
}

/// The state of a room at one point in its event stream.
///
/// Maps `(event type, state key)` to the event that established that state.
/// There is never more than one entry per pair.
///
/// Entries are reference counted, so [`Clone`] is shallow: cloning a
/// snapshot copies the key map, never the events. A timeline clones before
/// each mutation and keeps the clone around as "the state before", which
/// makes that lookup free.
///
/// # Examples
///
/// ```
/// use roomfold::{Event, Membership, RoomState};
/// use serde_json::json;
///
/// let mut state = RoomState::new();
/// state.apply(&Event::new("m.room.member", "@alice:example.org", json!({"membership": "join"}))
///     .with_id("$j")
///     .with_state_key("@alice:example.org"));
///
/// let before = state.clone();
/// state.apply(&Event::new("m.room.member", "@alice:example.org", json!({"membership": "leave"}))
///     .with_id("$l")
///     .with_state_key("@alice:example.org"));
///
/// assert_eq!(before.membership("@alice:example.org"), Membership::Join);
/// assert_eq!(state.membership("@alice:example.org"), Membership::Leave);
/// assert_eq!(state.len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct RoomState {
    entries: HashMap<(String, String), Arc<Event>>,
}

impl RoomState {
    /// Create an empty snapshot.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a snapshot by applying `events` forwards, in order.
    pub fn from_events<'a>(events: impl IntoIterator<Item = &'a Event>) -> Self {
        let mut state = RoomState::new();
        for event in events {
            state.apply(event);
        }
        state
    }

    /// Apply a state event moving forwards in the stream.
    ///
    /// Non-state events are ignored. Returns whether the snapshot changed.
    pub fn apply(&mut self, event: &Event) -> bool {
        let Some((event_type, state_key)) = event.state_pair() else {
            return false;
        };
        trace!("state {event_type}/{state_key} <- {}", event.event_id);
        self.entries.insert(
            (event_type.to_string(), state_key.to_string()),
            Arc::new(event.clone()),
        );
        true
    }

    /// Apply a state event moving backwards in the stream.
    ///
    /// Restores the state the event replaced: the entry takes the event's
    /// `prev_content`, or disappears when there was no previous state.
    pub fn apply_backward(&mut self, event: &Event) -> bool {
        let Some((event_type, state_key)) = event.state_pair() else {
            return false;
        };
        let key = (event_type.to_string(), state_key.to_string());
        match event.prev_content() {
            Some(prev) => {
                trace!("state {event_type}/{state_key} rewound by {}", event.event_id);
                let mut earlier = event.clone();
                earlier.content = prev.clone();
                earlier.prev_content = None;
                if let Some(Value::Object(unsigned)) = earlier.unsigned.as_mut() {
                    unsigned.remove("prev_content");
                }
                self.entries.insert(key, Arc::new(earlier));
            }
            None => {
                trace!("state {event_type}/{state_key} removed by {}", event.event_id);
                self.entries.remove(&key);
            }
        }
        true
    }

    /// The event holding `(event_type, state_key)`, if any.
    pub fn get(&self, event_type: &str, state_key: &str) -> Option<&Event> {
        self.entries
            .get(&(event_type.to_string(), state_key.to_string()))
            .map(Arc::as_ref)
    }

    /// Membership of `user_id`, or [`Membership::Unknown`] without member state.
    pub fn membership(&self, user_id: &str) -> Membership {
        self.get(MEMBER_TYPE, user_id)
            .and_then(|event| event.content.get("membership"))
            .and_then(|m| m.as_str())
            .map(Membership::parse)
            .unwrap_or(Membership::Unknown)
    }

    /// Room name from `m.room.name`, if set.
    pub fn name(&self) -> Option<&str> {
        self.get("m.room.name", "")
            .and_then(|event| event.content.get("name"))
            .and_then(|name| name.as_str())
    }

    /// Room topic from `m.room.topic`, if set.
    pub fn topic(&self) -> Option<&str> {
        self.get("m.room.topic", "")
            .and_then(|event| event.content.get("topic"))
            .and_then(|topic| topic.as_str())
    }

    /// User ids whose membership is `join`, sorted.
    pub fn members(&self) -> Vec<&str> {
        let mut members: Vec<&str> = self
            .entries
            .iter()
            .filter(|((event_type, _), _)| event_type == MEMBER_TYPE)
            .filter(|((_, user_id), _)| self.membership(user_id) == Membership::Join)
            .map(|((_, user_id), _)| user_id.as_str())
            .collect();
        members.sort_unstable();
        members
    }

    /// All state events, ordered by `(type, state_key)`.
    pub fn state_events(&self) -> Vec<Event> {
        let mut keys: Vec<&(String, String)> = self.entries.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|key| self.entries[key].as_ref().clone())
            .collect()
    }

    /// Number of `(type, state_key)` entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the snapshot holds no state.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

//! Inbound payloads, already parsed by the sync layer.

use crate::event::Event;
use serde::{Deserialize, Serialize};

/// A batch of state events.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateSync {
    #[serde(default)]
    pub events: Vec<Event>,
}

/// The timeline part of a joined room's sync.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimelineSync {
    #[serde(default)]
    pub events: Vec<Event>,

    /// `true` when the server left out events between the previous sync and
    /// this one.
    #[serde(default)]
    pub limited: bool,

    /// Token for paginating backwards from the first event of `events`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_batch: Option<String>,
}

/// Incremental sync for a room the user has joined.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JoinedRoomSync {
    #[serde(default)]
    pub state: StateSync,
    #[serde(default)]
    pub timeline: TimelineSync,
}

/// Sync for a room the user is invited to. Usually stripped state only.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvitedRoomSync {
    #[serde(default)]
    pub invite_state: StateSync,
}

/// One page of message history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationResponse {
    #[serde(default)]
    pub chunk: Vec<Event>,
    pub start: String,
    /// Absent when the server has nothing further in this direction.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
}

impl PaginationResponse {
    /// Whether this page signals the end of history in its direction.
    pub fn is_end(&self) -> bool {
        self.chunk.is_empty() && self.end.as_deref().is_none_or(|end| end == self.start)
    }
}

/// Events around a given event, with the room state at that event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventContext {
    #[serde(default)]
    pub state: Vec<Event>,
    pub event: Event,
    /// Closest first.
    #[serde(default)]
    pub events_before: Vec<Event>,
    /// Closest first.
    #[serde(default)]
    pub events_after: Vec<Event>,
    pub start: String,
    pub end: String,
}

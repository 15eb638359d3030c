//! The persistence port consumed by timelines.
//!
//! A [`Store`] keeps, per room: the message events seen so far (in
//! chronological order), the latest room state snapshot, the back
//! pagination token, the "server pagination end reached" flag and read
//! receipts. [`MemoryStore`] backs historical timelines and tests;
//! [`FileStore`] is a durable store for live rooms.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use crate::error::StoreError;
use crate::event::{Direction, Event};
use serde::{Deserialize, Serialize};

/// Where a message history request starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaginationFrom {
    /// No token yet: start from the most recent end of the room.
    Start,
    /// Continue from a server-issued pagination token.
    Token(String),
}

impl PaginationFrom {
    /// `Start` when there is no token yet.
    pub fn from_token(token: Option<String>) -> Self {
        token.map_or(PaginationFrom::Start, PaginationFrom::Token)
    }

    /// The server token, if any.
    pub fn token(&self) -> Option<&str> {
        match self {
            PaginationFrom::Start => None,
            PaginationFrom::Token(token) => Some(token),
        }
    }
}

/// A read receipt: `user_id` has read up to `event_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiptData {
    pub user_id: String,
    pub event_id: String,
    /// Milliseconds since the Unix epoch.
    pub ts: u64,
}

/// Per-room persistence used by [`EventTimeline`](crate::EventTimeline).
///
/// Methods take `&self`: a live room's store is shared with the rest of the
/// session, and implementations lock internally. Only the room's timeline
/// writes; other holders read.
///
/// Back pagination from the store works with a cursor. [`reset_pagination`]
/// places it at the most recent cached message; each call to
/// [`next_messages_for_pagination`] hands out the next older batch.
///
/// [`reset_pagination`]: Store::reset_pagination
/// [`next_messages_for_pagination`]: Store::next_messages_for_pagination
pub trait Store: Send + Sync {
    /// Whether a message with this id is cached for the room.
    fn event_exists(&self, room_id: &str, event_id: &str) -> Result<bool, StoreError>;

    /// Cache a message event. Forwards appends after the newest message,
    /// backwards inserts before the oldest.
    fn store_event(&self, room_id: &str, event: &Event, direction: Direction)
    -> Result<(), StoreError>;

    /// A cached message by id.
    fn event(&self, room_id: &str, event_id: &str) -> Result<Option<Event>, StoreError>;

    /// Overwrite a cached event in place, matching on its id. No-op when the
    /// event is not cached.
    fn replace_event(&self, room_id: &str, event: &Event) -> Result<(), StoreError>;

    /// Cached messages in chronological order.
    fn messages(&self, room_id: &str) -> Result<Vec<Event>, StoreError>;

    /// Replace the stored state snapshot. Only the latest one is kept.
    fn store_state(&self, room_id: &str, state: &[Event]) -> Result<(), StoreError>;

    /// The latest stored state snapshot.
    fn state(&self, room_id: &str) -> Result<Option<Vec<Event>>, StoreError>;

    /// Replace the back pagination token.
    fn store_pagination_token(&self, room_id: &str, token: Option<String>)
    -> Result<(), StoreError>;

    /// The back pagination token, `None` before the first one arrives.
    fn pagination_token(&self, room_id: &str) -> Result<Option<String>, StoreError>;

    /// Move the store pagination cursor back to the most recent message.
    fn reset_pagination(&self, room_id: &str) -> Result<(), StoreError>;

    /// Hand out up to `count` messages older than the cursor, most recent
    /// first, and move the cursor past them.
    fn next_messages_for_pagination(
        &self,
        room_id: &str,
        count: usize,
    ) -> Result<Vec<Event>, StoreError>;

    /// How many cached messages are still older than the cursor.
    fn remaining_messages_for_pagination(&self, room_id: &str) -> Result<usize, StoreError>;

    /// Whether the server has no history older than what is cached.
    fn has_reached_server_pagination_end(&self, room_id: &str) -> Result<bool, StoreError>;

    /// Record whether the server end of history has been reached.
    fn set_reached_server_pagination_end(
        &self,
        room_id: &str,
        reached: bool,
    ) -> Result<(), StoreError>;

    /// Drop the room's cached messages. State, token and receipts stay.
    fn delete_all_messages(&self, room_id: &str) -> Result<(), StoreError>;

    /// Drop a single room entirely.
    fn delete_room(&self, room_id: &str) -> Result<(), StoreError>;

    /// Drop every room.
    fn delete_all_data(&self) -> Result<(), StoreError>;

    /// Record a receipt. Returns `false` if the user already has a receipt
    /// at least as recent.
    fn store_receipt(&self, room_id: &str, receipt: &ReceiptData) -> Result<bool, StoreError>;

    /// The latest receipt of `user_id`.
    fn receipt(&self, room_id: &str, user_id: &str) -> Result<Option<ReceiptData>, StoreError>;

    /// Flush buffered writes as one unit. Stores that write through do
    /// nothing.
    fn commit(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

use super::{ReceiptData, Store};
use crate::error::StoreError;
use crate::event::{Direction, Event};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// Everything a store keeps for one room.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct RoomData {
    messages: VecDeque<Event>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    state: Option<Vec<Event>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pagination_token: Option<String>,
    #[serde(default)]
    reached_pagination_end: bool,
    #[serde(default)]
    receipts: BTreeMap<String, ReceiptData>,
    /// `messages[..pagination_cursor]` have not been handed out yet. Session
    /// local: a reopened store starts with nothing to hand out until reset.
    #[serde(skip)]
    pagination_cursor: usize,
    /// Ids of `messages`, for constant-time duplicate checks. Rebuilt by
    /// [`RoomData::reindex`] after loading.
    #[serde(skip)]
    ids: HashSet<String>,
}

impl RoomData {
    fn reindex(&mut self) {
        self.ids = self.messages.iter().map(|e| e.event_id.clone()).collect();
    }

    fn contains(&self, event_id: &str) -> bool {
        self.ids.contains(event_id)
    }

    fn position(&self, event_id: &str) -> Option<usize> {
        self.messages.iter().rposition(|e| e.event_id == event_id)
    }

    fn store_event(&mut self, event: &Event, direction: Direction) {
        self.ids.insert(event.event_id.clone());
        match direction {
            Direction::Forwards => self.messages.push_back(event.clone()),
            Direction::Backwards => {
                self.messages.push_front(event.clone());
                // Keep the not-yet-handed-out range contiguous. Once the
                // cursor is at zero, backward inserts were delivered by the
                // caller already and stay outside it.
                if self.pagination_cursor > 0 {
                    self.pagination_cursor += 1;
                }
            }
        }
    }

    fn replace_event(&mut self, event: &Event) {
        if !self.contains(&event.event_id) {
            return;
        }
        if let Some(pos) = self.position(&event.event_id) {
            self.messages[pos] = event.clone();
        }
    }

    fn next_messages(&mut self, count: usize) -> Vec<Event> {
        let n = count.min(self.pagination_cursor);
        let end = self.pagination_cursor;
        self.pagination_cursor -= n;
        self.messages
            .range(end - n..end)
            .rev()
            .cloned()
            .collect()
    }

    fn delete_messages(&mut self) {
        self.messages.clear();
        self.ids.clear();
        self.pagination_cursor = 0;
    }

    fn store_receipt(&mut self, receipt: &ReceiptData) -> bool {
        if let Some(existing) = self.receipts.get(&receipt.user_id) {
            if existing.event_id == receipt.event_id || existing.ts > receipt.ts {
                return false;
            }
        }
        self.receipts
            .insert(receipt.user_id.clone(), receipt.clone());
        true
    }
}

/// An in-memory [`Store`].
///
/// Historical timelines allocate a private one that disappears with them.
///
/// # Examples
///
/// ```
/// use roomfold::{Direction, Event, MemoryStore, Store};
/// use serde_json::json;
///
/// let store = MemoryStore::new();
/// let event = Event::new("m.room.message", "@alice:example.org", json!({"body": "hi"}))
///     .with_id("$1");
/// store.store_event("!room:example.org", &event, Direction::Forwards).unwrap();
/// assert!(store.event_exists("!room:example.org", "$1").unwrap());
/// ```
#[derive(Debug, Default)]
pub struct MemoryStore {
    rooms: Mutex<HashMap<String, RoomData>>,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids of the rooms holding any data, sorted.
    pub fn room_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.rooms.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub(crate) fn from_rooms(mut rooms: HashMap<String, RoomData>) -> Self {
        for room in rooms.values_mut() {
            room.reindex();
        }
        MemoryStore {
            rooms: Mutex::new(rooms),
        }
    }

    pub(crate) fn room_data(&self, room_id: &str) -> Option<RoomData> {
        self.rooms.lock().get(room_id).cloned()
    }

    fn read<T>(&self, room_id: &str, f: impl FnOnce(&RoomData) -> T) -> T
    where
        T: Default,
    {
        self.rooms.lock().get(room_id).map(f).unwrap_or_default()
    }

    fn write<T>(&self, room_id: &str, f: impl FnOnce(&mut RoomData) -> T) -> T {
        let mut rooms = self.rooms.lock();
        f(rooms.entry(room_id.to_string()).or_default())
    }
}

impl Store for MemoryStore {
    fn event_exists(&self, room_id: &str, event_id: &str) -> Result<bool, StoreError> {
        Ok(self.read(room_id, |room| room.contains(event_id)))
    }

    fn store_event(
        &self,
        room_id: &str,
        event: &Event,
        direction: Direction,
    ) -> Result<(), StoreError> {
        self.write(room_id, |room| room.store_event(event, direction));
        Ok(())
    }

    fn event(&self, room_id: &str, event_id: &str) -> Result<Option<Event>, StoreError> {
        Ok(self.read(room_id, |room| {
            if !room.contains(event_id) {
                return None;
            }
            room.position(event_id).map(|pos| room.messages[pos].clone())
        }))
    }

    fn replace_event(&self, room_id: &str, event: &Event) -> Result<(), StoreError> {
        self.write(room_id, |room| room.replace_event(event));
        Ok(())
    }

    fn messages(&self, room_id: &str) -> Result<Vec<Event>, StoreError> {
        Ok(self.read(room_id, |room| room.messages.iter().cloned().collect()))
    }

    fn store_state(&self, room_id: &str, state: &[Event]) -> Result<(), StoreError> {
        self.write(room_id, |room| room.state = Some(state.to_vec()));
        Ok(())
    }

    fn state(&self, room_id: &str) -> Result<Option<Vec<Event>>, StoreError> {
        Ok(self.read(room_id, |room| room.state.clone()))
    }

    fn store_pagination_token(
        &self,
        room_id: &str,
        token: Option<String>,
    ) -> Result<(), StoreError> {
        self.write(room_id, |room| room.pagination_token = token);
        Ok(())
    }

    fn pagination_token(&self, room_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self.read(room_id, |room| room.pagination_token.clone()))
    }

    fn reset_pagination(&self, room_id: &str) -> Result<(), StoreError> {
        self.write(room_id, |room| room.pagination_cursor = room.messages.len());
        Ok(())
    }

    fn next_messages_for_pagination(
        &self,
        room_id: &str,
        count: usize,
    ) -> Result<Vec<Event>, StoreError> {
        Ok(self.write(room_id, |room| room.next_messages(count)))
    }

    fn remaining_messages_for_pagination(&self, room_id: &str) -> Result<usize, StoreError> {
        Ok(self.read(room_id, |room| room.pagination_cursor))
    }

    fn has_reached_server_pagination_end(&self, room_id: &str) -> Result<bool, StoreError> {
        Ok(self.read(room_id, |room| room.reached_pagination_end))
    }

    fn set_reached_server_pagination_end(
        &self,
        room_id: &str,
        reached: bool,
    ) -> Result<(), StoreError> {
        self.write(room_id, |room| room.reached_pagination_end = reached);
        Ok(())
    }

    fn delete_all_messages(&self, room_id: &str) -> Result<(), StoreError> {
        self.write(room_id, RoomData::delete_messages);
        Ok(())
    }

    fn delete_room(&self, room_id: &str) -> Result<(), StoreError> {
        self.rooms.lock().remove(room_id);
        Ok(())
    }

    fn delete_all_data(&self) -> Result<(), StoreError> {
        self.rooms.lock().clear();
        Ok(())
    }

    fn store_receipt(&self, room_id: &str, receipt: &ReceiptData) -> Result<bool, StoreError> {
        Ok(self.write(room_id, |room| room.store_receipt(receipt)))
    }

    fn receipt(&self, room_id: &str, user_id: &str) -> Result<Option<ReceiptData>, StoreError> {
        Ok(self.read(room_id, |room| room.receipts.get(user_id).cloned()))
    }
}

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use roomfold::{
    Direction, Event, EventContext, EventTimeline, MemoryStore, MessagesRequest,
    PaginationResponse, Store, Transport, TransportError,
};
use serde_json::json;
use std::collections::VecDeque;
use std::sync::Arc;

pub const ROOM: &str = "!room:example.org";
pub const ME: &str = "@me:example.org";
pub const ALICE: &str = "@alice:example.org";

pub fn message(id: &str, sender: &str, body: &str) -> Event {
    Event::new("m.room.message", sender, json!({"msgtype": "m.text", "body": body}))
        .with_id(id)
        .in_room(ROOM)
        .with_ts(1_700_000_000_000)
}

pub fn room_name(id: &str, name: &str) -> Event {
    Event::new("m.room.name", ALICE, json!({"name": name}))
        .with_id(id)
        .in_room(ROOM)
        .with_state_key("")
}

pub fn member(id: &str, user: &str, membership: &str) -> Event {
    Event::new("m.room.member", user, json!({"membership": membership}))
        .with_id(id)
        .in_room(ROOM)
        .with_state_key(user)
}

pub fn redaction(id: &str, target: &str, reason: &str) -> Event {
    Event::new("m.room.redaction", ALICE, json!({"reason": reason}))
        .with_id(id)
        .in_room(ROOM)
        .with_redacts(target)
}

pub fn messages(prefix: &str, n: usize) -> Vec<Event> {
    (0..n)
        .map(|i| message(&format!("${prefix}{i}"), ALICE, &format!("{prefix} {i}")))
        .collect()
}

pub fn page(chunk: Vec<Event>, start: &str, end: Option<&str>) -> PaginationResponse {
    PaginationResponse {
        chunk,
        start: start.to_string(),
        end: end.map(str::to_string),
    }
}

/// Transport answering from scripted responses and recording requests.
#[derive(Default)]
pub struct MockTransport {
    pages: Mutex<VecDeque<Result<PaginationResponse, TransportError>>>,
    context: Mutex<Option<Result<EventContext, TransportError>>>,
    pub requests: Mutex<Vec<MessagesRequest>>,
    /// Never resolve requests; for cancellation tests.
    pub hang: bool,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn hanging() -> Arc<Self> {
        Arc::new(Self {
            hang: true,
            ..Self::default()
        })
    }

    pub fn push_page(&self, response: Result<PaginationResponse, TransportError>) {
        self.pages.lock().push_back(response);
    }

    pub fn set_context(&self, context: Result<EventContext, TransportError>) {
        *self.context.lock() = Some(context);
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn context_of_event(
        &self,
        _room_id: &str,
        _event_id: &str,
        _limit: usize,
    ) -> Result<EventContext, TransportError> {
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.context
            .lock()
            .take()
            .unwrap_or_else(|| Err(TransportError::Network("no context scripted".into())))
    }

    async fn messages(
        &self,
        request: MessagesRequest,
    ) -> Result<PaginationResponse, TransportError> {
        self.requests.lock().push(request);
        if self.hang {
            std::future::pending::<()>().await;
        }
        self.pages
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Network("no page scripted".into())))
    }
}

pub fn live_timeline(transport: Arc<MockTransport>) -> (EventTimeline, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let timeline = EventTimeline::builder(ROOM, ME, transport)
        .store(store.clone() as Arc<dyn Store>)
        .build()
        .unwrap();
    (timeline, store)
}

/// Seen events as `(event_id, direction)`.
pub type Seen = Arc<Mutex<Vec<(String, Direction)>>>;

pub fn record(timeline: &EventTimeline) -> Seen {
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    timeline.add_listener(None, move |event, direction, _| {
        sink.lock().push((event.event_id.clone(), direction));
    });
    seen
}

/// Seen events with the room name in the state handed to listeners.
pub type SeenNames = Arc<Mutex<Vec<(String, Option<String>)>>>;

pub fn record_names(timeline: &EventTimeline) -> SeenNames {
    let seen: SeenNames = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    timeline.add_listener(None, move |event, _, state| {
        sink.lock()
            .push((event.event_id.clone(), state.name().map(str::to_string)));
    });
    seen
}

pub fn ids(seen: &Seen) -> Vec<String> {
    seen.lock().iter().map(|(id, _)| id.clone()).collect()
}

//! The timeline: where sync pushes and pagination pages become room state
//! and listener notifications.

use crate::error::{StoreError, TimelineError};
use crate::event::{Direction, Event};
use crate::listener::{ListenerId, ListenerRegistry};
use crate::signal::{SignalSender, TimelineSignal};
use crate::state::{Membership, RoomState};
use crate::store::{MemoryStore, PaginationFrom, ReceiptData, Store};
use crate::sync::{InvitedRoomSync, JoinedRoomSync, PaginationResponse};
use crate::transport::{MessagesRequest, Transport};
use log::{debug, trace, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Builder for [`EventTimeline`].
///
/// A timeline is either *live*, tracking the present of a room through
/// sync and sharing the room's store, or *historical*, anchored on one
/// event with a private in-memory store.
///
/// # Examples
///
/// ```no_run
/// # use std::sync::Arc;
/// # use roomfold::{EventTimeline, MemoryStore, Store, Transport};
/// # fn demo(transport: Arc<dyn Transport>) -> Result<(), roomfold::StoreError> {
/// let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
///
/// let live = EventTimeline::builder("!room:example.org", "@me:example.org", transport.clone())
///     .store(store)
///     .build()?;
///
/// let historical = EventTimeline::builder("!room:example.org", "@me:example.org", transport)
///     .initial_event("$anchor")
///     .build()?;
/// # Ok(())
/// # }
/// ```
pub struct TimelineBuilder {
    room_id: String,
    user_id: String,
    transport: Arc<dyn Transport>,
    store: Option<Arc<dyn Store>>,
    initial_event_id: Option<String>,
    signals: Option<SignalSender>,
}

impl TimelineBuilder {
    /// Use the room's shared store. Makes the timeline live.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Anchor the timeline on `event_id`. Makes the timeline historical.
    pub fn initial_event(mut self, event_id: impl Into<String>) -> Self {
        self.initial_event_id = Some(event_id.into());
        self
    }

    /// Emit room milestones on `signals`.
    pub fn signals(mut self, signals: SignalSender) -> Self {
        self.signals = Some(signals);
        self
    }

    /// Build the timeline. A live timeline starts from the state snapshot
    /// the store holds for the room.
    ///
    /// # Panics
    ///
    /// Panics if both or neither of [`store`](Self::store) and
    /// [`initial_event`](Self::initial_event) were given.
    pub fn build(self) -> Result<EventTimeline, StoreError> {
        let store: Arc<dyn Store> = match (self.store, &self.initial_event_id) {
            (Some(store), None) => store,
            (None, Some(_)) => Arc::new(MemoryStore::new()),
            (Some(_), Some(_)) => {
                panic!("a historical timeline owns its store; do not pass one")
            }
            (None, None) => panic!("a live timeline needs the room's store"),
        };

        let state = match &self.initial_event_id {
            None => RoomState::from_events(&store.state(&self.room_id)?.unwrap_or_default()),
            Some(_) => RoomState::new(),
        };

        Ok(EventTimeline {
            room_id: self.room_id,
            user_id: self.user_id,
            initial_event_id: self.initial_event_id,
            previous_state: state.clone(),
            state,
            back_state: None,
            forward_token: None,
            reached_forward_end: false,
            store,
            transport: self.transport,
            listeners: ListenerRegistry::new(),
            signals: self.signals,
        })
    }
}

/// Ordered view of one room's events.
///
/// Every event goes through [`add_event`](Self::add_event), which
/// deduplicates, updates room state, persists and finally notifies
/// listeners with the state in effect *before* the event.
///
/// Two snapshots are maintained: the current state, moved forward by sync,
/// and the back-pagination state, created by
/// [`reset_pagination`](Self::reset_pagination) and walked backwards as
/// older events arrive. The current state is cloned before every forward
/// state change and the clone kept as [`previous_state`](Self::previous_state).
///
/// All methods run on the caller's task. Only the transport calls suspend.
pub struct EventTimeline {
    room_id: String,
    user_id: String,
    initial_event_id: Option<String>,
    state: RoomState,
    previous_state: RoomState,
    back_state: Option<RoomState>,
    /// Historical timelines only; live timelines move forward through sync.
    forward_token: Option<String>,
    reached_forward_end: bool,
    store: Arc<dyn Store>,
    transport: Arc<dyn Transport>,
    listeners: ListenerRegistry,
    signals: Option<SignalSender>,
}

impl std::fmt::Debug for EventTimeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTimeline")
            .field("room_id", &self.room_id)
            .field("initial_event_id", &self.initial_event_id)
            .field("state", &self.state)
            .field("forward_token", &self.forward_token)
            .field("reached_forward_end", &self.reached_forward_end)
            .finish()
    }
}

impl EventTimeline {
    /// Start building a timeline for `room_id`, as seen by `user_id`.
    pub fn builder(
        room_id: impl Into<String>,
        user_id: impl Into<String>,
        transport: Arc<dyn Transport>,
    ) -> TimelineBuilder {
        TimelineBuilder {
            room_id: room_id.into(),
            user_id: user_id.into(),
            transport,
            store: None,
            initial_event_id: None,
            signals: None,
        }
    }

    /// The room this timeline belongs to.
    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    /// The anchor event of a historical timeline.
    pub fn initial_event_id(&self) -> Option<&str> {
        self.initial_event_id.as_deref()
    }

    /// Whether this timeline follows the room through sync.
    pub fn is_live(&self) -> bool {
        self.initial_event_id.is_none()
    }

    /// Current room state.
    pub fn state(&self) -> &RoomState {
        &self.state
    }

    /// Current state as it was before the latest forward state change.
    pub fn previous_state(&self) -> &RoomState {
        &self.previous_state
    }

    /// State at the oldest event paginated so far. `None` until pagination
    /// is reset.
    pub fn back_state(&self) -> Option<&RoomState> {
        self.back_state.as_ref()
    }

    /// The store this timeline reads and writes.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// A handle on this timeline's listeners. Callbacks may keep one to
    /// unregister themselves.
    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    /// Register a callback; see [`ListenerRegistry::register`].
    pub fn add_listener<F>(&self, types: Option<&[&str]>, callback: F) -> ListenerId
    where
        F: Fn(&Event, Direction, &RoomState) + Send + Sync + 'static,
    {
        self.listeners.register(types, callback)
    }

    /// Unregister a callback. Returns `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.unregister(id)
    }

    /// Unregister every callback.
    pub fn remove_all_listeners(&self) {
        self.listeners.clear();
    }

    /// Whether a [`paginate`](Self::paginate) call in `direction` could
    /// produce events.
    ///
    /// Backwards: while the store has unread cached messages or the server
    /// end has not been reached. Forwards: never on a live timeline,
    /// otherwise until the forward end is reached.
    pub fn can_paginate(&self, direction: Direction) -> Result<bool, StoreError> {
        match direction {
            Direction::Backwards => Ok(self
                .store
                .remaining_messages_for_pagination(&self.room_id)?
                > 0
                || !self.store.has_reached_server_pagination_end(&self.room_id)?),
            Direction::Forwards => Ok(!self.is_live() && !self.reached_forward_end),
        }
    }

    /// Prepare for back pagination from the most recent event.
    ///
    /// Must be called before the first [`paginate`](Self::paginate).
    pub fn reset_pagination(&mut self) -> Result<(), StoreError> {
        self.back_state = Some(self.state.clone());
        self.store.reset_pagination(&self.room_id)
    }

    /// Load the window around the initial event of a historical timeline.
    ///
    /// See [`reset_pagination_around_initial_event_with_cancel`].
    ///
    /// [`reset_pagination_around_initial_event_with_cancel`]: Self::reset_pagination_around_initial_event_with_cancel
    pub async fn reset_pagination_around_initial_event(
        &mut self,
        limit: usize,
    ) -> Result<(), TimelineError> {
        self.reset_pagination_around_initial_event_with_cancel(limit, &CancellationToken::new())
            .await
    }

    /// Load the window around the initial event of a historical timeline.
    ///
    /// Fetches the event's context, wipes the private store and rebuilds it:
    /// state from the context, the event itself, the events before it and
    /// the events after it. Listeners are not notified; the window is
    /// delivered by the next backward [`paginate`](Self::paginate), which
    /// drains it from the store. The context's tokens become the backward
    /// and forward cursors.
    ///
    /// Nothing changes if the request fails or `cancel` fires first.
    ///
    /// # Panics
    ///
    /// Panics on a live timeline.
    pub async fn reset_pagination_around_initial_event_with_cancel(
        &mut self,
        limit: usize,
        cancel: &CancellationToken,
    ) -> Result<(), TimelineError> {
        let Some(event_id) = self.initial_event_id.clone() else {
            panic!("reset_pagination_around_initial_event needs a historical timeline");
        };

        let transport = Arc::clone(&self.transport);
        let room_id = self.room_id.clone();
        let context = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TimelineError::Cancelled),
            result = transport.context_of_event(&room_id, &event_id, limit) => result?,
        };
        debug!(
            "context of {event_id}: {} before, {} after",
            context.events_before.len(),
            context.events_after.len()
        );

        self.store.delete_all_data()?;
        self.state = RoomState::from_events(&context.state);
        self.store
            .store_state(&self.room_id, &self.state.state_events())?;
        self.previous_state = self.state.clone();
        self.back_state = Some(self.state.clone());

        self.apply_event(context.event, Direction::Forwards, false, false)?;
        for event in context.events_before {
            self.apply_event(event, Direction::Backwards, false, false)?;
        }
        for event in context.events_after {
            self.apply_event(event, Direction::Forwards, false, false)?;
        }

        self.store
            .store_pagination_token(&self.room_id, Some(context.start))?;
        self.store
            .set_reached_server_pagination_end(&self.room_id, false)?;
        self.forward_token = Some(context.end);
        self.reached_forward_end = false;

        self.reset_pagination()?;
        self.store.commit()?;
        Ok(())
    }

    /// Fetch up to `count` more events in `direction`.
    ///
    /// See [`paginate_with_cancel`](Self::paginate_with_cancel).
    pub async fn paginate(
        &mut self,
        count: usize,
        direction: Direction,
        only_from_store: bool,
    ) -> Result<(), TimelineError> {
        self.paginate_with_cancel(count, direction, only_from_store, &CancellationToken::new())
            .await
    }

    /// Fetch up to `count` more events in `direction`.
    ///
    /// Backwards, cached messages are drained from the store first and
    /// delivered most recent first. If that produced anything and
    /// `only_from_store` is set, the call ends there. Otherwise the rest is
    /// requested from the server, unless the end of history was already
    /// reached.
    ///
    /// A rejected pagination token marks the end of history and completes
    /// successfully. Other transport failures are returned as they are and
    /// are not retried here.
    ///
    /// # Panics
    ///
    /// Panics if [`reset_pagination`](Self::reset_pagination) has not been
    /// called, or when paginating forwards on a live timeline.
    pub async fn paginate_with_cancel(
        &mut self,
        count: usize,
        direction: Direction,
        only_from_store: bool,
        cancel: &CancellationToken,
    ) -> Result<(), TimelineError> {
        assert!(
            self.back_state.is_some(),
            "paginate called before reset_pagination"
        );
        assert!(
            direction == Direction::Backwards || !self.is_live(),
            "a live timeline cannot paginate forwards"
        );

        let mut remaining = count;
        let mut from_store = 0;
        if direction == Direction::Backwards {
            let cached = self
                .store
                .next_messages_for_pagination(&self.room_id, remaining)?;
            from_store = cached.len();
            for event in &cached {
                self.deliver_cached(event);
            }
            remaining -= from_store;
            debug!("{}: {from_store} events from store", self.room_id);

            if only_from_store && from_store > 0 {
                return Ok(());
            }
        }

        if remaining == 0 || self.reached_end(direction)? {
            return Ok(());
        }

        let from = match direction {
            Direction::Backwards => {
                PaginationFrom::from_token(self.store.pagination_token(&self.room_id)?)
            }
            Direction::Forwards => PaginationFrom::from_token(self.forward_token.clone()),
        };
        let request = MessagesRequest {
            room_id: self.room_id.clone(),
            from,
            direction,
            limit: remaining,
            allow_retry: from_store == 0,
        };

        let transport = Arc::clone(&self.transport);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(TimelineError::Cancelled),
            result = transport.messages(request) => result,
        };

        match result {
            Ok(response) => Ok(self.handle_pagination_response(response, direction)?),
            Err(e) if e.is_pagination_exhausted() => {
                warn!("{}: pagination token rejected ({e}), treating as end", self.room_id);
                self.set_reached_end(direction, true)?;
                self.store.commit()?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Apply one page of history fetched in `direction`.
    pub fn handle_pagination_response(
        &mut self,
        response: PaginationResponse,
        direction: Direction,
    ) -> Result<(), StoreError> {
        if response.is_end() {
            debug!("{}: reached the end of history ({direction:?})", self.room_id);
            self.set_reached_end(direction, true)?;
            return self.store.commit();
        }

        for event in response.chunk {
            self.add_event(event, direction, false)?;
        }

        let exhausted = response.end.is_none();
        match direction {
            Direction::Backwards => self
                .store
                .store_pagination_token(&self.room_id, response.end)?,
            Direction::Forwards => self.forward_token = response.end,
        }
        if exhausted {
            self.set_reached_end(direction, true)?;
        }
        self.store.commit()
    }

    /// Apply an incremental sync for this room while the user is joined.
    ///
    /// The state batch updates room state silently and is persisted once.
    /// Timeline events are then added forwards with notification. On the
    /// first sync of a room (membership unknown or invite), the pagination
    /// token is initialised and, when the timeline is not limited, history
    /// is known to be complete. On later syncs a limited timeline means a
    /// gap: cached messages are dropped and pagination restarts from the
    /// batch's `prev_batch`.
    pub fn handle_joined_room_sync(&mut self, sync: JoinedRoomSync) -> Result<(), StoreError> {
        let membership = self.state.membership(&self.user_id);
        let initial_sync = matches!(membership, Membership::Unknown | Membership::Invite);

        if membership == Membership::Invite {
            debug!("{}: leaving invite state, dropping cached data", self.room_id);
            self.store.delete_room(&self.room_id)?;
            self.state = RoomState::new();
            self.previous_state = RoomState::new();
            self.back_state = None;
        }

        self.handle_state_events(&sync.state.events)?;

        let timeline = sync.timeline;
        if initial_sync {
            for event in timeline.events {
                self.add_event(event, Direction::Forwards, false)?;
            }
            self.store
                .store_pagination_token(&self.room_id, timeline.prev_batch)?;
            if !timeline.limited {
                self.store
                    .set_reached_server_pagination_end(&self.room_id, true)?;
            }
            self.store.commit()?;
            self.emit(TimelineSignal::InitialSyncCompleted {
                room_id: self.room_id.clone(),
            });
        } else if timeline.limited {
            debug!("{}: limited sync, dropping cached messages", self.room_id);
            self.store.delete_all_messages(&self.room_id)?;
            for event in timeline.events {
                self.add_event(event, Direction::Forwards, false)?;
            }
            self.store
                .store_pagination_token(&self.room_id, timeline.prev_batch)?;
            self.store
                .set_reached_server_pagination_end(&self.room_id, false)?;
            self.store.commit()?;
            self.emit(TimelineSignal::TimelineResynced {
                room_id: self.room_id.clone(),
            });
        } else {
            for event in timeline.events {
                self.add_event(event, Direction::Forwards, false)?;
            }
            self.store.commit()?;
        }
        Ok(())
    }

    /// Apply the stripped state of an invite.
    ///
    /// Events without an id get a locally generated one.
    pub fn handle_invited_room_sync(&mut self, sync: InvitedRoomSync) -> Result<(), StoreError> {
        for mut event in sync.invite_state.events {
            if event.event_id.is_empty() {
                event.event_id = Event::local_id();
            }
            if event.room_id.is_empty() {
                event.room_id = self.room_id.clone();
            }
            self.add_event(event, Direction::Forwards, false)?;
        }
        self.store.commit()
    }

    /// Add one event to the timeline and notify listeners.
    ///
    /// `from_store` marks events that came out of the store: they skip the
    /// duplicate check and are not stored again. An event whose id the
    /// store already knows is otherwise dropped without notice.
    ///
    /// # Panics
    ///
    /// Panics on a backward event before
    /// [`reset_pagination`](Self::reset_pagination).
    pub fn add_event(
        &mut self,
        event: Event,
        direction: Direction,
        from_store: bool,
    ) -> Result<(), StoreError> {
        self.apply_event(event, direction, from_store, true)
    }

    fn apply_event(
        &mut self,
        event: Event,
        direction: Direction,
        from_store: bool,
        notify: bool,
    ) -> Result<(), StoreError> {
        if !from_store && self.store.event_exists(&self.room_id, &event.event_id)? {
            debug!("{}: dropping duplicate {}", self.room_id, event.event_id);
            return Ok(());
        }
        trace!(
            "{}: {} {} {direction:?}",
            self.room_id, event.event_type, event.event_id
        );

        let mut back_before = None;
        if event.is_state() {
            match direction {
                Direction::Forwards => {
                    self.previous_state = self.state.clone();
                    self.state.apply(&event);
                    self.store
                        .store_state(&self.room_id, &self.state.state_events())?;
                }
                Direction::Backwards => {
                    let Some(back) = self.back_state.as_mut() else {
                        panic!("backward events need reset_pagination first");
                    };
                    back_before = Some(back.clone());
                    back.apply_backward(&event);
                }
            }
        }

        if direction == Direction::Forwards && self.is_live() {
            if event.is_redaction() {
                self.handle_redaction(&event)?;
            }
            // The sender has read their own event.
            let receipt = ReceiptData {
                user_id: event.sender.clone(),
                event_id: event.event_id.clone(),
                ts: event.origin_server_ts,
            };
            self.store.store_receipt(&self.room_id, &receipt)?;
        }

        if !from_store {
            self.store.store_event(&self.room_id, &event, direction)?;
        }

        if notify {
            let before = match (direction, &back_before) {
                (Direction::Backwards, Some(snapshot)) => snapshot,
                (Direction::Backwards, None) => {
                    let Some(back) = self.back_state.as_ref() else {
                        panic!("backward events need reset_pagination first");
                    };
                    back
                }
                (Direction::Forwards, _) if event.is_state() => &self.previous_state,
                (Direction::Forwards, _) => &self.state,
            };
            self.listeners.notify(&event, direction, before);
        }
        Ok(())
    }

    /// Deliver a message drained from the store during back pagination.
    ///
    /// Cached messages are already stored and deduplicated, so this cannot
    /// fail: once the store cursor has moved past a batch, the whole batch
    /// reaches the listeners.
    fn deliver_cached(&mut self, event: &Event) {
        let Some(back) = self.back_state.as_mut() else {
            panic!("backward events need reset_pagination first");
        };
        trace!("{}: {} {} from store", self.room_id, event.event_type, event.event_id);
        if event.is_state() {
            let before = back.clone();
            back.apply_backward(event);
            self.listeners.notify(event, Direction::Backwards, &before);
        } else {
            self.listeners.notify(event, Direction::Backwards, back);
        }
    }

    /// Bulk state from a sync's state batch: one clone, one persist, no
    /// notification, nothing stored as a message.
    fn handle_state_events(&mut self, events: &[Event]) -> Result<(), StoreError> {
        if !events.iter().any(Event::is_state) {
            return Ok(());
        }
        self.previous_state = self.state.clone();
        for event in events {
            self.state.apply(event);
        }
        self.store
            .store_state(&self.room_id, &self.state.state_events())
    }

    /// Replace the redacted event in the store with its stripped form.
    ///
    /// Unknown targets are ignored. Room state is not recomputed when the
    /// target was a state event.
    fn handle_redaction(&self, redaction: &Event) -> Result<(), StoreError> {
        let Some(target_id) = redaction.redacts.as_deref() else {
            return Ok(());
        };
        match self.store.event(&self.room_id, target_id)? {
            Some(target) => {
                debug!("{}: redacting {target_id}", self.room_id);
                self.store
                    .replace_event(&self.room_id, &target.redacted(redaction))
            }
            None => {
                debug!("{}: redaction target {target_id} unknown", self.room_id);
                Ok(())
            }
        }
    }

    fn reached_end(&self, direction: Direction) -> Result<bool, StoreError> {
        match direction {
            Direction::Backwards => self.store.has_reached_server_pagination_end(&self.room_id),
            Direction::Forwards => Ok(self.reached_forward_end),
        }
    }

    fn set_reached_end(&mut self, direction: Direction, reached: bool) -> Result<(), StoreError> {
        match direction {
            Direction::Backwards => self
                .store
                .set_reached_server_pagination_end(&self.room_id, reached),
            Direction::Forwards => {
                self.reached_forward_end = reached;
                Ok(())
            }
        }
    }

    fn emit(&self, signal: TimelineSignal) {
        if let Some(signals) = &self.signals {
            signals.emit(signal);
        }
    }
}

impl Drop for EventTimeline {
    fn drop(&mut self) {
        if self.is_live() {
            return;
        }
        if let Err(e) = self.store.delete_all_data() {
            warn!("{}: could not release historical store: {e}", self.room_id);
        }
    }
}

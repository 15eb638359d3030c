mod common;

use common::{
    ALICE, ME, MockTransport, ROOM, ids, live_timeline, message, messages, page, record,
    record_names, room_name,
};
use roomfold::{
    Direction, EventContext, EventTimeline, PaginationFrom, Store, TimelineError,
    TransportError,
};
use serde_json::json;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_store_drained_before_network() {
    let transport = MockTransport::new();
    let (mut timeline, store) = live_timeline(transport.clone());
    for event in messages("c", 4) {
        timeline.add_event(event, Direction::Forwards, false).unwrap();
    }
    timeline.reset_pagination().unwrap();
    let seen = record(&timeline);

    transport.push_page(Ok(page(messages("n", 6), "t0", Some("t1"))));
    timeline
        .paginate(10, Direction::Backwards, false)
        .await
        .unwrap();

    assert_eq!(
        ids(&seen),
        vec!["$c3", "$c2", "$c1", "$c0", "$n0", "$n1", "$n2", "$n3", "$n4", "$n5"]
    );
    assert!(seen.lock().iter().all(|(_, d)| *d == Direction::Backwards));

    let requests = transport.requests.lock();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].limit, 6);
    assert_eq!(requests[0].from, PaginationFrom::Start);
    assert_eq!(requests[0].direction, Direction::Backwards);
    assert!(!requests[0].allow_retry);
    drop(requests);

    assert_eq!(store.pagination_token(ROOM).unwrap().as_deref(), Some("t1"));
    assert_eq!(store.messages(ROOM).unwrap().len(), 10);
}

#[tokio::test]
async fn test_cached_state_rewinds_during_drain() {
    let (mut timeline, store) = live_timeline(MockTransport::new());
    timeline
        .add_event(room_name("$n1", "A"), Direction::Forwards, false)
        .unwrap();
    timeline
        .add_event(
            room_name("$n2", "B").with_prev_content(json!({"name": "A"})),
            Direction::Forwards,
            false,
        )
        .unwrap();
    timeline
        .add_event(message("$m", ALICE, "hi"), Direction::Forwards, false)
        .unwrap();
    timeline.reset_pagination().unwrap();
    let seen = record_names(&timeline);

    timeline
        .paginate(10, Direction::Backwards, true)
        .await
        .unwrap();

    assert_eq!(
        *seen.lock(),
        vec![
            ("$m".to_string(), Some("B".to_string())),
            ("$n2".to_string(), Some("B".to_string())),
            ("$n1".to_string(), Some("A".to_string())),
        ]
    );
    assert_eq!(timeline.back_state().unwrap().name(), None);
    assert_eq!(timeline.state().name(), Some("B"));
    assert_eq!(store.remaining_messages_for_pagination(ROOM).unwrap(), 0);
}

#[tokio::test]
async fn test_network_request_may_retry_without_cached_events() {
    let transport = MockTransport::new();
    let (mut timeline, store) = live_timeline(transport.clone());
    store
        .store_pagination_token(ROOM, Some("prev".into()))
        .unwrap();
    timeline.reset_pagination().unwrap();

    transport.push_page(Ok(page(messages("n", 2), "prev", Some("older"))));
    timeline
        .paginate(5, Direction::Backwards, false)
        .await
        .unwrap();

    let requests = transport.requests.lock();
    assert_eq!(requests[0].from, PaginationFrom::Token("prev".into()));
    assert_eq!(requests[0].limit, 5);
    assert!(requests[0].allow_retry);
}

#[tokio::test]
async fn test_only_from_store_stops_after_cached_batch() {
    let transport = MockTransport::new();
    let (mut timeline, _store) = live_timeline(transport.clone());
    for event in messages("c", 4) {
        timeline.add_event(event, Direction::Forwards, false).unwrap();
    }
    timeline.reset_pagination().unwrap();
    let seen = record(&timeline);

    timeline
        .paginate(2, Direction::Backwards, true)
        .await
        .unwrap();
    assert_eq!(ids(&seen), vec!["$c3", "$c2"]);

    timeline
        .paginate(5, Direction::Backwards, true)
        .await
        .unwrap();
    assert_eq!(ids(&seen), vec!["$c3", "$c2", "$c1", "$c0"]);
    assert_eq!(transport.request_count(), 0);

    // Nothing cached any more: the server is asked.
    transport.push_page(Ok(page(messages("n", 1), "t0", Some("t1"))));
    timeline
        .paginate(5, Direction::Backwards, true)
        .await
        .unwrap();
    assert_eq!(transport.request_count(), 1);
    assert_eq!(ids(&seen).last().map(String::as_str), Some("$n0"));
}

#[tokio::test]
async fn test_empty_page_with_equal_tokens_ends_pagination() {
    let transport = MockTransport::new();
    let (mut timeline, store) = live_timeline(transport.clone());
    timeline.reset_pagination().unwrap();
    assert!(timeline.can_paginate(Direction::Backwards).unwrap());

    transport.push_page(Ok(page(vec![], "t9", Some("t9"))));
    timeline
        .paginate(10, Direction::Backwards, false)
        .await
        .unwrap();

    assert!(!timeline.can_paginate(Direction::Backwards).unwrap());
    assert!(store.has_reached_server_pagination_end(ROOM).unwrap());

    let seen = record(&timeline);
    timeline
        .paginate(10, Direction::Backwards, false)
        .await
        .unwrap();
    assert_eq!(transport.request_count(), 1);
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn test_rejected_token_ends_pagination() {
    let transport = MockTransport::new();
    let (mut timeline, _store) = live_timeline(transport.clone());
    timeline.reset_pagination().unwrap();

    transport.push_page(Err(TransportError::InvalidToken("stale".into())));
    timeline
        .paginate(10, Direction::Backwards, false)
        .await
        .unwrap();
    assert!(!timeline.can_paginate(Direction::Backwards).unwrap());
}

#[tokio::test]
async fn test_transient_failure_is_surfaced() {
    let transport = MockTransport::new();
    let (mut timeline, store) = live_timeline(transport.clone());
    store
        .store_pagination_token(ROOM, Some("t0".into()))
        .unwrap();
    timeline.reset_pagination().unwrap();

    transport.push_page(Err(TransportError::Http {
        status: 502,
        message: "bad gateway".into(),
    }));
    let err = timeline
        .paginate(10, Direction::Backwards, false)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        TimelineError::Transport(TransportError::Http { status: 502, .. })
    ));
    assert!(timeline.can_paginate(Direction::Backwards).unwrap());
    assert_eq!(store.pagination_token(ROOM).unwrap().as_deref(), Some("t0"));
}

#[tokio::test]
async fn test_cancelled_pagination_leaves_cursor_alone() {
    let transport = MockTransport::hanging();
    let (mut timeline, store) = live_timeline(transport.clone());
    store
        .store_pagination_token(ROOM, Some("t0".into()))
        .unwrap();
    timeline.reset_pagination().unwrap();

    let cancel = CancellationToken::new();
    let (result, ()) = tokio::join!(
        timeline.paginate_with_cancel(10, Direction::Backwards, false, &cancel),
        async {
            tokio::task::yield_now().await;
            cancel.cancel();
        }
    );

    assert!(matches!(result, Err(TimelineError::Cancelled)));
    assert_eq!(transport.request_count(), 1);
    assert_eq!(store.pagination_token(ROOM).unwrap().as_deref(), Some("t0"));
    assert!(!store.has_reached_server_pagination_end(ROOM).unwrap());
}

#[tokio::test]
#[should_panic(expected = "before reset_pagination")]
async fn test_paginate_before_reset_panics() {
    let (mut timeline, _store) = live_timeline(MockTransport::new());
    let _ = timeline.paginate(10, Direction::Backwards, false).await;
}

#[tokio::test]
#[should_panic(expected = "cannot paginate forwards")]
async fn test_live_forward_pagination_panics() {
    let (mut timeline, _store) = live_timeline(MockTransport::new());
    timeline.reset_pagination().unwrap();
    let _ = timeline.paginate(10, Direction::Forwards, false).await;
}

#[test]
fn test_live_timeline_cannot_paginate_forwards() {
    let (timeline, _store) = live_timeline(MockTransport::new());
    assert!(!timeline.can_paginate(Direction::Forwards).unwrap());
}

fn context() -> EventContext {
    EventContext {
        state: vec![room_name("$s", "Anchored")],
        event: message("$e", ALICE, "anchor"),
        events_before: vec![message("$b0", ALICE, "b0"), message("$b1", ALICE, "b1")],
        events_after: vec![message("$a0", ALICE, "a0"), message("$a1", ALICE, "a1")],
        start: "start".into(),
        end: "end".into(),
    }
}

fn historical(transport: std::sync::Arc<MockTransport>) -> EventTimeline {
    EventTimeline::builder(ROOM, ME, transport)
        .initial_event("$e")
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_reset_around_initial_event_builds_window() {
    let transport = MockTransport::new();
    transport.set_context(Ok(context()));
    let mut timeline = historical(transport.clone());
    let seen = record(&timeline);

    timeline
        .reset_pagination_around_initial_event(10)
        .await
        .unwrap();

    assert!(seen.lock().is_empty());
    assert_eq!(timeline.state().name(), Some("Anchored"));
    let store = timeline.store().clone();
    let chronological: Vec<String> = store
        .messages(ROOM)
        .unwrap()
        .into_iter()
        .map(|e| e.event_id)
        .collect();
    assert_eq!(chronological, vec!["$b1", "$b0", "$e", "$a0", "$a1"]);
    assert_eq!(store.pagination_token(ROOM).unwrap().as_deref(), Some("start"));
    assert!(timeline.can_paginate(Direction::Backwards).unwrap());
    assert!(timeline.can_paginate(Direction::Forwards).unwrap());
}

#[tokio::test]
async fn test_historical_pagination_in_both_directions() {
    let transport = MockTransport::new();
    transport.set_context(Ok(context()));
    let mut timeline = historical(transport.clone());
    timeline
        .reset_pagination_around_initial_event(10)
        .await
        .unwrap();
    let seen = record(&timeline);

    transport.push_page(Ok(page(messages("old", 2), "start", Some("older"))));
    timeline
        .paginate(7, Direction::Backwards, false)
        .await
        .unwrap();
    assert_eq!(
        ids(&seen),
        vec!["$a1", "$a0", "$e", "$b0", "$b1", "$old0", "$old1"]
    );
    assert_eq!(
        transport.requests.lock()[0].from,
        PaginationFrom::Token("start".into())
    );

    seen.lock().clear();
    transport.push_page(Ok(page(messages("new", 1), "end", None)));
    timeline
        .paginate(5, Direction::Forwards, false)
        .await
        .unwrap();
    assert_eq!(ids(&seen), vec!["$new0"]);
    {
        let requests = transport.requests.lock();
        assert_eq!(requests[1].from, PaginationFrom::Token("end".into()));
        assert_eq!(requests[1].direction, Direction::Forwards);
    }
    // No end token: nothing further forwards.
    assert!(!timeline.can_paginate(Direction::Forwards).unwrap());
}

#[tokio::test]
async fn test_historical_forward_end_by_equal_tokens() {
    let transport = MockTransport::new();
    transport.set_context(Ok(context()));
    let mut timeline = historical(transport.clone());
    timeline
        .reset_pagination_around_initial_event(10)
        .await
        .unwrap();

    transport.push_page(Ok(page(vec![], "end", Some("end"))));
    timeline
        .paginate(5, Direction::Forwards, false)
        .await
        .unwrap();
    assert!(!timeline.can_paginate(Direction::Forwards).unwrap());
    // Backwards is unaffected.
    assert!(timeline.can_paginate(Direction::Backwards).unwrap());
}

#[tokio::test]
async fn test_failed_context_request_changes_nothing() {
    let transport = MockTransport::new();
    transport.set_context(Err(TransportError::Network("offline".into())));
    let mut timeline = historical(transport.clone());

    let err = timeline
        .reset_pagination_around_initial_event(10)
        .await
        .unwrap_err();
    assert!(matches!(err, TimelineError::Transport(TransportError::Network(_))));
    assert!(timeline.state().is_empty());
    assert!(timeline.back_state().is_none());
}

#[tokio::test]
async fn test_cancelled_context_request() {
    let transport = MockTransport::hanging();
    let mut timeline = historical(transport);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = timeline
        .reset_pagination_around_initial_event_with_cancel(10, &cancel)
        .await;
    assert!(matches!(result, Err(TimelineError::Cancelled)));
    assert!(timeline.back_state().is_none());
}

#[tokio::test]
#[should_panic(expected = "historical timeline")]
async fn test_reset_around_event_on_live_timeline_panics() {
    let (mut timeline, _store) = live_timeline(MockTransport::new());
    let _ = timeline.reset_pagination_around_initial_event(10).await;
}

#[tokio::test]
async fn test_historical_store_released_on_drop() {
    let transport = MockTransport::new();
    transport.set_context(Ok(context()));
    let mut timeline = historical(transport);
    timeline
        .reset_pagination_around_initial_event(10)
        .await
        .unwrap();
    let store = timeline.store().clone();
    assert_eq!(store.messages(ROOM).unwrap().len(), 5);

    drop(timeline);
    assert!(store.messages(ROOM).unwrap().is_empty());
    assert!(store.state(ROOM).unwrap().is_none());
}

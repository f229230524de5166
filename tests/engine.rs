mod common;

use std::sync::{atomic::Ordering, Arc};

use common::*;
use quotelens::{
    engine::{EngineHandle, EngineOptions, IngestPolicy},
    error::EngineError,
    models::{EventType, EventTypeSet, Filter},
    projections::AggregationState,
};

fn spawn(store: Arc<MemoryStore>, initial: Filter, policy: IngestPolicy) -> EngineHandle {
    EngineHandle::spawn(
        store,
        initial,
        EngineOptions {
            queue_capacity: 64,
            ingest_policy: policy,
            ..EngineOptions::default()
        },
    )
}

#[tokio::test]
async fn starts_empty_and_zero_filled() {
    let engine = spawn(Arc::default(), filter(1, 5), IngestPolicy::FollowFilter);
    let state = engine.state();
    assert_eq!(state.daily().count(), 5);
    assert_eq!(state.event_counts().total(), 0);
}

#[tokio::test]
async fn set_filter_swaps_in_a_full_recompute() {
    let events = vec![
        event("e1", EventType::Sent, 1, 9),
        event("e2", EventType::Opened, 1, 11),
        event("e3", EventType::Sent, 2, 16),
    ];
    let store = Arc::new(MemoryStore::with_events(events.clone()));
    let engine = spawn(store, filter(1, 3), IngestPolicy::FollowFilter);

    within(engine.set_filter(filter(1, 3))).await.unwrap();

    let state = engine.state();
    assert_eq!(*state, AggregationState::recompute(&events, range(1, 3)));
    let counts = state.event_counts();
    assert_eq!(
        EventType::ALL.map(|t| counts.get(t)),
        [2, 1, 0, 0],
        "sent/opened/clicked/downloaded"
    );
    assert_eq!(
        state.daily().collect::<Vec<_>>(),
        vec![(day(1), 2), (day(2), 1), (day(3), 0)]
    );
    assert_eq!(engine.filter(), filter(1, 3));
}

#[tokio::test]
async fn recompute_honours_event_type_filter() {
    let store = Arc::new(MemoryStore::with_events(vec![
        event("e1", EventType::Sent, 1, 9),
        event("e2", EventType::Opened, 1, 11),
        event("e3", EventType::Clicked, 2, 16),
    ]));
    let engine = spawn(store, filter(1, 3), IngestPolicy::FollowFilter);

    let opened_only = Filter::new(range(1, 3), [EventType::Opened].into_iter().collect());
    within(engine.set_filter(opened_only)).await.unwrap();

    let counts = engine.state().event_counts();
    assert_eq!(counts.get(EventType::Opened), 1);
    assert_eq!(counts.total(), 1);
}

#[tokio::test]
async fn ingest_merges_and_broadcasts_once_per_id() {
    let engine = spawn(Arc::default(), filter(1, 3), IngestPolicy::FollowFilter);
    let mut merged = engine.subscribe_merged();

    let e = event("live-1", EventType::Opened, 2, 10);
    engine.ingest(e.clone()).await.unwrap();
    // At-least-once delivery: the same event again changes nothing.
    engine.ingest(e.clone()).await.unwrap();
    engine.ingest(event("live-2", EventType::Clicked, 2, 10)).await.unwrap();

    assert_eq!(within(merged.recv()).await.unwrap().id, "live-1");
    assert_eq!(within(merged.recv()).await.unwrap().id, "live-2");

    let state = engine.state();
    assert_eq!(state.event_counts().total(), 2);
    assert_eq!(state.daily().find(|(d, _)| *d == day(2)).unwrap().1, 2);
}

#[tokio::test]
async fn follow_filter_policy_skips_excluded_live_events() {
    let engine = spawn(Arc::default(), filter(1, 3), IngestPolicy::FollowFilter);
    let sent_only = Filter::new(range(1, 3), [EventType::Sent].into_iter().collect());
    within(engine.set_filter(sent_only)).await.unwrap();

    engine.ingest(event("o", EventType::Opened, 1, 1)).await.unwrap();
    engine.ingest(event("s", EventType::Sent, 1, 1)).await.unwrap();

    let mut watch = engine.watch_state();
    within(watch.wait_for(|s| s.has_seen("s"))).await.unwrap();
    let state = engine.state();
    assert!(!state.has_seen("o"));
    assert_eq!(state.event_counts().get(EventType::Opened), 0);
    assert_eq!(state.event_counts().get(EventType::Sent), 1);
}

#[tokio::test]
async fn bypass_filter_policy_merges_every_live_event() {
    let engine = spawn(Arc::default(), filter(1, 3), IngestPolicy::BypassFilter);
    let sent_only = Filter::new(range(1, 3), [EventType::Sent].into_iter().collect());
    within(engine.set_filter(sent_only)).await.unwrap();

    engine.ingest(event("o", EventType::Opened, 1, 1)).await.unwrap();

    let mut watch = engine.watch_state();
    within(watch.wait_for(|s| s.has_seen("o"))).await.unwrap();
    assert_eq!(engine.state().event_counts().get(EventType::Opened), 1);
}

#[tokio::test]
async fn last_filter_wins() {
    let (store, gate) = MemoryStore::with_events(vec![
        event("early", EventType::Sent, 1, 9),
        event("late", EventType::Sent, 9, 9),
    ])
    .gate_queries();
    let store = Arc::new(store);
    let engine = spawn(store.clone(), filter(1, 3), IngestPolicy::FollowFilter);

    let first = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.set_filter(filter(1, 3)).await })
    };
    eventually(|| store.queries.load(Ordering::SeqCst) == 1).await;

    let second = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.set_filter(filter(8, 10)).await })
    };
    assert!(matches!(
        within(first).await.unwrap(),
        Err(EngineError::Superseded)
    ));

    gate.add_permits(2);
    within(second).await.unwrap().unwrap();

    let state = engine.state();
    assert_eq!(state.range(), range(8, 10));
    assert!(state.has_seen("late"));
    assert!(!state.has_seen("early"));
}

#[tokio::test]
async fn live_events_during_recompute_are_kept_and_counted_once() {
    // "overlap" is both in the store and delivered live.
    let overlap = event("overlap", EventType::Opened, 2, 12);
    let (store, gate) = MemoryStore::with_events(vec![
        event("stored", EventType::Sent, 1, 8),
        overlap.clone(),
    ])
    .gate_queries();
    let store = Arc::new(store);
    let engine = spawn(store.clone(), filter(1, 3), IngestPolicy::FollowFilter);

    let recompute = {
        let engine = engine.clone();
        tokio::spawn(async move { engine.set_filter(filter(1, 3)).await })
    };
    eventually(|| store.queries.load(Ordering::SeqCst) == 1).await;

    engine.ingest(overlap).await.unwrap();
    engine.ingest(event("fresh", EventType::Clicked, 3, 18)).await.unwrap();

    // Visible right away on the current state.
    let mut watch = engine.watch_state();
    within(watch.wait_for(|s| s.has_seen("fresh"))).await.unwrap();

    gate.add_permits(1);
    within(recompute).await.unwrap().unwrap();

    let state = engine.state();
    for id in ["stored", "overlap", "fresh"] {
        assert!(state.has_seen(id), "{id} missing");
    }
    assert_eq!(state.event_counts().total(), 3);
    assert_eq!(
        state.daily().collect::<Vec<_>>(),
        vec![(day(1), 1), (day(2), 1), (day(3), 1)]
    );
}

#[tokio::test]
async fn failed_recompute_keeps_previous_state() {
    let store = Arc::new(MemoryStore::with_events(vec![event("e1", EventType::Sent, 1, 9)]));
    let engine = spawn(store.clone(), filter(1, 3), IngestPolicy::FollowFilter);
    within(engine.set_filter(filter(1, 3))).await.unwrap();
    let before = engine.state();

    store.fail_queries(true);
    let result = within(engine.set_filter(filter(5, 9))).await;
    assert!(matches!(result, Err(EngineError::Store(_))));

    assert_eq!(*engine.state(), *before);
    assert_eq!(engine.filter(), filter(1, 3));
}

#[tokio::test]
async fn empty_type_set_yields_empty_views() {
    let store = Arc::new(MemoryStore::with_events(vec![event("e1", EventType::Sent, 1, 9)]));
    let engine = spawn(store, filter(1, 3), IngestPolicy::FollowFilter);
    let nothing = Filter::new(range(1, 3), EventTypeSet::from_iter(Vec::<EventType>::new()));
    within(engine.set_filter(nothing)).await.unwrap();

    let state = engine.state();
    assert_eq!(state.event_counts().total(), 0);
    assert_eq!(state.daily().count(), 3);
}

#[tokio::test]
async fn overlong_range_is_refused_before_querying() {
    let store = Arc::new(MemoryStore::default());
    let engine = EngineHandle::spawn(
        store.clone(),
        filter(1, 3),
        EngineOptions {
            max_range_days: 7,
            ..EngineOptions::default()
        },
    );

    let err = engine.set_filter(filter(1, 8)).await.unwrap_err();
    assert!(matches!(err, EngineError::RangeTooLong { days: 8, max: 7 }));
    assert_eq!(store.queries.load(Ordering::SeqCst), 0);
    assert_eq!(engine.filter(), filter(1, 3));
    assert_eq!(engine.state().daily().count(), 3);

    engine.set_filter(filter(1, 7)).await.unwrap();
    assert_eq!(engine.state().daily().count(), 7);
}

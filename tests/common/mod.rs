#![allow(dead_code)]

use std::{
    collections::HashSet,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{NaiveDate, TimeZone, Utc};
use quotelens::{
    error::{FeedError, StoreError},
    feed::{FeedMessage, FeedTransport},
    models::{DateRange, EventType, EventTypeSet, Filter, TrackingEvent},
    store::EventStore,
};
use tokio::sync::{mpsc, Semaphore};

pub const MOBILE_UA: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_1 like Mac OS X) \
    AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.1 Mobile/15E148 Safari/604.1";
pub const DESKTOP_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
    (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

pub fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 4, d).unwrap()
}

pub fn range(from: u32, to: u32) -> DateRange {
    DateRange::new(day(from), day(to)).unwrap()
}

pub fn filter(from: u32, to: u32) -> Filter {
    Filter::new(range(from, to), EventTypeSet::all())
}

pub fn event(id: &str, event_type: EventType, d: u32, hour: u32) -> TrackingEvent {
    TrackingEvent {
        id: id.into(),
        quotation_id: "Q-100".into(),
        recipient_email: "buyer@example.com".into(),
        event_type,
        event_date: Utc.with_ymd_and_hms(2024, 4, d, hour, 0, 0).unwrap(),
        ip_address: Some("203.0.113.7".into()),
        user_agent: Some(DESKTOP_UA.into()),
        customer_name: Some("Initech".into()),
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let waited = tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "condition not reached within 2s");
}

pub async fn within<T>(fut: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), fut)
        .await
        .expect("timed out")
}

// ── Event store double ─────────────────────────────────────────────────────

/// In-memory record store with switches for failures and for holding
/// queries / fetches until the test releases them.
#[derive(Default)]
pub struct MemoryStore {
    events: Mutex<Vec<TrackingEvent>>,
    failing_ids: Mutex<HashSet<String>>,
    fail_queries: AtomicBool,
    query_gate: Option<Arc<Semaphore>>,
    fetch_gate: Option<Arc<Semaphore>>,
    pub queries: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl MemoryStore {
    pub fn with_events(events: Vec<TrackingEvent>) -> Self {
        Self {
            events: Mutex::new(events),
            ..Default::default()
        }
    }

    /// Queries block until a permit is added to the returned semaphore.
    pub fn gate_queries(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.query_gate = Some(gate.clone());
        (self, gate)
    }

    /// Fetches block until a permit is added to the returned semaphore.
    pub fn gate_fetches(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.fetch_gate = Some(gate.clone());
        (self, gate)
    }

    pub fn push(&self, event: TrackingEvent) {
        self.events.lock().unwrap().push(event);
    }

    pub fn fail_fetch_of(&self, id: &str) {
        self.failing_ids.lock().unwrap().insert(id.to_owned());
    }

    pub fn fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl EventStore for MemoryStore {
    async fn query(
        &self,
        range: &DateRange,
        event_types: &EventTypeSet,
    ) -> Result<Vec<TrackingEvent>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.query_gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.fail_queries.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("record store offline".into()));
        }
        Ok(self
            .events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| range.contains(e.event_date.date_naive()))
            .filter(|e| event_types.contains(e.event_type))
            .cloned()
            .collect())
    }

    async fn fetch_by_id(&self, id: &str) -> Result<TrackingEvent, StoreError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.fetch_gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.failing_ids.lock().unwrap().contains(id) {
            return Err(StoreError::Unavailable(format!("lookup of {id} timed out")));
        }
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.id == id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_owned()))
    }
}

// ── Feed transport double ──────────────────────────────────────────────────

/// Hands each subscription's sending half to the test.
#[derive(Default)]
pub struct ChannelTransport {
    senders: Mutex<Vec<mpsc::Sender<FeedMessage>>>,
    refuse: AtomicBool,
    pub subscribes: AtomicUsize,
    pub unsubscribes: AtomicUsize,
}

impl ChannelTransport {
    pub fn refuse_subscriptions(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Sender of the most recent subscription.
    pub fn latest(&self) -> mpsc::Sender<FeedMessage> {
        self.senders.lock().unwrap().last().cloned().expect("no subscription yet")
    }
}

#[async_trait]
impl FeedTransport for ChannelTransport {
    async fn subscribe(&self) -> Result<mpsc::Receiver<FeedMessage>, FeedError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(FeedError::Transport("connection refused".into()));
        }
        let (tx, rx) = mpsc::channel(16);
        self.senders.lock().unwrap().push(tx);
        Ok(rx)
    }

    async fn unsubscribe(&self) {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.senders.lock().unwrap().clear();
    }
}

//! Live feed: a transport that announces newly inserted tracking events by
//! id, and the manager that turns those announcements into merged events.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use tokio::{
    sync::{broadcast, mpsc, watch, Mutex},
    task::{JoinHandle, JoinSet},
    time::MissedTickBehavior,
};

use crate::{engine::EngineHandle, error::FeedError, store::EventStore};

// ── Transport ──────────────────────────────────────────────────────────────

/// What a live-feed transport delivers on an open subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FeedMessage {
    /// The transport acknowledged the subscription.
    Subscribed,
    /// A tracking event with this id was inserted.
    Inserted { id: String },
    /// The subscription broke and will deliver nothing more.
    Failed(String),
}

#[async_trait]
pub trait FeedTransport: Send + Sync + 'static {
    async fn subscribe(&self) -> Result<mpsc::Receiver<FeedMessage>, FeedError>;
    async fn unsubscribe(&self);
}

/// Polls `tracking_events` for rows newer than the last one announced.
pub struct SqliteFeed {
    pool: SqlitePool,
    interval: Duration,
    poller: Mutex<Option<JoinHandle<()>>>,
}

impl SqliteFeed {
    pub fn new(pool: SqlitePool, interval: Duration) -> Self {
        Self {
            pool,
            interval,
            poller: Mutex::new(None),
        }
    }
}

#[async_trait]
impl FeedTransport for SqliteFeed {
    async fn subscribe(&self) -> Result<mpsc::Receiver<FeedMessage>, FeedError> {
        // Only rows inserted from now on are announced.
        let mut high_water: i64 =
            sqlx::query_scalar("SELECT COALESCE(MAX(rowid), 0) FROM tracking_events")
                .fetch_one(&self.pool)
                .await
                .map_err(|e| FeedError::Transport(e.to_string()))?;

        let (tx, rx) = mpsc::channel(256);
        let pool = self.pool.clone();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let poller = tokio::spawn(async move {
            if tx.send(FeedMessage::Subscribed).await.is_err() {
                return;
            }
            loop {
                ticker.tick().await;
                let rows: Vec<(i64, String)> = match sqlx::query_as(
                    "SELECT rowid, id FROM tracking_events WHERE rowid > ?1 ORDER BY rowid",
                )
                .bind(high_water)
                .fetch_all(&pool)
                .await
                {
                    Ok(rows) => rows,
                    Err(e) => {
                        let _ = tx.send(FeedMessage::Failed(e.to_string())).await;
                        return;
                    }
                };

                for (rowid, id) in rows {
                    high_water = rowid;
                    if tx.send(FeedMessage::Inserted { id }).await.is_err() {
                        return;
                    }
                }
            }
        });

        if let Some(previous) = self.poller.lock().await.replace(poller) {
            previous.abort();
        }
        tracing::debug!("Polling tracking_events above rowid {}", high_water);
        Ok(rx)
    }

    async fn unsubscribe(&self) {
        if let Some(poller) = self.poller.lock().await.take() {
            poller.abort();
        }
    }
}

// ── Subscription manager ───────────────────────────────────────────────────

/// Connection state of the live feed. `Error` is terminal until
/// [`FeedManager::reconnect`] is called; nothing retries on its own.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum FeedStatus {
    Disconnected,
    Connecting,
    Connected,
    Error(String),
}

/// Where one notification is in the fetch-then-merge protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPhase {
    Received,
    Fetching,
    Merged,
    Dropped,
}

/// One inbound notification and its progress.
#[derive(Debug)]
pub struct Notification {
    id: String,
    phase: NotificationPhase,
}

impl Notification {
    pub fn received(id: String) -> Self {
        Self {
            id,
            phase: NotificationPhase::Received,
        }
    }

    pub fn phase(&self) -> NotificationPhase {
        self.phase
    }

    fn advance(&mut self, next: NotificationPhase) {
        tracing::trace!("Notification '{}': {:?} -> {:?}", self.id, self.phase, next);
        self.phase = next;
    }

    /// Fetch the full record and hand it to the engine. A failed fetch
    /// drops the event whole and reports exactly one error.
    pub async fn process(
        mut self,
        store: &dyn EventStore,
        engine: &EngineHandle,
        errors: &broadcast::Sender<FeedError>,
    ) -> NotificationPhase {
        self.advance(NotificationPhase::Fetching);

        let event = match store.fetch_by_id(&self.id).await {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("Dropping live event '{}': {}", self.id, e);
                let _ = errors.send(FeedError::Fetch {
                    id: self.id.clone(),
                    reason: e.to_string(),
                });
                self.advance(NotificationPhase::Dropped);
                return self.phase;
            }
        };

        match engine.ingest(event).await {
            Ok(()) => self.advance(NotificationPhase::Merged),
            Err(_) => {
                tracing::warn!("Dropping live event '{}': engine stopped", self.id);
                let _ = errors.send(FeedError::EngineStopped);
                self.advance(NotificationPhase::Dropped);
            }
        }
        self.phase
    }
}

/// Owns at most one live-feed subscription and forwards what it announces
/// to the aggregation engine.
pub struct FeedManager {
    transport: Arc<dyn FeedTransport>,
    store: Arc<dyn EventStore>,
    engine: EngineHandle,
    status: Arc<watch::Sender<FeedStatus>>,
    errors: broadcast::Sender<FeedError>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl FeedManager {
    pub fn new(
        transport: Arc<dyn FeedTransport>,
        store: Arc<dyn EventStore>,
        engine: EngineHandle,
    ) -> Self {
        let (status, _) = watch::channel(FeedStatus::Disconnected);
        let (errors, _) = broadcast::channel(64);
        Self {
            transport,
            store,
            engine,
            status: Arc::new(status),
            errors,
            worker: Mutex::new(None),
        }
    }

    pub fn status(&self) -> FeedStatus {
        self.status.borrow().clone()
    }

    pub fn watch_status(&self) -> watch::Receiver<FeedStatus> {
        self.status.subscribe()
    }

    /// Transport and fetch failures, one message per failure.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<FeedError> {
        self.errors.subscribe()
    }

    /// Open the subscription. Only valid while `Disconnected`; after an
    /// error, [`FeedManager::reconnect`] has to run first.
    pub async fn subscribe(&self) -> Result<(), FeedError> {
        let mut worker = self.worker.lock().await;
        match &*self.status.borrow() {
            FeedStatus::Disconnected => {}
            FeedStatus::Error(_) => return Err(FeedError::ReconnectRequired),
            FeedStatus::Connecting | FeedStatus::Connected => {
                return Err(FeedError::AlreadySubscribed)
            }
        }

        self.status.send_replace(FeedStatus::Connecting);
        let messages = match self.transport.subscribe().await {
            Ok(messages) => messages,
            Err(e) => {
                report_failure(&self.status, &self.errors, e.clone());
                return Err(e);
            }
        };

        let task = Worker {
            store: self.store.clone(),
            engine: self.engine.clone(),
            status: self.status.clone(),
            errors: self.errors.clone(),
        };
        *worker = Some(tokio::spawn(task.run(messages)));
        Ok(())
    }

    /// Tear down the subscription, abandoning any fetch still in flight,
    /// and return to `Disconnected`. The caller re-subscribes.
    pub async fn reconnect(&self) {
        let mut worker = self.worker.lock().await;
        if let Some(task) = worker.take() {
            task.abort();
            let _ = task.await;
        }
        self.transport.unsubscribe().await;
        self.status.send_replace(FeedStatus::Disconnected);
        tracing::info!("Live feed disconnected");
    }
}

fn report_failure(
    status: &watch::Sender<FeedStatus>,
    errors: &broadcast::Sender<FeedError>,
    error: FeedError,
) {
    tracing::error!("{}", error);
    let reason = match &error {
        FeedError::Transport(reason) => reason.clone(),
        other => other.to_string(),
    };
    status.send_replace(FeedStatus::Error(reason));
    let _ = errors.send(error);
}

struct Worker {
    store: Arc<dyn EventStore>,
    engine: EngineHandle,
    status: Arc<watch::Sender<FeedStatus>>,
    errors: broadcast::Sender<FeedError>,
}

impl Worker {
    async fn run(self, mut messages: mpsc::Receiver<FeedMessage>) {
        // Dropping this set (on abort) cancels every outstanding fetch.
        let mut fetches = JoinSet::new();

        loop {
            tokio::select! {
                msg = messages.recv() => match msg {
                    Some(FeedMessage::Subscribed) => {
                        self.status.send_replace(FeedStatus::Connected);
                        tracing::info!("Live feed connected");
                    }
                    Some(FeedMessage::Inserted { id }) => {
                        let store = self.store.clone();
                        let engine = self.engine.clone();
                        let errors = self.errors.clone();
                        fetches.spawn(async move {
                            Notification::received(id)
                                .process(store.as_ref(), &engine, &errors)
                                .await
                        });
                    }
                    Some(FeedMessage::Failed(reason)) => {
                        report_failure(&self.status, &self.errors, FeedError::Transport(reason));
                        break;
                    }
                    None => {
                        report_failure(
                            &self.status,
                            &self.errors,
                            FeedError::Transport("live feed closed".into()),
                        );
                        break;
                    }
                },
                Some(joined) = fetches.join_next(), if !fetches.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!("Live event task failed: {}", e);
                    }
                }
            }
        }

        // Notifications that arrived before the failure still complete.
        while fetches.join_next().await.is_some() {}
    }
}

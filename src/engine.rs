//! The aggregation engine: the only writer of [`AggregationState`].
//!
//! A single task owns the state and serializes every mutation. Recompute
//! fetches run on their own task so the engine keeps merging live events
//! while one is outstanding; readers see whole states only, published
//! through a `watch` channel.

use std::{str::FromStr, sync::Arc};

use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    task::JoinHandle,
};

use crate::{
    error::{EngineError, StoreError},
    models::{Filter, TrackingEvent},
    projections::AggregationState,
    store::EventStore,
};

/// Whether live events honour the active event-type filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IngestPolicy {
    /// Drop live events whose type the active filter excludes.
    #[default]
    FollowFilter,
    /// Merge every live event; the filter only shapes recomputes.
    BypassFilter,
}

impl IngestPolicy {
    fn admits(self, filter: &Filter, event: &TrackingEvent) -> bool {
        match self {
            IngestPolicy::FollowFilter => filter.event_types.contains(event.event_type),
            IngestPolicy::BypassFilter => true,
        }
    }
}

impl FromStr for IngestPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "follow-filter" => Ok(IngestPolicy::FollowFilter),
            "bypass-filter" => Ok(IngestPolicy::BypassFilter),
            other => Err(format!("unknown ingest policy '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EngineOptions {
    pub queue_capacity: usize,
    pub ingest_policy: IngestPolicy,
    /// Longest date range, in days, a filter change may ask for.
    pub max_range_days: usize,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            ingest_policy: IngestPolicy::default(),
            max_range_days: 366,
        }
    }
}

// ── Handle ─────────────────────────────────────────────────────────────────

enum Command {
    SetFilter {
        filter: Filter,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Ingest(TrackingEvent),
}

/// Cheap, cloneable handle to the running engine.
#[derive(Clone)]
pub struct EngineHandle {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<Arc<AggregationState>>,
    filter: watch::Receiver<Filter>,
    merged: broadcast::Sender<Arc<TrackingEvent>>,
    max_range_days: usize,
}

impl EngineHandle {
    /// Start the engine with an empty, zero-filled state for `filter`.
    /// Call [`EngineHandle::set_filter`] to load data.
    pub fn spawn(store: Arc<dyn EventStore>, filter: Filter, options: EngineOptions) -> Self {
        let (commands, command_rx) = mpsc::channel(options.queue_capacity.max(1));
        let (done_tx, done_rx) = mpsc::unbounded_channel();
        let (state_tx, state) =
            watch::channel(Arc::new(AggregationState::empty(filter.range)));
        let (filter_tx, filter_rx) = watch::channel(filter.clone());
        let (merged, _) = broadcast::channel(256);

        let engine = Engine {
            store,
            policy: options.ingest_policy,
            active: filter,
            state_tx,
            filter_tx,
            merged: merged.clone(),
            done_tx,
            generation: 0,
            pending: None,
        };
        tokio::spawn(engine.run(command_rx, done_rx));

        Self {
            commands,
            state,
            filter: filter_rx,
            merged,
            max_range_days: options.max_range_days.max(1),
        }
    }

    /// Recompute every view for `filter` and swap the result in.
    ///
    /// Resolves once the new state is visible. A later call supersedes this
    /// one, in which case this resolves to [`EngineError::Superseded`].
    /// Ranges longer than the configured maximum are refused up front.
    pub async fn set_filter(&self, filter: Filter) -> Result<(), EngineError> {
        let days = filter.range.len_days();
        if days > self.max_range_days {
            return Err(EngineError::RangeTooLong {
                days,
                max: self.max_range_days,
            });
        }

        let (reply, rx) = oneshot::channel();
        self.commands
            .send(Command::SetFilter { filter, reply })
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)?
    }

    /// Queue one live event for merging.
    pub async fn ingest(&self, event: TrackingEvent) -> Result<(), EngineError> {
        self.commands
            .send(Command::Ingest(event))
            .await
            .map_err(|_| EngineError::Stopped)
    }

    /// The latest complete state.
    pub fn state(&self) -> Arc<AggregationState> {
        self.state.borrow().clone()
    }

    /// The filter of the latest completed recompute.
    pub fn filter(&self) -> Filter {
        self.filter.borrow().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<Arc<AggregationState>> {
        self.state.clone()
    }

    /// Every event that actually changed the state, in merge order.
    pub fn subscribe_merged(&self) -> broadcast::Receiver<Arc<TrackingEvent>> {
        self.merged.subscribe()
    }
}

// ── Actor ──────────────────────────────────────────────────────────────────

struct Recomputed {
    generation: u64,
    result: Result<Vec<TrackingEvent>, StoreError>,
}

/// A recompute whose fetch has not come back yet.
struct Pending {
    generation: u64,
    filter: Filter,
    fetch: JoinHandle<()>,
    reply: oneshot::Sender<Result<(), EngineError>>,
    /// Live events merged meanwhile, replayed onto the new state.
    backlog: Vec<TrackingEvent>,
}

struct Engine {
    store: Arc<dyn EventStore>,
    policy: IngestPolicy,
    active: Filter,
    state_tx: watch::Sender<Arc<AggregationState>>,
    filter_tx: watch::Sender<Filter>,
    merged: broadcast::Sender<Arc<TrackingEvent>>,
    done_tx: mpsc::UnboundedSender<Recomputed>,
    generation: u64,
    pending: Option<Pending>,
}

impl Engine {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut done: mpsc::UnboundedReceiver<Recomputed>,
    ) {
        loop {
            tokio::select! {
                // Completed fetches first, so a swap is never starved by a busy feed.
                biased;
                Some(recomputed) = done.recv() => self.finish_recompute(recomputed),
                cmd = commands.recv() => match cmd {
                    Some(Command::SetFilter { filter, reply }) => self.start_recompute(filter, reply),
                    Some(Command::Ingest(event)) => self.ingest(event),
                    None => break,
                },
            }
        }

        if let Some(pending) = self.pending.take() {
            pending.fetch.abort();
        }
        tracing::info!("Aggregation engine stopped");
    }

    fn start_recompute(
        &mut self,
        filter: Filter,
        reply: oneshot::Sender<Result<(), EngineError>>,
    ) {
        self.generation += 1;
        let generation = self.generation;

        // Last filter wins: stop the stale fetch and tell its caller.
        let backlog = match self.pending.take() {
            Some(stale) => {
                stale.fetch.abort();
                let _ = stale.reply.send(Err(EngineError::Superseded));
                tracing::debug!("Recompute #{} superseded by #{}", stale.generation, generation);
                stale.backlog
            }
            None => Vec::new(),
        };

        let store = self.store.clone();
        let done_tx = self.done_tx.clone();
        let query_filter = filter.clone();
        let fetch = tokio::spawn(async move {
            let result = store
                .query(&query_filter.range, &query_filter.event_types)
                .await;
            let _ = done_tx.send(Recomputed { generation, result });
        });

        tracing::debug!(
            "Recompute #{} started for {}..={}",
            generation,
            filter.range.start(),
            filter.range.end()
        );

        self.pending = Some(Pending {
            generation,
            filter,
            fetch,
            reply,
            backlog,
        });
    }

    fn finish_recompute(&mut self, recomputed: Recomputed) {
        let pending = match self.pending.take() {
            Some(p) if p.generation == recomputed.generation => p,
            other => {
                self.pending = other;
                tracing::debug!("Discarding stale recompute #{}", recomputed.generation);
                return;
            }
        };

        match recomputed.result {
            Ok(events) => {
                let mut state = AggregationState::recompute(&events, pending.filter.range);
                let mut replayed = 0usize;
                for event in &pending.backlog {
                    if self.policy.admits(&pending.filter, event) && state.merge_one(event) {
                        replayed += 1;
                    }
                }

                self.active = pending.filter.clone();
                self.state_tx.send_replace(Arc::new(state));
                self.filter_tx.send_replace(pending.filter);

                tracing::info!(
                    "Recomputed views from {} event(s), {} live event(s) replayed",
                    events.len(),
                    replayed
                );
                let _ = pending.reply.send(Ok(()));
            }
            Err(e) => {
                // The previous state stays; live merges already reached it.
                tracing::error!("Recompute #{} failed: {}", recomputed.generation, e);
                let _ = pending.reply.send(Err(EngineError::Store(e)));
            }
        }
    }

    fn ingest(&mut self, event: TrackingEvent) {
        if !self.policy.admits(&self.active, &event) {
            tracing::debug!(
                "Live event '{}' ({}) outside the active filter, skipped",
                event.id,
                event.event_type
            );
        } else {
            let mut changed = false;
            self.state_tx.send_if_modified(|state| {
                changed = Arc::make_mut(state).merge_one(&event);
                changed
            });
            if changed {
                tracing::debug!("Merged live event '{}' ({})", event.id, event.event_type);
                let _ = self.merged.send(Arc::new(event.clone()));
            } else {
                tracing::debug!("Live event '{}' already counted", event.id);
            }
        }

        if let Some(pending) = self.pending.as_mut() {
            pending.backlog.push(event);
        }
    }
}

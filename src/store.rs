use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::{
    error::StoreError,
    models::{DateRange, EventType, EventTypeSet, TrackingEvent},
};

/// Read side of the record store holding tracking events.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Every event whose date falls in `range` and whose type is in `event_types`.
    async fn query(
        &self,
        range: &DateRange,
        event_types: &EventTypeSet,
    ) -> Result<Vec<TrackingEvent>, StoreError>;

    /// One event by id, with the owning quotation's customer name resolved.
    async fn fetch_by_id(&self, id: &str) -> Result<TrackingEvent, StoreError>;
}

// ── SQLite ─────────────────────────────────────────────────────────────────

const SELECT_EVENTS: &str = "SELECT e.id, e.quotation_id, e.recipient_email, e.event_type,
        e.event_date, e.ip_address, e.user_agent, q.customer_name
 FROM tracking_events e
 LEFT JOIN quotations q ON q.id = e.quotation_id";

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: String,
    quotation_id: String,
    recipient_email: String,
    event_type: String,
    event_date: i64,
    ip_address: Option<String>,
    user_agent: Option<String>,
    customer_name: Option<String>,
}

impl TryFrom<EventRow> for TrackingEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let event_type: EventType = row.event_type.parse()?;
        let event_date =
            DateTime::<Utc>::from_timestamp(row.event_date, 0).ok_or(StoreError::BadTimestamp {
                id: row.id.clone(),
                secs: row.event_date,
            })?;

        Ok(TrackingEvent {
            id: row.id,
            quotation_id: row.quotation_id,
            recipient_email: row.recipient_email,
            event_type,
            event_date,
            ip_address: row.ip_address,
            user_agent: row.user_agent,
            customer_name: row.customer_name,
        })
    }
}

/// `EventStore` over the `tracking_events` / `quotations` tables.
#[derive(Clone, Debug)]
pub struct SqliteEventStore {
    pool: SqlitePool,
}

impl SqliteEventStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl EventStore for SqliteEventStore {
    async fn query(
        &self,
        range: &DateRange,
        event_types: &EventTypeSet,
    ) -> Result<Vec<TrackingEvent>, StoreError> {
        if event_types.is_empty() {
            return Ok(Vec::new());
        }

        let (from, until) = range.bounds();

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(SELECT_EVENTS);
        qb.push(" WHERE e.event_date >= ")
            .push_bind(from.timestamp())
            .push(" AND e.event_date < ")
            .push_bind(until.timestamp())
            .push(" AND e.event_type IN (");
        let mut types = qb.separated(", ");
        for t in event_types.iter() {
            types.push_bind(t.as_str());
        }
        types.push_unseparated(")");
        qb.push(" ORDER BY e.event_date, e.rowid");

        let rows: Vec<EventRow> = qb.build_query_as().fetch_all(&self.pool).await?;

        let events = rows
            .into_iter()
            .map(TrackingEvent::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        tracing::debug!(
            "Loaded {} tracking event(s) for {}..={}",
            events.len(),
            range.start(),
            range.end()
        );
        Ok(events)
    }

    async fn fetch_by_id(&self, id: &str) -> Result<TrackingEvent, StoreError> {
        let row: Option<EventRow> = sqlx::query_as(&format!("{SELECT_EVENTS} WHERE e.id = ?1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => row.try_into(),
            None => Err(StoreError::NotFound(id.to_owned())),
        }
    }
}

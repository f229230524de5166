use std::{collections::BTreeSet, fmt, str::FromStr};

use chrono::{DateTime, Days, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, StoreError};

// ── Event type ─────────────────────────────────────────────────────────────

/// What happened to a quotation email. The set is closed: anything else
/// coming out of the record store is an error, never an "unknown" bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Sent,
    Opened,
    Clicked,
    Downloaded,
}

impl EventType {
    pub const ALL: [EventType; 4] = [
        EventType::Sent,
        EventType::Opened,
        EventType::Clicked,
        EventType::Downloaded,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Sent => "sent",
            EventType::Opened => "opened",
            EventType::Clicked => "clicked",
            EventType::Downloaded => "downloaded",
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(EventType::Sent),
            "opened" => Ok(EventType::Opened),
            "clicked" => Ok(EventType::Clicked),
            "downloaded" => Ok(EventType::Downloaded),
            other => Err(StoreError::UnknownEventType(other.to_owned())),
        }
    }
}

/// The event types a recompute (and, under `follow-filter`, an ingest) accepts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventTypeSet(BTreeSet<EventType>);

impl EventTypeSet {
    pub fn all() -> Self {
        Self(EventType::ALL.into_iter().collect())
    }

    pub fn contains(&self, event_type: EventType) -> bool {
        self.0.contains(&event_type)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = EventType> + '_ {
        self.0.iter().copied()
    }
}

impl Default for EventTypeSet {
    fn default() -> Self {
        Self::all()
    }
}

impl FromIterator<EventType> for EventTypeSet {
    fn from_iter<I: IntoIterator<Item = EventType>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

// ── Tracking event ─────────────────────────────────────────────────────────

/// One observed interaction with a quotation email, as read back from the
/// record store. `customer_name` is resolved from the owning quotation at
/// fetch time and is `None` when that quotation no longer exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackingEvent {
    pub id: String,
    pub quotation_id: String,
    pub recipient_email: String,
    pub event_type: EventType,
    pub event_date: DateTime<Utc>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub customer_name: Option<String>,
}

impl TrackingEvent {
    /// The customer name, treating an empty string like a missing one.
    pub fn resolved_customer(&self) -> Option<&str> {
        self.customer_name
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}

// ── Date range / filter ────────────────────────────────────────────────────

/// Inclusive range of calendar days (UTC). Built through [`DateRange::new`]
/// so `start <= end` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, EngineError> {
        if start > end {
            return Err(EngineError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    /// The `days` calendar days ending on `today`, inclusive.
    pub fn last_days(today: NaiveDate, days: u32) -> Self {
        let start = today
            .checked_sub_days(Days::new(u64::from(days.max(1) - 1)))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end: today }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    /// Every day in the range, in order.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }

    pub fn len_days(&self) -> usize {
        (self.end - self.start).num_days() as usize + 1
    }

    /// Half-open `[start 00:00, end+1 00:00)` bounds in UTC.
    pub fn bounds(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let from = self.start.and_time(chrono::NaiveTime::MIN).and_utc();
        let until = self
            .end
            .succ_opt()
            .map(|d| d.and_time(chrono::NaiveTime::MIN).and_utc())
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        (from, until)
    }
}

/// Range plus event types: the input of a full recompute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Filter {
    pub range: DateRange,
    pub event_types: EventTypeSet,
}

impl Filter {
    pub fn new(range: DateRange, event_types: EventTypeSet) -> Self {
        Self { range, event_types }
    }
}

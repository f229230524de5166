//! The seven engagement views and the two ways of producing them.
//!
//! Every view stores counts only. Percentages and engagement rates are
//! derived when a report is built, so a merge can never leave a stale
//! percentage behind.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Datelike, NaiveDate, Timelike, Utc, Weekday};
use serde::Serialize;

use crate::{
    classify::{classify_browser, classify_device, Browser, DeviceType},
    models::{DateRange, EventType, TrackingEvent},
};

// ── Counters ───────────────────────────────────────────────────────────────

/// Per-type counters. All four keys always exist.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventCounts([u64; 4]);

impl EventCounts {
    pub fn get(&self, event_type: EventType) -> u64 {
        self.0[event_type.index()]
    }

    pub fn total(&self) -> u64 {
        self.0.iter().sum()
    }

    fn bump(&mut self, event_type: EventType) {
        self.0[event_type.index()] += 1;
    }
}

impl Serialize for EventCounts {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(4))?;
        for t in EventType::ALL {
            map.serialize_entry(t.as_str(), &self.get(t))?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotationEngagement {
    pub customer_name: String,
    pub counts: EventCounts,
}

impl QuotationEngagement {
    /// `(opened + clicked + downloaded) / (sent * 3) * 100`, or 0 with nothing sent.
    pub fn engagement_rate(&self) -> f64 {
        let sent = self.counts.get(EventType::Sent);
        if sent == 0 {
            return 0.0;
        }
        let engaged = self.counts.get(EventType::Opened)
            + self.counts.get(EventType::Clicked)
            + self.counts.get(EventType::Downloaded);
        engaged as f64 / (sent * 3) as f64 * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecipientEngagement {
    pub counts: EventCounts,
    pub last_activity: DateTime<Utc>,
}

impl RecipientEngagement {
    pub fn total_events(&self) -> u64 {
        self.counts.total()
    }
}

// ── State ──────────────────────────────────────────────────────────────────

/// All seven views, always updated together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationState {
    range: DateRange,
    event_counts: EventCounts,
    daily: BTreeMap<NaiveDate, u64>,
    quotations: HashMap<String, QuotationEngagement>,
    recipients: HashMap<String, RecipientEngagement>,
    browsers: [u64; 6],
    device_types: [u64; 3],
    hours: [u64; 24],
    weekdays: [u64; 7],
    /// Ids already folded in; a repeated id is ignored.
    seen: HashSet<String>,
}

impl AggregationState {
    /// Zero-filled state for `range`.
    pub fn empty(range: DateRange) -> Self {
        Self {
            range,
            event_counts: EventCounts::default(),
            daily: range.days().map(|d| (d, 0)).collect(),
            quotations: HashMap::new(),
            recipients: HashMap::new(),
            browsers: [0; 6],
            device_types: [0; 3],
            hours: [0; 24],
            weekdays: [0; 7],
            seen: HashSet::new(),
        }
    }

    /// Build every view from scratch.
    pub fn recompute<'a, I>(events: I, range: DateRange) -> Self
    where
        I: IntoIterator<Item = &'a TrackingEvent>,
    {
        let mut state = Self::empty(range);
        for event in events {
            state.merge_one(event);
        }
        state
    }

    /// Fold a single event into all seven views. Returns `false` when the
    /// event id was already folded in and nothing changed.
    pub fn merge_one(&mut self, event: &TrackingEvent) -> bool {
        if !self.seen.insert(event.id.clone()) {
            return false;
        }

        self.event_counts.bump(event.event_type);

        // The displayed range is fixed: out-of-range days get no bucket.
        if let Some(count) = self.daily.get_mut(&event.event_date.date_naive()) {
            *count += 1;
        }

        // Only a resolvable quotation gets an entry; see DESIGN.md.
        if let Some(name) = event.resolved_customer() {
            let entry = self
                .quotations
                .entry(event.quotation_id.clone())
                .or_insert_with(|| QuotationEngagement {
                    customer_name: name.to_owned(),
                    counts: EventCounts::default(),
                });
            entry.counts.bump(event.event_type);
        }

        let recipient = self
            .recipients
            .entry(event.recipient_email.clone())
            .or_insert_with(|| RecipientEngagement {
                counts: EventCounts::default(),
                last_activity: event.event_date,
            });
        recipient.counts.bump(event.event_type);
        recipient.last_activity = recipient.last_activity.max(event.event_date);

        if let Some(ua) = event.user_agent.as_deref() {
            self.browsers[classify_browser(ua).index()] += 1;
            self.device_types[classify_device(ua).index()] += 1;
        }

        self.hours[event.event_date.hour() as usize] += 1;
        self.weekdays[event.event_date.weekday().num_days_from_monday() as usize] += 1;

        true
    }

    pub fn range(&self) -> DateRange {
        self.range
    }

    pub fn event_counts(&self) -> EventCounts {
        self.event_counts
    }

    pub fn daily(&self) -> impl Iterator<Item = (NaiveDate, u64)> + '_ {
        self.daily.iter().map(|(d, c)| (*d, *c))
    }

    pub fn quotation(&self, quotation_id: &str) -> Option<&QuotationEngagement> {
        self.quotations.get(quotation_id)
    }

    pub fn recipient(&self, email: &str) -> Option<&RecipientEngagement> {
        self.recipients.get(email)
    }

    pub fn hour_counts(&self) -> &[u64; 24] {
        &self.hours
    }

    pub fn weekday_counts(&self) -> &[u64; 7] {
        &self.weekdays
    }

    pub fn has_seen(&self, event_id: &str) -> bool {
        self.seen.contains(event_id)
    }

    /// Render the state with every derived figure filled in.
    pub fn report(&self) -> StateReport {
        let mut quotations: Vec<QuotationReport> = self
            .quotations
            .iter()
            .map(|(id, q)| QuotationReport {
                quotation_id: id.clone(),
                customer_name: q.customer_name.clone(),
                sent: q.counts.get(EventType::Sent),
                opened: q.counts.get(EventType::Opened),
                clicked: q.counts.get(EventType::Clicked),
                downloaded: q.counts.get(EventType::Downloaded),
                engagement_rate: q.engagement_rate(),
            })
            .collect();
        quotations.sort_by(|a, b| {
            b.engagement_rate
                .total_cmp(&a.engagement_rate)
                .then_with(|| a.quotation_id.cmp(&b.quotation_id))
        });

        let mut recipients: Vec<RecipientReport> = self
            .recipients
            .iter()
            .map(|(email, r)| RecipientReport {
                recipient_email: email.clone(),
                total_events: r.total_events(),
                counts: r.counts,
                last_activity: r.last_activity,
            })
            .collect();
        recipients.sort_by(|a, b| {
            b.total_events
                .cmp(&a.total_events)
                .then_with(|| a.recipient_email.cmp(&b.recipient_email))
        });

        let browser_total: u64 = self.browsers.iter().sum();
        let mut browsers: Vec<Share> = Browser::ALL
            .iter()
            .filter(|b| self.browsers[b.index()] > 0)
            .map(|b| Share::of(b.label(), self.browsers[b.index()], browser_total))
            .collect();
        // Stable sort keeps the label order for ties.
        browsers.sort_by(|a, b| b.count.cmp(&a.count));

        let device_total: u64 = self.device_types.iter().sum();
        let device_types = DeviceType::ALL
            .iter()
            .map(|d| Share::of(d.label(), self.device_types[d.index()], device_total))
            .collect();

        let weekday_total: u64 = self.weekdays.iter().sum();
        let weekdays = WEEKDAYS
            .iter()
            .zip(self.weekdays.iter())
            .map(|(day, count)| Share::of(weekday_label(*day), *count, weekday_total))
            .collect();

        StateReport {
            start: self.range.start(),
            end: self.range.end(),
            event_counts: self.event_counts,
            daily: self
                .daily()
                .map(|(date, count)| DailyPoint { date, count })
                .collect(),
            quotations,
            recipients,
            browsers,
            device_types,
            hours: self
                .hours
                .iter()
                .enumerate()
                .map(|(hour, count)| HourPoint {
                    hour: hour as u32,
                    count: *count,
                })
                .collect(),
            weekdays,
        }
    }
}

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn weekday_label(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}

// ── Reports ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct StateReport {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub event_counts: EventCounts,
    pub daily: Vec<DailyPoint>,
    pub quotations: Vec<QuotationReport>,
    pub recipients: Vec<RecipientReport>,
    pub browsers: Vec<Share>,
    pub device_types: Vec<Share>,
    pub hours: Vec<HourPoint>,
    pub weekdays: Vec<Share>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DailyPoint {
    pub date: NaiveDate,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct HourPoint {
    pub hour: u32,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct QuotationReport {
    pub quotation_id: String,
    pub customer_name: String,
    pub sent: u64,
    pub opened: u64,
    pub clicked: u64,
    pub downloaded: u64,
    pub engagement_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecipientReport {
    pub recipient_email: String,
    pub total_events: u64,
    pub counts: EventCounts,
    pub last_activity: DateTime<Utc>,
}

/// A labelled count with its share of the classified total.
#[derive(Debug, Clone, Serialize)]
pub struct Share {
    pub label: &'static str,
    pub count: u64,
    pub percentage: f64,
}

impl Share {
    fn of(label: &'static str, count: u64, total: u64) -> Self {
        let percentage = if total > 0 {
            count as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        Self {
            label,
            count,
            percentage,
        }
    }
}

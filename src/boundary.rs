use std::{fmt, str::FromStr, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};

use crate::{
    engine::EngineHandle,
    error::EngineError,
    models::{EventType, Filter, TrackingEvent},
    projections::{AggregationState, Share, StateReport},
};

/// Read-only access to the engine's views for presentation and export.
/// Filter changes are forwarded to the engine as-is.
#[derive(Clone)]
pub struct AnalyticsService {
    engine: EngineHandle,
}

impl AnalyticsService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }

    pub fn get_state(&self) -> Arc<AggregationState> {
        self.engine.state()
    }

    pub fn report(&self) -> StateReport {
        self.engine.state().report()
    }

    pub fn current_filter(&self) -> Filter {
        self.engine.filter()
    }

    pub async fn set_filter(&self, filter: Filter) -> Result<(), EngineError> {
        self.engine.set_filter(filter).await
    }

    /// Call `callback` for every event merged from now on. The returned task
    /// ends when the engine stops; abort it to unregister.
    pub fn on_new_event<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(&TrackingEvent) + Send + 'static,
    {
        let mut merged = self.engine.subscribe_merged();
        tokio::spawn(async move {
            loop {
                match merged.recv().await {
                    Ok(event) => callback(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("New-event listener lagged, {} event(s) skipped", skipped);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }

    pub fn subscribe_merged(&self) -> tokio::sync::broadcast::Receiver<Arc<TrackingEvent>> {
        self.engine.subscribe_merged()
    }

    /// One view as header + string rows, for an external CSV/file writer.
    pub fn export_rows(&self, view: ExportView) -> ExportTable {
        export_table(&self.engine.state().report(), view)
    }
}

// ── Export ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExportView {
    Counts,
    Daily,
    Quotations,
    Recipients,
    Browsers,
    Devices,
    Hours,
    Weekdays,
}

impl ExportView {
    pub const ALL: [ExportView; 8] = [
        ExportView::Counts,
        ExportView::Daily,
        ExportView::Quotations,
        ExportView::Recipients,
        ExportView::Browsers,
        ExportView::Devices,
        ExportView::Hours,
        ExportView::Weekdays,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportView::Counts => "counts",
            ExportView::Daily => "daily",
            ExportView::Quotations => "quotations",
            ExportView::Recipients => "recipients",
            ExportView::Browsers => "browsers",
            ExportView::Devices => "devices",
            ExportView::Hours => "hours",
            ExportView::Weekdays => "weekdays",
        }
    }
}

impl fmt::Display for ExportView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportView {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExportView::ALL
            .into_iter()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| format!("unknown export view '{s}'"))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportTable {
    pub view: ExportView,
    pub headers: Vec<&'static str>,
    pub rows: Vec<Vec<String>>,
}

fn share_rows(shares: &[Share]) -> Vec<Vec<String>> {
    shares
        .iter()
        .map(|s| {
            vec![
                s.label.to_owned(),
                s.count.to_string(),
                format!("{:.2}", s.percentage),
            ]
        })
        .collect()
}

fn export_table(report: &StateReport, view: ExportView) -> ExportTable {
    let (headers, rows) = match view {
        ExportView::Counts => (
            vec!["event_type", "count"],
            EventType::ALL
                .iter()
                .map(|t| vec![t.to_string(), report.event_counts.get(*t).to_string()])
                .collect(),
        ),
        ExportView::Daily => (
            vec!["date", "count"],
            report
                .daily
                .iter()
                .map(|p| vec![p.date.to_string(), p.count.to_string()])
                .collect(),
        ),
        ExportView::Quotations => (
            vec![
                "quotation_id",
                "customer_name",
                "sent",
                "opened",
                "clicked",
                "downloaded",
                "engagement_rate",
            ],
            report
                .quotations
                .iter()
                .map(|q| {
                    vec![
                        q.quotation_id.clone(),
                        q.customer_name.clone(),
                        q.sent.to_string(),
                        q.opened.to_string(),
                        q.clicked.to_string(),
                        q.downloaded.to_string(),
                        format!("{:.2}", q.engagement_rate),
                    ]
                })
                .collect(),
        ),
        ExportView::Recipients => (
            vec![
                "recipient_email",
                "total_events",
                "sent",
                "opened",
                "clicked",
                "downloaded",
                "last_activity",
            ],
            report
                .recipients
                .iter()
                .map(|r| {
                    let mut row = vec![r.recipient_email.clone(), r.total_events.to_string()];
                    row.extend(EventType::ALL.iter().map(|t| r.counts.get(*t).to_string()));
                    row.push(r.last_activity.to_rfc3339());
                    row
                })
                .collect(),
        ),
        ExportView::Browsers => (vec!["browser", "count", "percentage"], share_rows(&report.browsers)),
        ExportView::Devices => (
            vec!["device_type", "count", "percentage"],
            share_rows(&report.device_types),
        ),
        ExportView::Hours => (
            vec!["hour", "count"],
            report
                .hours
                .iter()
                .map(|h| vec![h.hour.to_string(), h.count.to_string()])
                .collect(),
        ),
        ExportView::Weekdays => (
            vec!["weekday", "count", "percentage"],
            share_rows(&report.weekdays),
        ),
    };

    ExportTable {
        view,
        headers,
        rows,
    }
}

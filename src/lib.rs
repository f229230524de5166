//! Engagement analytics for quotation emails.
//!
//! Tracking events (sent / opened / clicked / downloaded) are folded into
//! seven views, either rebuilt from the record store for a date range or
//! updated one event at a time from a live feed.

use std::sync::Arc;

pub mod boundary;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod feed;
pub mod handlers;
pub mod models;
pub mod projections;
pub mod store;

// ── Shared application state ───────────────────────────────────────────────

pub struct AppState {
    pub analytics: boundary::AnalyticsService,
    pub feed: Arc<feed::FeedManager>,
}

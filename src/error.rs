use chrono::NaiveDate;

/// Failures of the record store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("tracking event '{0}' not found")]
    NotFound(String),

    #[error("unknown event type '{0}'")]
    UnknownEventType(String),

    #[error("event '{id}' has an out-of-range timestamp {secs}")]
    BadTimestamp { id: String, secs: i64 },

    #[error("{0}")]
    Unavailable(String),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("recompute failed: {0}")]
    Store(#[from] StoreError),

    #[error("recompute superseded by a newer filter")]
    Superseded,

    #[error("aggregation engine has stopped")]
    Stopped,

    #[error("invalid date range: {start} is after {end}")]
    InvalidRange { start: NaiveDate, end: NaiveDate },

    #[error("date range spans {days} days, at most {max} are allowed")]
    RangeTooLong { days: usize, max: usize },
}

/// Failures reported by the feed subscription manager. Cloneable so every
/// listener on the error broadcast gets its own copy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    #[error("live feed transport failed: {0}")]
    Transport(String),

    #[error("failed to fetch tracking event '{id}': {reason}")]
    Fetch { id: String, reason: String },

    #[error("aggregation engine has stopped")]
    EngineStopped,

    #[error("a live feed subscription is already active")]
    AlreadySubscribed,

    #[error("live feed is in error, reconnect before subscribing again")]
    ReconnectRequired,
}

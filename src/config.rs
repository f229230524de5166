use std::time::Duration;

use anyhow::{Context, Result};

use crate::engine::{EngineOptions, IngestPolicy};

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// SQLite connection string, e.g. "sqlite:./quotelens.db"
    pub database_url: String,

    /// Host to bind the HTTP server to, e.g. "0.0.0.0"
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Length of the initial date range: the last N days ending today (UTC).
    pub default_range_days: u32,

    /// How often the SQLite live feed looks for new tracking events.
    pub feed_poll_interval: Duration,

    /// Bound of the aggregation engine's command queue.
    pub engine_queue_capacity: usize,

    /// Whether live events honour the active event-type filter.
    pub ingest_policy: IngestPolicy,

    /// Longest date range a filter change may request.
    pub max_range_days: u32,
}

impl AppConfig {
    /// Load configuration from environment variables (populated by dotenvy before this is called).
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let port = var("PORT")
            .unwrap_or_else(|| "3000".into())
            .parse::<u16>()
            .context("PORT must be a valid port number (1-65535)")?;

        let default_range_days = var("DEFAULT_RANGE_DAYS")
            .unwrap_or_else(|| "30".into())
            .parse::<u32>()
            .context("DEFAULT_RANGE_DAYS must be a positive number of days")?;
        if default_range_days == 0 {
            anyhow::bail!("DEFAULT_RANGE_DAYS must be at least 1");
        }

        let max_range_days = var("MAX_RANGE_DAYS")
            .unwrap_or_else(|| "366".into())
            .parse::<u32>()
            .context("MAX_RANGE_DAYS must be a positive number of days")?;
        if max_range_days < default_range_days {
            anyhow::bail!(
                "MAX_RANGE_DAYS ({}) must not be shorter than DEFAULT_RANGE_DAYS ({})",
                max_range_days,
                default_range_days
            );
        }

        let feed_poll_interval_ms = var("FEED_POLL_INTERVAL_MS")
            .unwrap_or_else(|| "1000".into())
            .parse::<u64>()
            .context("FEED_POLL_INTERVAL_MS must be a number of milliseconds")?;

        let engine_queue_capacity = var("ENGINE_QUEUE_CAPACITY")
            .unwrap_or_else(|| "1024".into())
            .parse::<usize>()
            .context("ENGINE_QUEUE_CAPACITY must be a positive integer")?;

        let ingest_policy = var("INGEST_POLICY")
            .unwrap_or_else(|| "follow-filter".into())
            .parse::<IngestPolicy>()
            .map_err(anyhow::Error::msg)
            .context("INGEST_POLICY must be 'follow-filter' or 'bypass-filter'")?;

        Ok(Self {
            database_url: var("DATABASE_URL").unwrap_or_else(|| "sqlite:./quotelens.db".into()),
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".into()),
            port,
            default_range_days,
            feed_poll_interval: Duration::from_millis(feed_poll_interval_ms.max(10)),
            engine_queue_capacity: engine_queue_capacity.max(1),
            ingest_policy,
            max_range_days,
        })
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            queue_capacity: self.engine_queue_capacity,
            ingest_policy: self.ingest_policy,
            max_range_days: self.max_range_days as usize,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

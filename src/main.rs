use std::sync::Arc;

use sqlx::sqlite::SqlitePoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use quotelens::{
    boundary::AnalyticsService,
    config::AppConfig,
    engine::EngineHandle,
    feed::{FeedManager, SqliteFeed},
    handlers,
    models::{DateRange, EventTypeSet, Filter},
    store::{EventStore, SqliteEventStore},
    AppState,
};

// ── Entry point ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env (the file is optional, env vars may already be set)
    dotenvy::dotenv().ok();

    // Initialise structured logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "quotelens=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    tracing::info!("Starting quotelens on {}", config.bind_addr());

    let db = SqlitePoolOptions::new()
        .max_connections(10)
        .connect_with(
            config
                .database_url
                .parse::<sqlx::sqlite::SqliteConnectOptions>()?
                .create_if_missing(true)
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal),
        )
        .await?;

    sqlx::migrate!("./migrations").run(&db).await?;
    tracing::info!("Database migrations applied");

    // ── Engine + live feed ─────────────────────────────────────────────────
    let store: Arc<dyn EventStore> = Arc::new(SqliteEventStore::new(db.clone()));
    let today = chrono::Utc::now().date_naive();
    let initial = Filter::new(
        DateRange::last_days(today, config.default_range_days),
        EventTypeSet::all(),
    );

    let engine = EngineHandle::spawn(store.clone(), initial.clone(), config.engine_options());
    engine.set_filter(initial).await?;
    tracing::info!(
        "Loaded the last {} day(s) of tracking events",
        config.default_range_days
    );

    let transport = Arc::new(SqliteFeed::new(db, config.feed_poll_interval));
    let feed = Arc::new(FeedManager::new(transport, store, engine.clone()));
    // A feed failure leaves the views usable; the status endpoint reports it.
    if let Err(e) = feed.subscribe().await {
        tracing::error!("Live feed unavailable: {}", e);
    }

    let state = Arc::new(AppState {
        analytics: AnalyticsService::new(engine),
        feed,
    });

    // ── Serve ──────────────────────────────────────────────────────────────
    let app = handlers::router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr()).await?;
    tracing::info!("Listening on http://{}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}

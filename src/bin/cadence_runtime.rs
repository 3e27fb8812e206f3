//! Cadence Runtime
//!
//! Runs the two background loops against one SQLite file:
//! - ingestion: feed pages → event store, then eviction
//! - aggregation: event store → published interval stats
//!
//! Usage:
//!   cargo run --release --bin cadence_runtime
//!
//! Environment variables (see `AppConfig`):
//!   GITHUB_REPOSITORIES - repositories to watch (required)
//!   GITHUB_AUTHENTICATION_TOKENS - one token per repository (required)
//!   EVENTS_DB_PATH - SQLite database path (default: data/github_events.db)
//!   RUST_LOG - log filter (default: info)

use dotenv::dotenv;
use event_cadence::aggregator::{AggregatorSettings, StatsAggregator, StatsHandle};
use event_cadence::config::AppConfig;
use event_cadence::feed::GithubFeedClient;
use event_cadence::pipeline::{run_ingestion_loop, IngestionPipeline};
use event_cadence::shutdown::sleep_or_shutdown;
use event_cadence::store::EventStore;
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Logs a one-line summary per repository whenever a new snapshot appears
async fn report_stats(stats: StatsHandle, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut last_seen = None;

    while sleep_or_shutdown(interval, &mut shutdown).await {
        let current = stats.current().await;
        if current.last_refresh.is_none() || current.last_refresh == last_seen {
            continue;
        }
        last_seen = current.last_refresh;

        for (repository, keys) in &current.snapshot.repositories {
            if let Some(all) = keys.get(event_cadence::aggregator::ALL_EVENTS_KEY) {
                info!(
                    "📊 {} | avg {:.2}s over {} events | {} types",
                    repository,
                    all.average_interval_seconds,
                    all.sample_count,
                    keys.len() - 1
                );
            }
        }

        if log::log_enabled!(log::Level::Debug) {
            if let Some(report) = stats.report(None).await {
                match serde_json::to_string(&report) {
                    Ok(json) => log::debug!("{}", json),
                    Err(e) => warn!("⚠️  Failed to serialize stats report: {}", e),
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("🚀 Cadence Runtime");

    let config = AppConfig::from_env()?;

    info!("✅ Configuration loaded");
    info!("   ├─ Repositories: {}", config.repositories.join(", "));
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Window: {} days, {} samples per key", config.retention_days, config.max_samples_per_key);
    info!("   ├─ Ingestion every {}s", config.ingestion_interval.as_secs());
    info!("   └─ Aggregation every {}s", config.aggregation_interval.as_secs());

    let client = GithubFeedClient::from_config(&config)?;
    let pipeline = IngestionPipeline::new(client, &config)?;

    let mut store = EventStore::open(&config.db_path, config.retention_days)?;
    store.load_window_ids()?;

    let aggregator = Arc::new(StatsAggregator::new(AggregatorSettings::from_config(&config)));
    let stats = aggregator.stats();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let ingestion = tokio::spawn(run_ingestion_loop(
        pipeline,
        store,
        config.ingestion_interval,
        shutdown_rx.clone(),
    ));

    let Some(aggregation) = aggregator.start(shutdown_rx.clone()) else {
        return Err("aggregator failed to start".into());
    };

    let reporter = tokio::spawn(report_stats(stats, config.aggregation_interval, shutdown_rx));

    info!("✅ All background tasks running");
    info!("🔄 Press CTRL+C to shutdown gracefully");

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("⚠️  Received CTRL+C, shutting down..."),
        Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
    }

    if shutdown_tx.send(true).is_err() {
        warn!("⚠️  All loops already stopped");
    }

    let joined = tokio::time::timeout(config.shutdown_grace, async {
        let _ = tokio::join!(ingestion, aggregation, reporter);
    })
    .await;

    if joined.is_err() {
        warn!(
            "⚠️  Tasks did not stop within {}s, exiting anyway",
            config.shutdown_grace.as_secs()
        );
    }

    info!("✅ Cadence runtime stopped");
    Ok(())
}

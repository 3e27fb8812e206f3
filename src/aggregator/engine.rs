//! Aggregation refresh loop
//!
//! Each cycle scans the retention window on a blocking thread, folds it into
//! an [`IntervalAccumulator`] and publishes the result through the shared
//! [`StatsHandle`]. A failed cycle is logged and the previous snapshot keeps
//! serving.

use super::reader::WindowReader;
use super::snapshot::{StatSnapshot, StatsHandle};
use super::window::IntervalAccumulator;
use crate::config::AppConfig;
use crate::pipeline::types::retention_cutoff;
use crate::shutdown::{is_cancelled, sleep_or_shutdown};
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};

#[derive(Debug, Clone)]
pub struct AggregatorSettings {
    pub db_path: PathBuf,
    /// Only these repositories appear in published snapshots
    pub repositories: HashSet<String>,
    pub retention_days: i64,
    pub max_samples_per_key: usize,
    pub scan_chunk: usize,
    pub precision: u32,
    pub interval: Duration,
}

impl AggregatorSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            db_path: PathBuf::from(&config.db_path),
            repositories: config.repositories.iter().cloned().collect(),
            retention_days: config.retention_days,
            max_samples_per_key: config.max_samples_per_key,
            scan_chunk: config.scan_chunk,
            precision: config.precision,
            interval: config.aggregation_interval,
        }
    }
}

#[derive(Debug)]
pub enum AggregateError {
    Store(StoreError),
    Join(JoinError),
}

impl From<StoreError> for AggregateError {
    fn from(err: StoreError) -> Self {
        AggregateError::Store(err)
    }
}

impl From<JoinError> for AggregateError {
    fn from(err: JoinError) -> Self {
        AggregateError::Join(err)
    }
}

impl std::fmt::Display for AggregateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregateError::Store(e) => write!(f, "Window scan failed: {}", e),
            AggregateError::Join(e) => write!(f, "Snapshot task failed: {}", e),
        }
    }
}

impl std::error::Error for AggregateError {}

/// One point-in-time pass over the window ending at `now`
///
/// Blocking: opens its own read-only connection for the duration of the pass.
pub fn compute_snapshot(settings: &AggregatorSettings, now: DateTime<Utc>) -> Result<StatSnapshot, StoreError> {
    let cutoff = retention_cutoff(now, settings.retention_days);
    let mut reader = WindowReader::open(&settings.db_path, settings.scan_chunk)?;
    let mut accumulator = IntervalAccumulator::new(settings.max_samples_per_key);

    reader.scan(cutoff, |event| {
        accumulator.observe(&event.repository, &event.event_type, event.created_at.timestamp());
    })?;

    Ok(accumulator.finish(settings.precision, &settings.repositories))
}

pub struct StatsAggregator {
    settings: AggregatorSettings,
    stats: StatsHandle,
    started: AtomicBool,
}

impl StatsAggregator {
    pub fn new(settings: AggregatorSettings) -> Self {
        Self {
            settings,
            stats: StatsHandle::new(),
            started: AtomicBool::new(false),
        }
    }

    pub fn settings(&self) -> &AggregatorSettings {
        &self.settings
    }

    /// Read handle for consumers; clones share the published snapshot
    pub fn stats(&self) -> StatsHandle {
        self.stats.clone()
    }

    /// Compute and publish one snapshot
    ///
    /// On error nothing is published. Returns the number of repositories in
    /// the new snapshot.
    pub async fn refresh(&self) -> Result<usize, AggregateError> {
        let settings = self.settings.clone();
        let now = Utc::now();

        let snapshot = tokio::task::spawn_blocking(move || compute_snapshot(&settings, now)).await??;
        let repositories = snapshot.repositories.len();

        self.stats.publish(snapshot, Utc::now()).await;
        Ok(repositories)
    }

    /// Spawn the refresh loop
    ///
    /// Only the first call starts a loop; later calls log and return `None`.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if self.started.swap(true, Ordering::SeqCst) {
            log::warn!("⚠️  Aggregator already started, ignoring start request");
            return None;
        }

        let aggregator = Arc::clone(self);
        Some(tokio::spawn(async move { aggregator.run(shutdown).await }))
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let interval = self.settings.interval;
        log::info!("⏰ Starting aggregator (interval: {}s)", interval.as_secs());
        log::info!(
            "   └─ Window: {} days, max {} samples per key",
            self.settings.retention_days,
            self.settings.max_samples_per_key
        );

        loop {
            if is_cancelled(&shutdown) {
                break;
            }

            let cycle_start = Instant::now();

            match self.refresh().await {
                Ok(repositories) => {
                    log::info!(
                        "📈 Stats refreshed: {} repositories | {}ms",
                        repositories,
                        cycle_start.elapsed().as_millis()
                    );
                }
                Err(e) => {
                    log::error!("❌ Stats refresh failed, keeping previous snapshot: {}", e);
                }
            }

            let remaining = interval.saturating_sub(cycle_start.elapsed());
            if !sleep_or_shutdown(remaining, &mut shutdown).await {
                break;
            }
        }

        log::info!("✅ Aggregator stopped");
    }
}

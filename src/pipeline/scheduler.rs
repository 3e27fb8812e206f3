//! Ingestion loop - periodic collect, persist and evict
//!
//! Each cycle:
//! 1. Collect new events from the feed (dedup against the store's cache)
//! 2. Insert them as one transaction
//! 3. Evict rows that left the retention window
//!
//! Persistence failures are logged and retried implicitly on the next cycle:
//! the failed batch was rolled back, so its ids are still unknown and get
//! fetched again.

use super::ingestion::{IngestError, IngestionPipeline};
use crate::feed::EventFeed;
use crate::shutdown::{is_cancelled, sleep_or_shutdown};
use crate::store::EventStore;
use std::time::{Duration, Instant};
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub collected: usize,
    pub inserted: usize,
    pub evicted: usize,
}

/// Run one ingestion cycle against `store`
///
/// Only a shutdown request is returned as an error; persistence errors are
/// logged and reflected as zero counts.
pub async fn run_ingestion_cycle<F: EventFeed>(
    pipeline: &IngestionPipeline<F>,
    store: &mut EventStore,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<CycleSummary, IngestError> {
    let events = pipeline.collect(&*store, shutdown).await?;

    let inserted = match store.insert_new(&events) {
        Ok(ids) => ids.len(),
        Err(e) => {
            log::error!("❌ Failed to persist {} events, batch rolled back: {}", events.len(), e);
            0
        }
    };

    let evicted = match store.evict_expired() {
        Ok(count) => count,
        Err(e) => {
            log::error!("❌ Failed to evict expired events: {}", e);
            0
        }
    };

    Ok(CycleSummary {
        collected: events.len(),
        inserted,
        evicted,
    })
}

/// Ingestion task - runs cycles at `interval` until shutdown
///
/// A cycle longer than `interval` is followed immediately by the next one;
/// otherwise the loop sleeps the remainder. The sleep is interrupted by
/// shutdown, and so is a cycle waiting on the network.
pub async fn run_ingestion_loop<F: EventFeed>(
    pipeline: IngestionPipeline<F>,
    mut store: EventStore,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    log::info!("⏰ Starting ingestion loop (interval: {}s)", interval.as_secs());
    log::info!("   └─ Repositories: {}", pipeline.targets().len());

    loop {
        if is_cancelled(&shutdown) {
            break;
        }

        let cycle_start = Instant::now();

        match run_ingestion_cycle(&pipeline, &mut store, &mut shutdown).await {
            Ok(summary) => {
                log::info!(
                    "📊 Ingestion cycle complete: {} collected, {} inserted, {} evicted | {}ms",
                    summary.collected,
                    summary.inserted,
                    summary.evicted,
                    cycle_start.elapsed().as_millis()
                );
            }
            Err(IngestError::Cancelled) => break,
            Err(e) => {
                log::error!("❌ Ingestion cycle failed: {}", e);
            }
        }

        let remaining = interval.saturating_sub(cycle_start.elapsed());
        if !sleep_or_shutdown(remaining, &mut shutdown).await {
            break;
        }
    }

    log::info!("✅ Ingestion loop stopped");
}

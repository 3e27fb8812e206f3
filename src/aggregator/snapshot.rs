//! Published statistics and their read side
//!
//! The refresh loop builds a complete [`StatSnapshot`] off-lock and swaps it
//! in together with the completion time. Readers clone two `Arc`s under the
//! read lock, so they always hold either the previous or the new snapshot,
//! never a mix.

use super::window::ALL_EVENTS_KEY;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct KeyStats {
    pub average_interval_seconds: f64,
    /// Events behind the average, anchor included
    pub sample_count: usize,
}

/// repository → stat key (`"all"` or an event type) → stats
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatSnapshot {
    pub repositories: BTreeMap<String, BTreeMap<String, KeyStats>>,
}

impl StatSnapshot {
    pub fn repository(&self, repository: &str) -> Option<&BTreeMap<String, KeyStats>> {
        self.repositories.get(repository)
    }

    pub fn get(&self, repository: &str, key: &str) -> Option<&KeyStats> {
        self.repository(repository).and_then(|keys| keys.get(key))
    }

    pub fn is_empty(&self) -> bool {
        self.repositories.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PublishedStats {
    pub snapshot: Arc<StatSnapshot>,
    /// `None` until the first refresh completes
    pub last_refresh: Option<DateTime<Utc>>,
}

/// Stats entry in the facade response
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StatEntry {
    pub consecutive_events_average_s: f64,
    pub total_events: usize,
}

impl From<&KeyStats> for StatEntry {
    fn from(stats: &KeyStats) -> Self {
        Self {
            consecutive_events_average_s: stats.average_interval_seconds,
            total_events: stats.sample_count,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepositoryReport {
    pub all_actions: StatEntry,
    pub event_type: BTreeMap<String, StatEntry>,
}

/// Response shape consumed by the query facade
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsecutiveStatsReport {
    pub last_refresh: Option<String>,
    pub repositories: BTreeMap<String, RepositoryReport>,
}

fn repository_report(keys: &BTreeMap<String, KeyStats>) -> RepositoryReport {
    let mut report = RepositoryReport::default();
    for (key, stats) in keys {
        if key == ALL_EVENTS_KEY {
            report.all_actions = stats.into();
        } else {
            report.event_type.insert(key.clone(), stats.into());
        }
    }
    report
}

/// Cloneable read handle onto the latest published snapshot
#[derive(Debug, Clone)]
pub struct StatsHandle {
    inner: Arc<RwLock<PublishedStats>>,
}

impl Default for StatsHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsHandle {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(PublishedStats {
                snapshot: Arc::new(StatSnapshot::default()),
                last_refresh: None,
            })),
        }
    }

    pub async fn current(&self) -> PublishedStats {
        self.inner.read().await.clone()
    }

    pub async fn last_refresh(&self) -> Option<DateTime<Utc>> {
        self.inner.read().await.last_refresh
    }

    /// Replace the snapshot and completion time in one step
    pub(crate) async fn publish(&self, snapshot: StatSnapshot, completed_at: DateTime<Utc>) {
        let published = PublishedStats {
            snapshot: Arc::new(snapshot),
            last_refresh: Some(completed_at),
        };
        *self.inner.write().await = published;
    }

    /// Facade view of all repositories, or of one
    ///
    /// With a repository filter, `None` means the repository is absent from
    /// the current snapshot (the facade's "not found").
    pub async fn report(&self, repository: Option<&str>) -> Option<ConsecutiveStatsReport> {
        let current = self.current().await;

        let repositories: BTreeMap<String, RepositoryReport> = match repository {
            Some(name) => {
                let keys = current.snapshot.repository(name)?;
                BTreeMap::from([(name.to_string(), repository_report(keys))])
            }
            None => current
                .snapshot
                .repositories
                .iter()
                .map(|(name, keys)| (name.clone(), repository_report(keys)))
                .collect(),
        };

        Some(ConsecutiveStatsReport {
            last_refresh: current
                .last_refresh
                .map(|at| at.to_rfc3339_opts(SecondsFormat::Secs, true)),
            repositories,
        })
    }
}

//! Consecutive-interval accumulation over the rolling window
//!
//! Events must be fed in ascending `created_at` order. Every event updates
//! two stat keys of its repository: [`ALL_EVENTS_KEY`] and its own type. Per
//! key the first event is the anchor; each later event contributes the gap to
//! its predecessor until `max_samples_per_key - 1` gaps are recorded, after
//! which the key is full for this pass.

use super::snapshot::{KeyStats, StatSnapshot};
use std::collections::{HashMap, HashSet};

/// Stat key aggregating every event type of a repository
pub const ALL_EVENTS_KEY: &str = "all";

#[derive(Debug, Clone, Copy)]
struct KeyTrack {
    prior: i64,
    interval_sum: f64,
    interval_count: usize,
}

impl KeyTrack {
    fn anchored_at(created_at: i64) -> Self {
        Self {
            prior: created_at,
            interval_sum: 0.0,
            interval_count: 0,
        }
    }

    fn average(&self) -> f64 {
        if self.interval_count == 0 {
            0.0
        } else {
            self.interval_sum / self.interval_count as f64
        }
    }
}

pub struct IntervalAccumulator {
    max_intervals: usize,
    tracks: HashMap<String, HashMap<String, KeyTrack>>,
}

impl IntervalAccumulator {
    pub fn new(max_samples_per_key: usize) -> Self {
        Self {
            max_intervals: max_samples_per_key.saturating_sub(1),
            tracks: HashMap::new(),
        }
    }

    /// Record one event, `created_at` in unix seconds
    pub fn observe(&mut self, repository: &str, event_type: &str, created_at: i64) {
        let max_intervals = self.max_intervals;
        let keys = self.tracks.entry(repository.to_string()).or_default();

        for key in [ALL_EVENTS_KEY, event_type] {
            match keys.get_mut(key) {
                None => {
                    keys.insert(key.to_string(), KeyTrack::anchored_at(created_at));
                }
                Some(track) if track.interval_count < max_intervals => {
                    track.interval_sum += (created_at - track.prior) as f64;
                    track.interval_count += 1;
                    track.prior = created_at;
                }
                Some(_) => {}
            }

            // An event typed "all" must not count twice against the same key
            if event_type == ALL_EVENTS_KEY {
                break;
            }
        }
    }

    pub fn interval_count(&self, repository: &str, key: &str) -> Option<usize> {
        self.tracks
            .get(repository)
            .and_then(|keys| keys.get(key))
            .map(|track| track.interval_count)
    }

    /// Build the snapshot, keeping only `repositories`
    pub fn finish(self, precision: u32, repositories: &HashSet<String>) -> StatSnapshot {
        let mut snapshot = StatSnapshot::default();

        for (repository, keys) in self.tracks {
            if !repositories.contains(&repository) {
                log::debug!("Dropping stats of unconfigured repository {}", repository);
                continue;
            }

            let entry = snapshot.repositories.entry(repository).or_default();
            for (key, track) in keys {
                entry.insert(
                    key,
                    KeyStats {
                        average_interval_seconds: round_to(track.average(), precision),
                        sample_count: track.interval_count + 1,
                    },
                );
            }
        }

        snapshot
    }
}

pub fn round_to(value: f64, precision: u32) -> f64 {
    let factor = 10_f64.powi(precision as i32);
    (value * factor).round() / factor
}

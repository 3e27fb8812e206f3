//! # Aggregation engine
//!
//! Periodically turns the stored window into per-repository interval stats.
//!
//! ```text
//! WindowReader::scan (read-only, keyset chunks, one read transaction)
//!     ↓
//! IntervalAccumulator::observe ("all" + per-type keys, capped)
//!     ↓
//! IntervalAccumulator::finish (average, sample_count, rounding)
//!     ↓
//! StatsHandle::publish (atomic swap)
//! ```

pub mod engine;
pub mod reader;
pub mod snapshot;
pub mod window;

pub use engine::{compute_snapshot, AggregateError, AggregatorSettings, StatsAggregator};
pub use snapshot::{ConsecutiveStatsReport, KeyStats, PublishedStats, StatSnapshot, StatsHandle};
pub use window::{IntervalAccumulator, ALL_EVENTS_KEY};

//! Repository event cadence
//!
//! Harvests recent activity events of a fixed set of GitHub repositories into
//! a local SQLite window and periodically publishes, per repository and per
//! event type, the average interval between consecutive events.
//!
//! - [`feed`] - paginated HTTP client with retry and backoff
//! - [`pipeline`] - validation, early-stop paging and the ingestion loop
//! - [`store`] - durable, deduplicated, windowed event storage
//! - [`aggregator`] - interval stats and their atomically published snapshot

pub mod aggregator;
pub mod config;
pub mod feed;
pub mod pipeline;
pub mod shutdown;
pub mod store;

//! # Ingestion pipeline
//!
//! Harvests repository events from the feed into the event store.
//!
//! ```text
//! EventFeed::get_page (newest-first pages)
//!     ↓
//! IngestionPipeline::collect (cutoff / known-id / short-page early stops)
//!     ↓
//! EventStore::insert_new (one transaction per batch)
//!     ↓
//! EventStore::evict_expired
//! ```
//!
//! ## Module Organization
//!
//! - `types` - `DomainEvent` and feed record parsing
//! - `ingestion` - repository validation and paging
//! - `scheduler` - the periodic ingestion loop

pub mod ingestion;
pub mod scheduler;
pub mod types;

pub use ingestion::{IngestError, IngestionPipeline, RepositoryTarget};
pub use scheduler::{run_ingestion_cycle, run_ingestion_loop, CycleSummary};
pub use types::DomainEvent;

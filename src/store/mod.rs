//! Durable, deduplicated, windowed event storage

pub mod db;

pub use db::{EventStore, StoreError};

use std::collections::HashSet;

/// Membership check used by the ingestion early-stop
pub trait KnownIds {
    fn is_known(&self, id: &str) -> bool;
}

impl KnownIds for HashSet<String> {
    fn is_known(&self, id: &str) -> bool {
        self.contains(id)
    }
}

//! Read-only window scan over the event store
//!
//! Opens its own connection with `query_only = ON`, so the aggregator never
//! contends with ingestion for the write lock. A scan pages through the window
//! in ascending `(created_at, id)` order using a keyset cursor, all inside one
//! read transaction so every chunk sees the same committed state.

use crate::pipeline::types::DomainEvent;
use crate::store::db::{apply_pragmas, timestamp_to_utc, SCHEMA};
use crate::store::StoreError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::path::Path;

const SCAN_QUERY: &str = "
    SELECT id, type, created_at, repository
    FROM github_events
    WHERE created_at >= ?1
      AND (created_at > ?2 OR (created_at = ?2 AND id > ?3))
    ORDER BY created_at ASC, id ASC
    LIMIT ?4";

pub struct WindowReader {
    conn: Connection,
    chunk_size: usize,
}

impl WindowReader {
    pub fn open(db_path: impl AsRef<Path>, chunk_size: usize) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path.as_ref())?;
        apply_pragmas(&conn)?;

        // Reading before the first ingestion cycle sees an empty table, not an error
        conn.execute_batch(SCHEMA)?;

        // Must come after schema creation
        conn.pragma_update(None, "query_only", "ON")?;

        Ok(Self {
            conn,
            chunk_size: chunk_size.max(1),
        })
    }

    /// Visit every event with `created_at >= cutoff`, oldest first
    ///
    /// Returns the number of events visited.
    pub fn scan<F>(&mut self, cutoff: DateTime<Utc>, mut visit: F) -> Result<usize, StoreError>
    where
        F: FnMut(&DomainEvent),
    {
        let cutoff = cutoff.timestamp();
        let limit = self.chunk_size as i64;

        let tx = self.conn.transaction()?;
        let mut stmt = tx.prepare(SCAN_QUERY)?;

        let mut cursor: (i64, String) = (i64::MIN, String::new());
        let mut visited = 0;
        let mut chunks = 0;

        loop {
            let rows = stmt
                .query_map(params![cutoff, cursor.0, cursor.1, limit], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, String>(3)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            chunks += 1;
            let fetched = rows.len();

            for (id, event_type, created_at, repository) in rows {
                let event = DomainEvent {
                    id,
                    event_type,
                    created_at: timestamp_to_utc(created_at)?,
                    repository,
                };
                visit(&event);
                cursor = (created_at, event.id);
                visited += 1;
            }

            if fetched < self.chunk_size {
                break;
            }
        }

        drop(stmt);
        tx.commit()?;

        log::debug!("📥 Scanned {} events in {} chunks", visited, chunks);
        Ok(visited)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::EventStore;
    use chrono::Duration as ChronoDuration;
    use tempfile::tempdir;

    fn event(id: &str, created_at: DateTime<Utc>) -> DomainEvent {
        DomainEvent {
            id: id.to_string(),
            event_type: "PushEvent".to_string(),
            created_at,
            repository: "o/r".to_string(),
        }
    }

    #[test]
    fn test_scan_orders_across_chunk_boundaries() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("events.db");
        let now = Utc::now();

        let mut store = EventStore::open(&db_path, 7).unwrap();
        // Same timestamp for "b" and "a": tie broken by id
        store
            .insert_new_at(
                &[
                    event("c", now - ChronoDuration::seconds(10)),
                    event("b", now - ChronoDuration::seconds(20)),
                    event("a", now - ChronoDuration::seconds(20)),
                    event("d", now),
                    event("e", now - ChronoDuration::seconds(30)),
                ],
                now,
            )
            .unwrap();

        let mut reader = WindowReader::open(&db_path, 2).unwrap();
        let mut seen = Vec::new();
        let visited = reader
            .scan(now - ChronoDuration::days(7), |event| seen.push(event.id.clone()))
            .unwrap();

        assert_eq!(visited, 5);
        assert_eq!(seen, vec!["e", "a", "b", "c", "d"]);
    }

    #[test]
    fn test_scan_respects_cutoff() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("events.db");
        let now = Utc::now();

        let mut store = EventStore::open(&db_path, 7).unwrap();
        store
            .insert_new_at(
                &[event("old", now - ChronoDuration::hours(2)), event("new", now)],
                now,
            )
            .unwrap();

        let mut reader = WindowReader::open(&db_path, 100).unwrap();
        let mut seen = Vec::new();
        reader
            .scan(now - ChronoDuration::hours(1), |event| seen.push(event.id.clone()))
            .unwrap();

        assert_eq!(seen, vec!["new"]);
    }

    #[test]
    fn test_scan_before_any_ingestion() {
        let dir = tempdir().unwrap();
        let mut reader = WindowReader::open(dir.path().join("fresh.db"), 10).unwrap();

        let visited = reader.scan(Utc::now(), |_| {}).unwrap();
        assert_eq!(visited, 0);
    }

    #[test]
    fn test_reader_cannot_write() {
        let dir = tempdir().unwrap();
        let reader = WindowReader::open(dir.path().join("events.db"), 10).unwrap();

        let result = reader.conn.execute("DELETE FROM github_events", []);
        assert!(result.is_err());
    }
}

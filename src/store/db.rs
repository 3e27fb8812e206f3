//! SQLite event store with an in-memory membership cache
//!
//! Table `github_events` (created on open, `IF NOT EXISTS`):
//! - `id` TEXT PRIMARY KEY - feed event id
//! - `type` TEXT - event type tag
//! - `created_at` INTEGER - unix seconds, indexed
//! - `repository` TEXT - `owner/name`
//!
//! Every operation takes the connection lock, runs inside one transaction and
//! either commits or rolls back (transaction drop) before returning.

use super::KnownIds;
use crate::pipeline::types::{retention_cutoff, DomainEvent};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

pub(crate) const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS github_events (
        id TEXT PRIMARY KEY NOT NULL,
        type TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        repository TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_github_events_created_at ON github_events (created_at);
";

#[derive(Debug)]
pub enum StoreError {
    Io(std::io::Error),
    Database(rusqlite::Error),
    InvalidTimestamp(i64),
    LockPoisoned,
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        StoreError::Io(err)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err)
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Io(e) => write!(f, "IO error: {}", e),
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::InvalidTimestamp(ts) => write!(f, "Stored timestamp out of range: {}", ts),
            StoreError::LockPoisoned => write!(f, "Database connection lock poisoned"),
        }
    }
}

impl std::error::Error for StoreError {}

/// WAL lets the aggregator's reader scan while ingestion writes
pub(crate) fn apply_pragmas(conn: &Connection) -> Result<(), rusqlite::Error> {
    let mode: String = conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.busy_timeout(Duration::from_secs(5))?;
    log::debug!("SQLite journal_mode={}", mode);
    Ok(())
}

pub(crate) fn timestamp_to_utc(secs: i64) -> Result<DateTime<Utc>, StoreError> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .ok_or(StoreError::InvalidTimestamp(secs))
}

pub struct EventStore {
    conn: Mutex<Connection>,
    /// Ids inside the retention window, as of the last load/insert/evict
    known_ids: HashSet<String>,
    retention_days: i64,
}

impl EventStore {
    /// Open (or create) the database and ensure the schema exists
    ///
    /// The membership cache starts empty; call [`EventStore::load_window_ids`]
    /// once before the first ingestion cycle.
    pub fn open(db_path: impl AsRef<Path>, retention_days: i64) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path.as_ref())?;
        apply_pragmas(&conn)?;
        conn.execute_batch(SCHEMA)?;

        log::info!("💾 Event store opened: {}", db_path.as_ref().display());

        Ok(Self {
            conn: Mutex::new(conn),
            known_ids: HashSet::new(),
            retention_days,
        })
    }

    pub fn retention_days(&self) -> i64 {
        self.retention_days
    }

    fn cutoff_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        retention_cutoff(now, self.retention_days)
    }

    fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, StoreError> {
        conn.lock().map_err(|_| StoreError::LockPoisoned)
    }

    /// Load ids of every event inside the window into the membership cache
    pub fn load_window_ids(&mut self) -> Result<usize, StoreError> {
        self.load_window_ids_at(Utc::now())
    }

    pub fn load_window_ids_at(&mut self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = self.cutoff_at(now).timestamp();

        let ids = {
            let conn = Self::lock(&self.conn)?;
            let mut stmt = conn.prepare("SELECT id FROM github_events WHERE created_at >= ?1")?;
            let rows = stmt.query_map([cutoff], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<HashSet<String>, _>>()?
        };

        self.known_ids = ids;
        log::info!("📥 Loaded {} event ids inside the retention window", self.known_ids.len());
        Ok(self.known_ids.len())
    }

    pub fn is_known(&self, id: &str) -> bool {
        self.known_ids.contains(id)
    }

    pub fn cached_len(&self) -> usize {
        self.known_ids.len()
    }

    /// Persist events that are neither known nor outside the window
    ///
    /// Returns the ids actually inserted. The whole batch commits or rolls
    /// back as a unit; the cache is only updated after a commit.
    pub fn insert_new(&mut self, events: &[DomainEvent]) -> Result<Vec<String>, StoreError> {
        self.insert_new_at(events, Utc::now())
    }

    pub fn insert_new_at(&mut self, events: &[DomainEvent], now: DateTime<Utc>) -> Result<Vec<String>, StoreError> {
        let cutoff = self.cutoff_at(now);

        let candidates: Vec<&DomainEvent> = events
            .iter()
            .filter(|event| !self.known_ids.contains(&event.id) && event.created_at >= cutoff)
            .collect();

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let mut inserted = Vec::with_capacity(candidates.len());
        {
            let mut conn = Self::lock(&self.conn)?;
            let tx = conn.transaction()?;
            {
                // OR IGNORE covers a cache that trails the table, and repeats within the batch
                let mut stmt = tx.prepare(
                    "INSERT OR IGNORE INTO github_events (id, type, created_at, repository)
                     VALUES (?1, ?2, ?3, ?4)",
                )?;

                for event in &candidates {
                    let changed = stmt.execute(params![
                        event.id,
                        event.event_type,
                        event.created_at.timestamp(),
                        event.repository,
                    ])?;
                    if changed == 1 {
                        inserted.push(event.id.clone());
                    }
                }
            }
            tx.commit()?;
        }

        self.known_ids
            .extend(candidates.iter().map(|event| event.id.clone()));

        log::debug!(
            "💾 Inserted {} of {} events ({} candidates)",
            inserted.len(),
            events.len(),
            candidates.len()
        );

        Ok(inserted)
    }

    /// Delete every row older than the retention cutoff
    pub fn evict_expired(&mut self) -> Result<usize, StoreError> {
        self.evict_expired_at(Utc::now())
    }

    pub fn evict_expired_at(&mut self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let cutoff = self.cutoff_at(now).timestamp();

        let (expired_ids, deleted) = {
            let mut conn = Self::lock(&self.conn)?;
            let tx = conn.transaction()?;
            let expired_ids = {
                let mut stmt = tx.prepare("SELECT id FROM github_events WHERE created_at < ?1")?;
                let rows = stmt.query_map([cutoff], |row| row.get::<_, String>(0))?;
                rows.collect::<Result<Vec<String>, _>>()?
            };
            let deleted = tx.execute("DELETE FROM github_events WHERE created_at < ?1", [cutoff])?;
            tx.commit()?;
            (expired_ids, deleted)
        };

        for id in &expired_ids {
            self.known_ids.remove(id);
        }

        if deleted > 0 {
            log::info!("🧹 Evicted {} expired events", deleted);
        }

        Ok(deleted)
    }

    /// Total stored rows
    pub fn len(&self) -> Result<usize, StoreError> {
        let conn = Self::lock(&self.conn)?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM github_events", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    pub fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    /// Stored rows with `created_at` strictly before `cutoff`
    pub fn count_before(&self, cutoff: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = Self::lock(&self.conn)?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM github_events WHERE created_at < ?1",
            [cutoff.timestamp()],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl KnownIds for EventStore {
    fn is_known(&self, id: &str) -> bool {
        EventStore::is_known(self, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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

    fn open_store(dir: &tempfile::TempDir) -> EventStore {
        EventStore::open(dir.path().join("events.db"), 7).unwrap()
    }

    #[test]
    fn test_insert_new_filters_known_and_expired() {
        let dir = tempdir().unwrap();
        let mut store = open_store(&dir);
        let now = Utc::now();

        let inserted = store
            .insert_new_at(&[event("1", now), event("2", now - ChronoDuration::days(8))], now)
            .unwrap();
        assert_eq!(inserted, vec!["1".to_string()]);
        assert!(store.is_known("1"));
        assert!(!store.is_known("2"));

        let inserted = store
            .insert_new_at(&[event("1", now), event("3", now)], now)
            .unwrap();
        assert_eq!(inserted, vec!["3".to_string()]);
        assert_eq!(store.len().unwrap(), 2);
    }

    #[test]
    fn test_insert_ignores_repeats_within_batch() {
        let dir = tempdir().unwrap();
        let mut store = open_store(&dir);
        let now = Utc::now();

        let inserted = store
            .insert_new_at(&[event("1", now), event("1", now)], now)
            .unwrap();

        assert_eq!(inserted, vec!["1".to_string()]);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn test_load_window_ids_after_restart() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        {
            let mut store = open_store(&dir);
            store.insert_new_at(&[event("1", now), event("2", now)], now).unwrap();
        }

        let mut store = open_store(&dir);
        assert!(!store.is_known("1"));

        assert_eq!(store.load_window_ids_at(now).unwrap(), 2);
        assert!(store.is_known("1"));
        assert!(store.is_known("2"));

        // A later cold start sees the rows as outside the window
        assert_eq!(store.load_window_ids_at(now + ChronoDuration::days(8)).unwrap(), 0);
    }

    #[test]
    fn test_cache_trailing_table_does_not_duplicate() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        {
            let mut store = open_store(&dir);
            store.insert_new_at(&[event("1", now)], now).unwrap();
        }

        // Fresh store without load_window_ids: cache is empty, row exists
        let mut store = open_store(&dir);
        let inserted = store.insert_new_at(&[event("1", now)], now).unwrap();

        assert!(inserted.is_empty());
        assert_eq!(store.len().unwrap(), 1);
        assert!(store.is_known("1"));
    }

    #[test]
    fn test_evict_expired() {
        let dir = tempdir().unwrap();
        let mut store = open_store(&dir);
        let now = Utc::now();

        store
            .insert_new_at(
                &[
                    event("old", now - ChronoDuration::days(6)),
                    event("new", now - ChronoDuration::hours(1)),
                ],
                now,
            )
            .unwrap();

        // Two days later the first event has left the 7-day window
        let later = now + ChronoDuration::days(2);
        let evicted = store.evict_expired_at(later).unwrap();

        assert_eq!(evicted, 1);
        assert_eq!(store.count_before(retention_cutoff(later, 7)).unwrap(), 0);
        assert_eq!(store.len().unwrap(), 1);
        assert!(!store.is_known("old"));
        assert!(store.is_known("new"));
    }

    #[test]
    fn test_cutoff_second_agrees_between_insert_and_evict() {
        let dir = tempdir().unwrap();
        let mut store = open_store(&dir);
        let edge = Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap();
        let now = Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap() + ChronoDuration::milliseconds(750);

        // Same second as the cutoff: inside the window for every operation
        let inserted = store.insert_new_at(&[event("edge", edge)], now).unwrap();
        assert_eq!(inserted, vec!["edge".to_string()]);

        assert_eq!(store.evict_expired_at(now).unwrap(), 0);
        assert_eq!(store.load_window_ids_at(now).unwrap(), 1);
    }

    #[test]
    fn test_empty_batch_is_noop() {
        let dir = tempdir().unwrap();
        let mut store = open_store(&dir);

        assert!(store.insert_new(&[]).unwrap().is_empty());
        assert!(store.is_empty().unwrap());
        assert_eq!(store.evict_expired().unwrap(), 0);
    }
}

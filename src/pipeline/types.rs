//! Domain event type and feed record parsing

use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Timestamp layout used by the feed (`2024-01-31T12:00:00Z`)
pub const FEED_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// One repository activity event as stored and aggregated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    /// Feed-assigned id, unique across all repositories
    pub id: String,
    /// Event type tag, e.g. `PushEvent`
    pub event_type: String,
    pub created_at: DateTime<Utc>,
    /// `owner/name`
    pub repository: String,
}

#[derive(Debug, Deserialize)]
struct FeedRecord {
    id: String,
    #[serde(rename = "type")]
    event_type: String,
    created_at: String,
}

#[derive(Debug)]
pub enum RecordError {
    Malformed(serde_json::Error),
    Timestamp { value: String, source: chrono::ParseError },
}

impl std::fmt::Display for RecordError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordError::Malformed(e) => write!(f, "Malformed feed record: {}", e),
            RecordError::Timestamp { value, source } => {
                write!(f, "Invalid created_at '{}': {}", value, source)
            }
        }
    }
}

impl std::error::Error for RecordError {}

impl DomainEvent {
    /// Materialize an event from a raw feed record
    ///
    /// The event is attributed to the configured `repository` rather than
    /// the record's `repo.name`, so renamed or differently-cased feeds still
    /// land under the configured key.
    pub fn from_record(record: &Value, repository: &str) -> Result<Self, RecordError> {
        let raw = FeedRecord::deserialize(record).map_err(RecordError::Malformed)?;
        let created_at = parse_feed_time(&raw.created_at)?;

        Ok(Self {
            id: raw.id,
            event_type: raw.event_type,
            created_at,
            repository: repository.to_string(),
        })
    }
}

pub fn parse_feed_time(value: &str) -> Result<DateTime<Utc>, RecordError> {
    NaiveDateTime::parse_from_str(value, FEED_TIME_FORMAT)
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|source| RecordError::Timestamp {
            value: value.to_string(),
            source,
        })
}

pub fn format_feed_time(value: &DateTime<Utc>) -> String {
    value.format(FEED_TIME_FORMAT).to_string()
}

/// Oldest timestamp still inside the retention window
/// Oldest `created_at` still inside the window, truncated to whole seconds
/// to match the stored unix-second timestamps
pub fn retention_cutoff(now: DateTime<Utc>, retention_days: i64) -> DateTime<Utc> {
    (now - Duration::days(retention_days)).trunc_subsecs(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_from_record() {
        let record = json!({
            "id": "1234",
            "type": "PushEvent",
            "created_at": "2024-03-01T08:30:05Z",
            "repo": {"name": "Owner/Repo"}
        });

        let event = DomainEvent::from_record(&record, "owner/repo").unwrap();

        assert_eq!(event.id, "1234");
        assert_eq!(event.event_type, "PushEvent");
        assert_eq!(event.repository, "owner/repo");
        assert_eq!(event.created_at, Utc.with_ymd_and_hms(2024, 3, 1, 8, 30, 5).unwrap());
    }

    #[test]
    fn test_malformed_records() {
        let missing_type = json!({"id": "1", "created_at": "2024-03-01T08:30:05Z"});
        assert!(matches!(
            DomainEvent::from_record(&missing_type, "o/r"),
            Err(RecordError::Malformed(_))
        ));

        let bad_time = json!({"id": "1", "type": "PushEvent", "created_at": "yesterday"});
        assert!(matches!(
            DomainEvent::from_record(&bad_time, "o/r"),
            Err(RecordError::Timestamp { .. })
        ));
    }

    #[test]
    fn test_format_matches_feed() {
        let at = Utc.with_ymd_and_hms(2099, 1, 1, 12, 0, 0).unwrap();
        assert_eq!(format_feed_time(&at), "2099-01-01T12:00:00Z");
        assert_eq!(parse_feed_time("2099-01-01T12:00:00Z").unwrap(), at);
    }

    #[test]
    fn test_retention_cutoff() {
        let now = Utc.with_ymd_and_hms(2024, 3, 8, 0, 0, 0).unwrap();
        assert_eq!(
            retention_cutoff(now, 7),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );

        let with_millis = now + Duration::milliseconds(750);
        assert_eq!(
            retention_cutoff(with_millis, 7),
            Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
        );
    }
}

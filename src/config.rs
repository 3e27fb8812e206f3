//! Runtime configuration loaded from environment variables
//!
//! All settings are read once at startup (after `dotenv`) and validated into
//! [`AppConfig`]. A missing required variable or an unparsable value is a
//! [`ConfigError`] and the runtime refuses to start.
//!
//! List-valued variables accept either a JSON array (`["a/b","c/d"]`) or a
//! comma-separated string (`a/b,c/d`).

use crate::feed::backoff::RetryPolicy;
use serde::de::DeserializeOwned;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Repositories to harvest, `owner/name`
    pub repositories: Vec<String>,
    /// Bearer tokens, paired by position with `repositories`
    pub tokens: Vec<String>,
    pub max_repositories: usize,
    pub api_url: String,
    /// Cadence of the ingestion loop
    pub ingestion_interval: Duration,
    pub page_size: u32,
    /// Politeness delay between two page requests of the same repository
    pub page_delay: Duration,
    pub request_timeout: Duration,
    pub retry: RetryPolicy,
    pub retention_days: i64,
    pub max_samples_per_key: usize,
    /// Cadence of the aggregation refresh loop
    pub aggregation_interval: Duration,
    /// Rows fetched per query while scanning the window
    pub scan_chunk: usize,
    /// Decimal places kept in published averages
    pub precision: u32,
    pub db_path: String,
    pub shutdown_grace: Duration,
}

#[derive(Debug)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl AppConfig {
    /// Load configuration from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    ///
    /// `from_env` delegates here; tests pass a closure over a map so they
    /// never touch process-wide state.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let repositories: Vec<String> = required_list(&lookup, "GITHUB_REPOSITORIES")?;
        let tokens: Vec<String> = required_list(&lookup, "GITHUB_AUTHENTICATION_TOKENS")?;

        let config = Self {
            repositories,
            tokens,
            max_repositories: parse_or(&lookup, "GITHUB_MAX_REPOSITORIES", 5)?,
            api_url: lookup("GITHUB_API_URL")
                .map(|url| url.trim_end_matches('/').to_string())
                .unwrap_or_else(|| "https://api.github.com".to_string()),
            ingestion_interval: Duration::from_secs(parse_or(&lookup, "GITHUB_REFRESH_RATE", 3600)?),
            page_size: parse_or(&lookup, "GITHUB_PER_PAGE", 100)?,
            page_delay: Duration::from_millis(parse_or(&lookup, "GITHUB_PAGE_DELAY_MS", 100)?),
            request_timeout: Duration::from_secs(parse_or(&lookup, "REQUEST_TIMEOUT", 60)?),
            retry: RetryPolicy {
                max_retries: parse_or(&lookup, "REQUEST_MAX_RETRY", 3)?,
                backoff_factor: parse_or(&lookup, "REQUEST_BACKOFF_FACTOR", 1.0)?,
                status_forcelist: match lookup("REQUEST_STATUS_FORCELIST") {
                    Some(raw) => parse_list("REQUEST_STATUS_FORCELIST", &raw)?,
                    None => vec![501, 502, 503, 504],
                },
            },
            retention_days: parse_or(&lookup, "AGGREGATOR_ROLLING_DAYS", 7)?,
            max_samples_per_key: parse_or(&lookup, "AGGREGATOR_ROLLING_EVENTS", 500)?,
            aggregation_interval: Duration::from_secs(parse_or(&lookup, "AGGREGATOR_REFRESH_RATE", 60)?),
            scan_chunk: parse_or(&lookup, "AGGREGATOR_SCAN_CHUNK", 1000)?,
            precision: parse_or(&lookup, "AGGREGATOR_PRECISION", 2)?,
            db_path: lookup("EVENTS_DB_PATH").unwrap_or_else(|| "data/github_events.db".to_string()),
            shutdown_grace: Duration::from_secs(parse_or(&lookup, "SHUTDOWN_GRACE_SECS", 5)?),
        };

        config.check_ranges()?;
        Ok(config)
    }

    fn check_ranges(&self) -> Result<(), ConfigError> {
        if self.retention_days < 1 {
            return Err(ConfigError::InvalidValue(
                "AGGREGATOR_ROLLING_DAYS must be at least 1".to_string(),
            ));
        }
        if self.max_samples_per_key < 1 {
            return Err(ConfigError::InvalidValue(
                "AGGREGATOR_ROLLING_EVENTS must be at least 1".to_string(),
            ));
        }
        if self.page_size == 0 || self.page_size > 100 {
            return Err(ConfigError::InvalidValue(
                "GITHUB_PER_PAGE must be between 1 and 100".to_string(),
            ));
        }
        if self.scan_chunk == 0 {
            return Err(ConfigError::InvalidValue(
                "AGGREGATOR_SCAN_CHUNK must be at least 1".to_string(),
            ));
        }
        if self.retry.backoff_factor < 0.0 {
            return Err(ConfigError::InvalidValue(
                "REQUEST_BACKOFF_FACTOR must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| {
            ConfigError::InvalidValue(format!("{}='{}' could not be parsed", key, raw))
        }),
        None => Ok(default),
    }
}

fn required_list<F, T>(lookup: &F, key: &str) -> Result<Vec<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: DeserializeOwned + FromStr,
{
    let raw = lookup(key).ok_or_else(|| ConfigError::MissingVariable(key.to_string()))?;
    parse_list(key, &raw)
}

fn parse_list<T>(key: &str, raw: &str) -> Result<Vec<T>, ConfigError>
where
    T: DeserializeOwned + FromStr,
{
    let raw = raw.trim();

    if raw.starts_with('[') {
        return serde_json::from_str(raw).map_err(|e| {
            ConfigError::InvalidValue(format!("{} is not a valid list: {}", key, e))
        });
    }

    raw.split(',')
        .map(|item| item.trim())
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.parse().map_err(|_| {
                ConfigError::InvalidValue(format!("{} contains an invalid item '{}'", key, item))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("GITHUB_REPOSITORIES", r#"["owner/repo"]"#),
            ("GITHUB_AUTHENTICATION_TOKENS", r#"["token"]"#),
        ]))
        .unwrap();

        assert_eq!(config.repositories, vec!["owner/repo".to_string()]);
        assert_eq!(config.tokens, vec!["token".to_string()]);
        assert_eq!(config.max_repositories, 5);
        assert_eq!(config.api_url, "https://api.github.com");
        assert_eq!(config.ingestion_interval, Duration::from_secs(3600));
        assert_eq!(config.page_size, 100);
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.status_forcelist, vec![501, 502, 503, 504]);
        assert_eq!(config.retention_days, 7);
        assert_eq!(config.max_samples_per_key, 500);
        assert_eq!(config.precision, 2);
        assert_eq!(config.db_path, "data/github_events.db");
    }

    #[test]
    fn test_custom_config() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("GITHUB_REPOSITORIES", "a/b, c/d"),
            ("GITHUB_AUTHENTICATION_TOKENS", "t1,t2"),
            ("GITHUB_API_URL", "http://127.0.0.1:8080/"),
            ("GITHUB_PER_PAGE", "30"),
            ("REQUEST_STATUS_FORCELIST", "[429, 503]"),
            ("REQUEST_BACKOFF_FACTOR", "0.5"),
            ("AGGREGATOR_ROLLING_DAYS", "3"),
            ("AGGREGATOR_REFRESH_RATE", "15"),
        ]))
        .unwrap();

        assert_eq!(config.repositories, vec!["a/b".to_string(), "c/d".to_string()]);
        assert_eq!(config.tokens.len(), 2);
        assert_eq!(config.api_url, "http://127.0.0.1:8080");
        assert_eq!(config.page_size, 30);
        assert_eq!(config.retry.status_forcelist, vec![429, 503]);
        assert_eq!(config.retry.backoff_factor, 0.5);
        assert_eq!(config.retention_days, 3);
        assert_eq!(config.aggregation_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_missing_required_variable() {
        let result = AppConfig::from_lookup(lookup_from(&[("GITHUB_REPOSITORIES", "a/b")]));

        match result {
            Err(ConfigError::MissingVariable(var)) => {
                assert_eq!(var, "GITHUB_AUTHENTICATION_TOKENS")
            }
            other => panic!("expected missing variable, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = AppConfig::from_lookup(lookup_from(&[
            ("GITHUB_REPOSITORIES", "a/b"),
            ("GITHUB_AUTHENTICATION_TOKENS", "t"),
            ("AGGREGATOR_ROLLING_EVENTS", "lots"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));

        let result = AppConfig::from_lookup(lookup_from(&[
            ("GITHUB_REPOSITORIES", "a/b"),
            ("GITHUB_AUTHENTICATION_TOKENS", "t"),
            ("GITHUB_PER_PAGE", "0"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));

        let result = AppConfig::from_lookup(lookup_from(&[
            ("GITHUB_REPOSITORIES", "[not json"),
            ("GITHUB_AUTHENTICATION_TOKENS", "t"),
        ]));
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }
}

//! Pipeline ingestion - pages the feed for every configured repository
//!
//! Per repository, pages `1..=ceil(max_samples_per_key / page_size)` are
//! requested in order. The feed is newest-first, so scanning stops (for the
//! page AND the repository) at the first record that is older than the
//! retention cutoff or already known to the store: everything after it is at
//! least as old or already stored. Paging also stops on a short page (end of
//! feed) and once `max_samples_per_key` events were collected.
//!
//! One repository failing never affects the others; a shutdown signal aborts
//! the whole run.

use super::types::{retention_cutoff, DomainEvent, RecordError};
use crate::config::{AppConfig, ConfigError};
use crate::feed::EventFeed;
use crate::shutdown::{cancelled, sleep_or_shutdown};
use crate::store::KnownIds;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::time::Duration;
use tokio::sync::watch;

/// A repository paired with the token used to read its feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryTarget {
    pub repository: String,
    pub token: String,
}

#[derive(Debug)]
pub enum IngestError {
    /// Shutdown was requested mid-run
    Cancelled,
    /// A feed record of `repository` could not be materialized
    Record { repository: String, source: RecordError },
}

impl std::fmt::Display for IngestError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IngestError::Cancelled => write!(f, "Ingestion cancelled"),
            IngestError::Record { repository, source } => {
                write!(f, "Bad record from {}: {}", repository, source)
            }
        }
    }
}

impl std::error::Error for IngestError {}

/// Check a repository name against `owner/name`
///
/// Both halves are non-empty and contain only word characters, `.` or `-`.
pub fn validate_repository_name(repository: &str) -> Result<(), ConfigError> {
    let valid_part = |part: &str| {
        !part.is_empty()
            && part
                .chars()
                .all(|c| c.is_alphanumeric() || c == '_' || c == '.' || c == '-')
    };

    match repository.split_once('/') {
        Some((owner, name)) if valid_part(owner) && valid_part(name) => Ok(()),
        _ => Err(ConfigError::InvalidValue(format!(
            "Repository name '{}' doesn't match schema 'owner/repo_name'",
            repository
        ))),
    }
}

/// Validate the repository/token lists and pair them by position
pub fn validate_targets(
    repositories: &[String],
    tokens: &[String],
    max_repositories: usize,
) -> Result<Vec<RepositoryTarget>, ConfigError> {
    if repositories.is_empty() {
        return Err(ConfigError::InvalidValue(
            "GITHUB_REPOSITORIES must contain at least 1 repository".to_string(),
        ));
    }
    if tokens.is_empty() {
        return Err(ConfigError::InvalidValue(
            "GITHUB_AUTHENTICATION_TOKENS must contain at least 1 token".to_string(),
        ));
    }
    if repositories.len() > max_repositories {
        return Err(ConfigError::InvalidValue(format!(
            "There can't be more than {} repositories",
            max_repositories
        )));
    }
    if repositories.len() != tokens.len() {
        return Err(ConfigError::InvalidValue(format!(
            "GITHUB_REPOSITORIES has {} entries but GITHUB_AUTHENTICATION_TOKENS has {}",
            repositories.len(),
            tokens.len()
        )));
    }

    for repository in repositories {
        validate_repository_name(repository)?;
    }

    Ok(repositories
        .iter()
        .zip(tokens)
        .map(|(repository, token)| RepositoryTarget {
            repository: repository.clone(),
            token: token.clone(),
        })
        .collect())
}

pub struct IngestionPipeline<F: EventFeed> {
    feed: F,
    targets: Vec<RepositoryTarget>,
    page_size: u32,
    max_samples_per_key: usize,
    retention_days: i64,
    page_delay: Duration,
}

impl<F: EventFeed> IngestionPipeline<F> {
    /// Build the pipeline, validating repositories and tokens
    ///
    /// Runs before any network call; a violation is fatal for the runtime.
    pub fn new(feed: F, config: &AppConfig) -> Result<Self, ConfigError> {
        let targets = validate_targets(&config.repositories, &config.tokens, config.max_repositories)?;

        Ok(Self {
            feed,
            targets,
            page_size: config.page_size.max(1),
            max_samples_per_key: config.max_samples_per_key,
            retention_days: config.retention_days,
            page_delay: config.page_delay,
        })
    }

    pub fn targets(&self) -> &[RepositoryTarget] {
        &self.targets
    }

    /// Upper bound of pages requested per repository and run
    pub fn pages_per_repository(&self) -> u32 {
        let pages = self.max_samples_per_key.div_ceil(self.page_size as usize);
        pages.max(1) as u32
    }

    /// Collect new events from every repository
    pub async fn collect<K>(&self, known: &K, shutdown: &mut watch::Receiver<bool>) -> Result<Vec<DomainEvent>, IngestError>
    where
        K: KnownIds + Sync,
    {
        self.collect_at(Utc::now(), known, shutdown).await
    }

    pub async fn collect_at<K>(
        &self,
        now: DateTime<Utc>,
        known: &K,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Vec<DomainEvent>, IngestError>
    where
        K: KnownIds + Sync,
    {
        let cutoff = retention_cutoff(now, self.retention_days);
        let mut events = Vec::new();

        for target in &self.targets {
            match self.collect_repository(target, cutoff, known, shutdown).await {
                Ok(batch) => {
                    log::info!("📥 {}: {} new events", target.repository, batch.len());
                    events.extend(batch);
                }
                Err(IngestError::Cancelled) => {
                    log::warn!("⚠️  Ingestion cancelled while reading {}", target.repository);
                    return Err(IngestError::Cancelled);
                }
                Err(e) => {
                    log::error!("❌ Error during ingestion of {}, skipping this cycle: {}", target.repository, e);
                }
            }
        }

        Ok(events)
    }

    async fn collect_repository<K>(
        &self,
        target: &RepositoryTarget,
        cutoff: DateTime<Utc>,
        known: &K,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<Vec<DomainEvent>, IngestError>
    where
        K: KnownIds + Sync,
    {
        let mut batch = Vec::new();
        // Pages shift while new events arrive, so a record can show up twice in one run
        let mut seen: HashSet<String> = HashSet::new();

        for page in 1..=self.pages_per_repository() {
            if page > 1 && !sleep_or_shutdown(self.page_delay, shutdown).await {
                return Err(IngestError::Cancelled);
            }

            let records = tokio::select! {
                biased;
                _ = cancelled(shutdown) => return Err(IngestError::Cancelled),
                records = self.feed.get_page(&target.repository, &target.token, self.page_size, page) => records,
            };

            for record in &records {
                let event = DomainEvent::from_record(record, &target.repository).map_err(|source| {
                    IngestError::Record {
                        repository: target.repository.clone(),
                        source,
                    }
                })?;

                if event.created_at < cutoff {
                    log::debug!("{}: reached retention cutoff at event {}", target.repository, event.id);
                    return Ok(batch);
                }
                if known.is_known(&event.id) {
                    log::debug!("{}: reached already stored event {}", target.repository, event.id);
                    return Ok(batch);
                }
                if !seen.insert(event.id.clone()) {
                    continue;
                }

                batch.push(event);
                if batch.len() >= self.max_samples_per_key {
                    return Ok(batch);
                }
            }

            if records.len() < self.page_size as usize {
                break;
            }
        }

        Ok(batch)
    }
}

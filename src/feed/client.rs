//! GitHub repository events API client
//!
//! Endpoint: `{api_url}/repos/{owner}/{repo}/events?per_page=N&page=P`
//! Returns: JSON array of events, newest first
//!
//! The client never surfaces an error to the caller. Transient failures
//! (transport errors, timeouts, statuses in the retry forcelist) are retried
//! with exponential backoff; anything else, including exhausted retries,
//! degrades to an empty page so one repository's outage cannot stall the
//! others.

use super::backoff::RetryPolicy;
use crate::config::AppConfig;
use async_trait::async_trait;
use serde_json::Value;
use std::time::{Duration, Instant};

/// Source of raw feed pages
///
/// Implemented by [`GithubFeedClient`] in production and by in-memory feeds
/// in tests.
#[async_trait]
pub trait EventFeed: Send + Sync {
    /// Fetch one page of raw event records for `repository` (`owner/name`)
    ///
    /// Records are ordered newest-first. An empty vector means either the
    /// logical end of the feed or a failure that was already logged.
    async fn get_page(&self, repository: &str, token: &str, page_size: u32, page: u32) -> Vec<Value>;
}

#[async_trait]
impl<T: EventFeed + ?Sized> EventFeed for std::sync::Arc<T> {
    async fn get_page(&self, repository: &str, token: &str, page_size: u32, page: u32) -> Vec<Value> {
        (**self).get_page(repository, token, page_size, page).await
    }
}

#[derive(Debug)]
pub enum FetchError {
    Client(reqwest::Error),
    Transport(reqwest::Error),
    Status(u16),
    Decode(reqwest::Error),
    RetriesExhausted { attempts: u32, last: String },
}

impl std::fmt::Display for FetchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchError::Client(e) => write!(f, "HTTP client error: {}", e),
            FetchError::Transport(e) => write!(f, "Request failed: {}", e),
            FetchError::Status(status) => write!(f, "Unexpected status: {}", status),
            FetchError::Decode(e) => write!(f, "Invalid response body: {}", e),
            FetchError::RetriesExhausted { attempts, last } => {
                write!(f, "Giving up after {} attempts, last error: {}", attempts, last)
            }
        }
    }
}

impl std::error::Error for FetchError {}

pub struct GithubFeedClient {
    client: reqwest::Client,
    api_url: String,
    retry: RetryPolicy,
}

impl GithubFeedClient {
    /// Build a client against `api_url` (no trailing slash)
    ///
    /// The underlying client has no cookie store, so no session state is
    /// carried from one repository's request to the next; the bearer token
    /// is attached per request.
    pub fn new(api_url: impl Into<String>, request_timeout: Duration, retry: RetryPolicy) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("event_cadence/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(FetchError::Client)?;

        Ok(Self {
            client,
            api_url: api_url.into(),
            retry,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, FetchError> {
        Self::new(config.api_url.clone(), config.request_timeout, config.retry.clone())
    }

    fn events_url(&self, repository: &str) -> String {
        format!("{}/repos/{}/events", self.api_url, repository)
    }

    async fn send_once(
        &self,
        url: &str,
        token: &str,
        page_size: u32,
        page: u32,
    ) -> Result<reqwest::Response, reqwest::Error> {
        let mut request = self
            .client
            .get(url)
            .query(&[("per_page", page_size), ("page", page)])
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");

        // Public repositories can be read without a token, at a lower rate limit
        if !token.is_empty() {
            request = request.bearer_auth(token);
        }

        request.send().await
    }

    async fn fetch_with_retry(
        &self,
        url: &str,
        token: &str,
        page_size: u32,
        page: u32,
    ) -> Result<Vec<Value>, FetchError> {
        let mut backoff = self.retry.backoff();

        loop {
            let started = Instant::now();
            let outcome = self.send_once(url, token, page_size, page).await;
            let took = started.elapsed().as_secs_f64();

            let failure = match outcome {
                Ok(response) if response.status().is_success() => {
                    log::info!(
                        "🌐 Request to {} (page {}) took {:.2}s, status {}",
                        url,
                        page,
                        took,
                        response.status()
                    );

                    // The body read is part of the attempt: a stalled or cut-off body is retried
                    match response.json::<Vec<Value>>().await {
                        Ok(records) => return Ok(records),
                        Err(e) if e.is_timeout() || e.is_body() || e.is_request() => {
                            log::warn!("⚠️  Reading body of {} (page {}) failed: {}", url, page, e);
                            FetchError::Transport(e)
                        }
                        Err(e) => return Err(FetchError::Decode(e)),
                    }
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.text().await.unwrap_or_default();
                    log::warn!(
                        "⚠️  Request to {} (page {}) took {:.2}s, status {}, response: {}",
                        url,
                        page,
                        took,
                        status,
                        body
                    );

                    if !self.retry.is_retryable_status(status) {
                        return Err(FetchError::Status(status));
                    }
                    FetchError::Status(status)
                }
                Err(e) => {
                    log::warn!("⚠️  Request to {} (page {}) failed after {:.2}s: {}", url, page, took, e);
                    FetchError::Transport(e)
                }
            };

            if backoff.sleep().await.is_err() {
                return Err(FetchError::RetriesExhausted {
                    attempts: backoff.attempts_made() + 1,
                    last: failure.to_string(),
                });
            }
        }
    }
}

#[async_trait]
impl EventFeed for GithubFeedClient {
    async fn get_page(&self, repository: &str, token: &str, page_size: u32, page: u32) -> Vec<Value> {
        let url = self.events_url(repository);

        match self.fetch_with_retry(&url, token, page_size, page).await {
            Ok(records) => records,
            Err(FetchError::Status(status)) => {
                log::debug!("Non-retryable status {} for {}, treating page {} as empty", status, repository, page);
                Vec::new()
            }
            Err(e) => {
                log::error!("❌ Fetching {} page {} failed: {}", repository, page, e);
                Vec::new()
            }
        }
    }
}

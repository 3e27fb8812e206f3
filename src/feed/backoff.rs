use std::time::Duration;
use tokio::time::sleep;

/// Retry policy for feed requests
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Base delay in seconds, doubled on every retry
    pub backoff_factor: f64,
    /// HTTP statuses treated as transient
    pub status_forcelist: Vec<u16>,
}

impl RetryPolicy {
    pub fn is_retryable_status(&self, status: u16) -> bool {
        self.status_forcelist.contains(&status)
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.backoff_factor, MAX_BACKOFF_SECS, self.max_retries)
    }
}

const MAX_BACKOFF_SECS: f64 = 120.0;

#[derive(Debug)]
pub struct ExponentialBackoff {
    initial_delay: f64,
    max_delay: f64,
    max_retries: u32,
    current_attempt: u32,
}

#[derive(Debug)]
pub struct MaxRetriesExceeded;

impl std::fmt::Display for MaxRetriesExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Maximum retry attempts exceeded")
    }
}

impl std::error::Error for MaxRetriesExceeded {}

impl ExponentialBackoff {
    pub fn new(initial: f64, max: f64, retries: u32) -> Self {
        Self {
            initial_delay: initial,
            max_delay: max,
            max_retries: retries,
            current_attempt: 0,
        }
    }

    /// Delay before the next retry, or `None` once retries are used up
    pub fn next_delay(&self) -> Option<Duration> {
        if self.current_attempt >= self.max_retries {
            return None;
        }

        let secs = (self.initial_delay * 2_f64.powi(self.current_attempt as i32)).min(self.max_delay);
        Some(Duration::from_secs_f64(secs.max(0.0)))
    }

    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        let delay = self.next_delay().ok_or(MaxRetriesExceeded)?;

        log::warn!(
            "⏳ Retry attempt {} of {} in {:.2}s",
            self.current_attempt + 1,
            self.max_retries,
            delay.as_secs_f64()
        );

        sleep(delay).await;
        self.current_attempt += 1;
        Ok(())
    }

    pub fn attempts_made(&self) -> u32 {
        self.current_attempt
    }
}

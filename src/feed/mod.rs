//! Upstream event feed access
//!
//! - `client` - GitHub events API client behind the [`EventFeed`] trait
//! - `backoff` - retry policy and exponential backoff

pub mod backoff;
pub mod client;

pub use backoff::RetryPolicy;
pub use client::{EventFeed, GithubFeedClient};

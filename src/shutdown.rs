//! Cooperative shutdown signal shared by the background loops
//!
//! The runtime owns a `watch::Sender<bool>`; loops hold receivers and check
//! them at their sleep boundaries. Sending `true`, or dropping the sender,
//! means shut down.

use std::time::Duration;
use tokio::sync::watch;

pub fn is_cancelled(rx: &watch::Receiver<bool>) -> bool {
    *rx.borrow()
}

/// Resolves once shutdown has been requested
pub async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Sleep for `duration` unless shutdown arrives first
///
/// Returns `true` when the full duration elapsed, `false` on shutdown.
pub async fn sleep_or_shutdown(duration: Duration, rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        biased;
        _ = cancelled(rx) => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

//! Registration scheduling engine.
//!
//! One poll cycle flows store -> grouping -> estimator -> executor -> store:
//! - **grouping**: pre-filters candidates and batches them by network,
//!   partition, and fee ceiling;
//! - **estimator**: decides whether a fee group's window is favorable now,
//!   soon, or not this interval;
//! - **executor**: performs the sequential, spaced submissions and writes
//!   outcomes back;
//! - **service**: the long-lived poll loop tying it together, one worker
//!   per network.

mod estimator;
mod executor;
mod grouping;
mod service;

pub use estimator::*;
pub use executor::*;
pub use grouping::*;
pub use service::*;

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Granularity at which long sleeps re-check the shutdown flag.
const CANCEL_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Sleep for `duration`, waking periodically to check `shutdown`.
///
/// Returns `false` if the sleep was cut short by a shutdown request.
pub(crate) async fn sleep_cancellable(duration: Duration, shutdown: &AtomicBool) -> bool {
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let step = remaining.min(CANCEL_CHECK_INTERVAL);
        tokio::time::sleep(step).await;
        remaining = remaining.saturating_sub(step);
    }
    !shutdown.load(Ordering::SeqCst)
}

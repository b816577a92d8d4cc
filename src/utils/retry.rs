//! Retry utilities: backoff builders and retryable error classification.
//!
//! Uses `backon` for exponential backoff with jitter.

use std::time::Duration;

use backon::ExponentialBuilder;

use crate::hub::HubError;
use crate::observer::SubscribeError;

/// Backoff for the first subscription pass at startup.
///
/// - Min delay: 100ms
/// - Max delay: 5s
/// - Max attempts: 30
/// - Jitter enabled
pub fn startup_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(5))
        .with_max_times(30)
        .with_jitter()
}

/// Whether a failed subscription pass may succeed if repeated.
///
/// Transport failures and directory outages are transient. A duplicate
/// subscription never aborts a pass, so it is not expected here.
pub fn is_retryable_subscribe(error: &SubscribeError) -> bool {
    match error {
        SubscribeError::Directory(_) => true,
        SubscribeError::Hub { source, .. } => matches!(source, HubError::Transport(_)),
    }
}

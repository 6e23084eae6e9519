//! Bounded, cancellation-aware polling.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// How a [`poll_until`] loop ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome<T> {
    /// The check produced a value.
    Ready(T),
    /// Every attempt ran without a value.
    Exhausted {
        /// Attempts made.
        attempts: u32,
    },
    /// The token fired before a value was produced.
    Cancelled,
}

impl<T> PollOutcome<T> {
    /// The value, if ready.
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }
}

/// Call `check` up to `attempts` times, sleeping `interval` between calls.
///
/// The check is called immediately, then after each interval. There is no
/// sleep after the last attempt. Cancellation is checked before each attempt
/// and interrupts the sleep.
pub async fn poll_until<T, F, Fut>(
    attempts: u32,
    interval: Duration,
    cancel: &CancellationToken,
    mut check: F,
) -> PollOutcome<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return PollOutcome::Cancelled;
        }
        if let Some(value) = check(attempt).await {
            return PollOutcome::Ready(value);
        }
        if attempt < attempts && !sleep_or_cancel(interval, cancel).await {
            return PollOutcome::Cancelled;
        }
    }
    PollOutcome::Exhausted { attempts }
}

/// Sleep for `duration` unless cancelled first. Returns `false` on cancel.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        () = cancel.cancelled() => false,
        () = tokio::time::sleep(duration) => true,
    }
}

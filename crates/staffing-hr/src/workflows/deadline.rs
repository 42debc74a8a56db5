use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// Why an outbound call stopped before producing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interruption {
    #[error("operation cancelled")]
    Cancelled,
    #[error("operation timed out after {0:?}")]
    TimedOut(Duration),
}

/// Drive `future` until it completes, the token fires, or `limit` elapses.
/// Cancellation is checked first so an already-cancelled token never starts work.
pub async fn bounded<F>(
    cancel: &CancellationToken,
    limit: Duration,
    future: F,
) -> Result<F::Output, Interruption>
where
    F: Future,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(Interruption::Cancelled),
        outcome = tokio::time::timeout(limit, future) => {
            outcome.map_err(|_| Interruption::TimedOut(limit))
        }
    }
}

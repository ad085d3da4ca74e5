//! # Retry On Conflict
//!
//! Re-runs a fetch-modify-write sequence while it fails with an
//! optimistic-concurrency conflict. Any other error is returned immediately.

use crate::controller::backoff::ExponentialBackoff;
use crate::observability::metrics;
use crate::store::ConflictAware;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Bounded retry schedule for conflicting writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub attempts: u32,
    /// Delay before the second attempt
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after every retry
    pub factor: u32,
}

impl Default for RetryPolicy {
    /// Four attempts, 10ms then 50ms then 250ms apart.
    fn default() -> Self {
        Self {
            attempts: 4,
            initial_delay: Duration::from_millis(10),
            factor: 5,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBackoff {
        let ceiling = self
            .initial_delay
            .saturating_mul(self.factor.saturating_pow(self.attempts));
        ExponentialBackoff::with_factor(self.initial_delay, ceiling, self.factor)
    }
}

/// Run `operation` until it succeeds, fails with a non-conflict error, or the
/// policy's attempts are exhausted. On exhaustion the last conflict is returned.
pub async fn retry_on_conflict<T, E, F, Fut>(policy: RetryPolicy, mut operation: F) -> Result<T, E>
where
    E: ConflictAware,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut backoff = policy.backoff();
    let mut attempt = 1;
    loop {
        match operation().await {
            Err(e) if e.is_conflict() && attempt < policy.attempts.max(1) => {
                let delay = backoff.next_backoff();
                debug!(attempt, delay_ms = delay.as_millis(), "conflict, retrying");
                metrics::increment_conflict_retries();
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            result => return result,
        }
    }
}

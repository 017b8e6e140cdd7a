//! Bounded retries for transient backend failures.
//!
//! Only [`AdapterError::is_transient`] failures are repeated; everything else
//! is returned on first occurrence. The engine itself never retries, so this
//! is the single place a backend call may be repeated.

use std::future::Future;
use std::time::Duration;

use tokio::time::sleep;
use tracing::warn;

use crate::error::{AdapterError, AdapterResult};

const MAX_BACKOFF: Duration = Duration::from_secs(10);

/// Retry budget applied by an adapter to each backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first failure.
    pub retries: u32,
    /// Delay before the first retry; doubled on every subsequent one.
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Build a policy with the given retry count and base delay.
    #[must_use]
    pub const fn new(retries: u32, base_delay: Duration) -> Self {
        Self {
            retries,
            base_delay,
        }
    }

    /// Policy that never retries.
    #[must_use]
    pub const fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    fn delay_for(self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(2, Duration::from_millis(250))
    }
}

/// Run `op`, repeating it with exponential backoff while it fails transiently.
///
/// # Errors
///
/// Returns the last error once the retry budget is exhausted, or the first
/// non-transient error immediately.
pub async fn retry_transient<T, F, Fut>(
    policy: RetryPolicy,
    operation: &'static str,
    mut op: F,
) -> AdapterResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = AdapterResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.retries => {
                let delay = policy.delay_for(attempt);
                warn!(
                    operation,
                    attempt = attempt + 1,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "transient downloader failure; retrying"
                );
                sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(log_exhausted(operation, attempt, err)),
        }
    }
}

fn log_exhausted(operation: &'static str, attempt: u32, err: AdapterError) -> AdapterError {
    if attempt > 0 {
        warn!(operation, attempts = attempt + 1, error = %err, "retry budget exhausted");
    }
    err
}

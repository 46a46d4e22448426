//! Shared retry policy for tracker calls.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::ApiError;

/// Configuration for retry behavior.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Fixed delay between attempts.
    pub delay: Duration,
    /// Whether HTTP 429 is retried. When false it is terminal.
    pub retry_rate_limited: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(30),
            retry_rate_limited: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_retry_rate_limited(mut self, retry: bool) -> Self {
        self.retry_rate_limited = retry;
        self
    }

    /// Decide what to do with a failed attempt.
    pub fn classify(&self, err: &ApiError) -> RetryAction {
        match err {
            ApiError::Cancelled => RetryAction::Propagate,
            ApiError::Unauthorized | ApiError::NotFound(_) | ApiError::Validation(_) => {
                RetryAction::Fail
            }
            ApiError::RateLimited if !self.retry_rate_limited => RetryAction::Fail,
            ApiError::RateLimited | ApiError::Transient(_) => RetryAction::Retry,
        }
    }
}

/// Outcome of classifying a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAction {
    /// Try again after the policy delay.
    Retry,
    /// Terminal; return the error.
    Fail,
    /// Cancellation; return immediately without counting an attempt.
    Propagate,
}

/// Run `operation` under `policy`.
///
/// The closure receives the 0-indexed attempt number. On exhaustion the last
/// error is returned. The backoff sleep is cancellable. `on_retry` is called
/// once per scheduled retry.
pub async fn retry_with_policy<F, Fut, T>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    mut on_retry: impl FnMut(),
    mut operation: F,
) -> Result<T, ApiError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(ApiError::Cancelled);
        }

        let err = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        match policy.classify(&err) {
            RetryAction::Propagate | RetryAction::Fail => return Err(err),
            RetryAction::Retry if attempt + 1 >= max_attempts => return Err(err),
            RetryAction::Retry => {
                warn!(
                    attempt = attempt + 1,
                    max = max_attempts,
                    delay_ms = policy.delay.as_millis() as u64,
                    error = %err,
                    "Retrying tracker call"
                );
                on_retry();
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                    _ = tokio::time::sleep(policy.delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

//! Failure classification and exponential backoff with full jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::TransportError;

/// Retry behavior for one transport operation.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Maximum number of retries after the initial attempt.
    pub retries: u32,
    /// Base delay for the exponential schedule.
    pub base: Duration,
    /// Backoff cap.
    pub max: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retries: 5,
            base: Duration::from_millis(1_000),
            max: Duration::from_millis(30_000),
        }
    }
}

/// Whether an error is worth retrying.
///
/// Errors without an HTTP response (network down, DNS, timeout) are
/// retryable, as are 408, 425, 429 and every 5xx. All other statuses and
/// malformed bodies are fatal for the current call.
pub fn is_retryable(err: &TransportError) -> bool {
    match err {
        TransportError::Http(_) => true,
        TransportError::Status { status, .. } => {
            matches!(*status, 408 | 425 | 429) || (500..600).contains(status)
        }
        TransportError::Json(_) => false,
    }
}

/// Full-jitter backoff: uniform in `[0, min(max, base · 2^attempt))`.
pub fn backoff_delay(attempt: u32, base: Duration, max: Duration) -> Duration {
    let shift = attempt.min(20);
    let cap_ms = (base.as_millis() as u64)
        .saturating_mul(1_u64 << shift)
        .min(max.as_millis() as u64);
    if cap_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::rng().random_range(0..cap_ms))
}

/// Runs `op`, retrying retryable failures with jittered backoff.
///
/// Non-retryable failures and exhausted budgets return the last error.
pub async fn with_retry<T, F, Fut>(cfg: &RetryConfig, mut op: F) -> Result<T, TransportError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, TransportError>>,
{
    let mut attempt: u32 = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if attempt >= cfg.retries || !is_retryable(&err) {
                    return Err(err);
                }
                let delay = backoff_delay(attempt, cfg.base, cfg.max);
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "transport call failed, backing off"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

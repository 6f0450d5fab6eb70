use tokio::time::{Duration, sleep};
use tracing::{debug, info, warn};

use crate::models::{
    error::Retryable,
    retry::{RetryConfig, RetryError},
};

/// Delay before retry number `attempt` (zero-based): exponential growth
/// capped at `max_delay_ms`, then jittered by a uniform ±10% so retries
/// across partitions do not synchronize into storms.
pub fn backoff_delay(config: &RetryConfig, attempt: u32) -> u64 {
    let base = config
        .initial_delay_ms
        .saturating_mul(config.backoff_multiplier.saturating_pow(attempt))
        .min(config.max_delay_ms);

    let jitter = rand::random_range(-0.1..=0.1);

    (base as f64 * (1.0 + jitter)) as u64
}

/// Runs `operation` up to `max_retries + 1` times, sleeping the jittered
/// backoff delay between attempts. A non-retryable error short-circuits after
/// the first failure with no sleep. The terminal error carries the total
/// attempt count and its retryability so callers can route to dead-lettering.
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    label: &str,
    operation: F,
) -> Result<T, RetryError<E>>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Retryable + std::fmt::Display,
{
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        label,
                        attempt,
                        max_attempts = config.max_attempts(),
                        "Retry succeeded"
                    );
                }
                return Ok(result);
            }
            Err(e) => {
                if !e.is_retryable() {
                    warn!(label, error = %e, "Non-retryable error, failing immediately");
                    return Err(RetryError {
                        error: e,
                        attempts: attempt,
                        retryable: false,
                    });
                }

                if attempt >= config.max_attempts() {
                    warn!(
                        label,
                        attempts = attempt,
                        error = %e,
                        "Retry failed after exhausting all attempts"
                    );
                    return Err(RetryError {
                        error: e,
                        attempts: attempt,
                        retryable: true,
                    });
                }

                let delay_ms = backoff_delay(config, attempt - 1);

                debug!(
                    label,
                    attempt,
                    max_attempts = config.max_attempts(),
                    delay_ms,
                    "Retry attempt failed, backing off"
                );

                sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

//! Generic retry loop with full-jitter exponential backoff.
//!
//! The engine drives an async operation through at most `max_retries + 1`
//! attempts. Retryability is decided by the caller's predicate when set,
//! otherwise by the error classifier. Delays are drawn uniformly from
//! `[0, min(max_delay, base * multiplier^attempt)]` so synchronized callers
//! do not stampede a recovering endpoint.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::config::RetryPolicy;
use crate::models::{classify_error, RetryContext, SenderError};

/// Computes the jittered delay for a 0-based attempt index.
fn backoff_delay_ms(policy: &RetryPolicy, attempt: u32) -> u64 {
    let exponential =
        policy.base_delay_ms as f64 * policy.backoff_multiplier.powi(attempt as i32);
    let capped = exponential.min(policy.max_delay_ms as f64) as u64;
    rand::rng().random_range(0..=capped)
}

/// Runs `operation` under the retry policy.
///
/// Guarantees:
/// - `operation` is invoked at most `max_retries + 1` times;
/// - a non-retryable failure short-circuits after a single attempt,
///   surfacing as [`SenderError::NonRetryable`] with the cause preserved;
/// - [`SenderError::RetriesExhausted`] is raised only after every planned
///   attempt failed with a retryable error, wrapping the last one.
///
/// The `on_retry` hook is awaited with (error, attempt, delay) before each
/// backoff sleep; side effects such as a forced blockhash refresh happen
/// there.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut operation: F) -> Result<T, SenderError>
where
    F: FnMut(RetryContext) -> Fut,
    Fut: std::future::Future<Output = Result<T, SenderError>>,
{
    let started = Instant::now();
    let total_attempts = policy.max_retries + 1;
    let mut last_error: Option<SenderError> = None;

    for attempt in 0..total_attempts {
        let context = RetryContext {
            attempt,
            total_attempts,
            elapsed_ms: started.elapsed().as_millis() as u64,
            last_error: last_error.take(),
        };

        let error = match operation(context).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        if attempt == policy.max_retries {
            warn!(
                attempts = total_attempts,
                error = %error,
                "all retry attempts exhausted"
            );
            return Err(SenderError::RetriesExhausted {
                attempts: total_attempts,
                source: Arc::new(error),
            });
        }

        let retryable = match &policy.retry_predicate {
            Some(predicate) => predicate(&error),
            None => classify_error(&error).retryable,
        };
        if !retryable {
            warn!(error = %error, "non-retryable error, giving up");
            return Err(SenderError::NonRetryable {
                source: Arc::new(error),
            });
        }

        let delay_ms = backoff_delay_ms(policy, attempt);
        debug!(
            attempt = attempt + 1,
            max_attempts = total_attempts,
            delay_ms = delay_ms,
            error = %error,
            "retryable error, backing off"
        );
        if let Some(hook) = &policy.on_retry {
            hook(error.clone(), attempt, delay_ms).await;
        }
        sleep(Duration::from_millis(delay_ms)).await;
        last_error = Some(error);
    }

    // total_attempts >= 1, so the loop always returns.
    unreachable!("retry loop exited without a result")
}

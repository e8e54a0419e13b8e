//! Exponential-backoff retry combinator for fallible async operations.

use std::future::Future;
use std::time::Duration;

/// Delay before retry number `attempt` (0-based):
/// `min(base, max)` for the first retry, `min(base * multiplier^attempt, max)` after.
pub fn backoff_delay(base: Duration, max: Duration, attempt: u32, multiplier: u32) -> Duration {
    if attempt == 0 {
        return base.min(max);
    }

    multiplier
        .checked_pow(attempt)
        .map(|factor| base * factor)
        .unwrap_or(max)
        .min(max)
}

/// Run `operation`, retrying up to `retries` times on errors accepted by
/// `is_retryable`. Rejected errors surface immediately. The delay between
/// attempts grows exponentially from `base` up to `max`.
pub async fn retry<T, E, F, Fut, R>(
    base: Duration,
    max: Duration,
    retries: u32,
    multiplier: u32,
    mut operation: F,
    mut is_retryable: R,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
{
    let mut attempt = 0;

    loop {
        let err = match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if attempt >= retries || !is_retryable(&err) {
            return Err(err);
        }

        tokio::time::sleep(backoff_delay(base, max, attempt, multiplier)).await;
        attempt += 1;
    }
}

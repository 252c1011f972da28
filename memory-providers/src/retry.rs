//! Small async retry helper shared by the embedding and normalization
//! clients. The pack favors a hand-rolled retry loop over a dedicated retry
//! crate for this shape of problem, so this mirrors that rather than
//! pulling in a `tenacity`-equivalent dependency.

use std::future::Future;
use std::time::Duration;

/// Fixed-delay retry: `attempts` tries total, sleeping `delay` between each
/// failed attempt. Used by the embedding client (spec: 3 attempts, 0.4s).
pub async fn retry_fixed<T, E, F, Fut>(attempts: u32, delay: Duration, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error = None;
    for attempt in 0..attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                last_error = Some(error);
                if attempt + 1 < attempts {
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
    Err(last_error.expect("attempts is always >= 1"))
}

/// Exponential-backoff retry, capped at `max_delay`. Used by the
/// normalization client (spec: 3 attempts, base 0.5s, cap 4s).
pub async fn retry_exponential<T, E, F, Fut>(
    attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last_error = None;
    for attempt in 0..attempts {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                last_error = Some(error);
                if attempt + 1 < attempts {
                    let backoff = base_delay.saturating_mul(1 << attempt).min(max_delay);
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
    Err(last_error.expect("attempts is always >= 1"))
}

//! Bounded retry-with-timeout polling on the tokio timer.
//!
//! Driven by `tokio::time`, so tests can run it against paused time.

use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

/// Number of attempts that fit into `max_wait` when checking every `step`, rounding up.
pub fn attempts_within(step: Duration, max_wait: Duration) -> u32 {
    if step.is_zero() {
        return 1;
    }
    let step_ms = step.as_millis().max(1);
    max_wait.as_millis().div_ceil(step_ms) as u32
}

/// Sleep `step`, then run `check`, until it yields a value or `max_wait`
/// (rounded up to a whole number of steps) has elapsed.
pub async fn poll_until<T, F, Fut>(step: Duration, max_wait: Duration, mut check: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..attempts_within(step, max_wait) {
        sleep(step).await;
        if let Some(value) = check().await {
            return Some(value);
        }
    }
    None
}

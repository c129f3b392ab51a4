//! Fixed-interval polling.
//!
//! Every wait in this tool is the same loop: ask the provider for a status,
//! compare, sleep, repeat. There is no backoff; the interval is constant.

use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

/// Interval between instance state checks while starting or stopping
pub const INSTANCE_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Interval between database status checks
pub const DB_POLL_INTERVAL: Duration = Duration::from_secs(20);

/// Default budget for database waits
pub const DB_WAIT_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    TimedOut,
}

impl WaitOutcome {
    pub fn is_ready(self) -> bool {
        self == WaitOutcome::Ready
    }
}

/// Poll `check` every `interval` until it reports `true`.
///
/// With `timeout: None` the loop only ends when `check` succeeds or fails.
/// With a timeout, the elapsed time is compared after each unsuccessful
/// check, so the call returns at most one interval past the budget.
/// Errors from `check` end the wait immediately.
pub async fn poll_until<F, Fut>(
    interval: Duration,
    timeout: Option<Duration>,
    mut check: F,
) -> Result<WaitOutcome>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    let start = Instant::now();
    let mut attempts = 0u32;
    loop {
        attempts += 1;
        if check().await? {
            debug!(attempts, "condition reached");
            return Ok(WaitOutcome::Ready);
        }
        if let Some(timeout) = timeout {
            if start.elapsed() > timeout {
                debug!(attempts, ?timeout, "gave up waiting");
                return Ok(WaitOutcome::TimedOut);
            }
        }
        sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test(start_paused = true)]
    async fn test_ready_on_third_check() {
        let calls = Cell::new(0);
        let outcome = poll_until(Duration::from_secs(10), None, || {
            calls.set(calls.get() + 1);
            let n = calls.get();
            async move { Ok(n >= 3) }
        })
        .await
        .unwrap();
        assert_eq!(outcome, WaitOutcome::Ready);
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_within_one_interval() {
        let start = Instant::now();
        let outcome = poll_until(DB_POLL_INTERVAL, Some(Duration::from_secs(2)), || async {
            Ok(false)
        })
        .await
        .unwrap();
        assert_eq!(outcome, WaitOutcome::TimedOut);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2));
        assert!(elapsed <= Duration::from_secs(22));
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_error_ends_wait() {
        let res = poll_until(INSTANCE_POLL_INTERVAL, None, || async {
            Err::<bool, _>(anyhow::anyhow!("throttled"))
        })
        .await;
        assert!(res.is_err());
    }
}

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Bounded retry with a fixed delay between attempts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, delay: Duration) -> Self {
        RetryPolicy {
            attempts: attempts.max(1),
            delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy::new(3, Duration::from_millis(200))
    }
}

/// Reads until `read` yields a value, giving up after the policy's attempts.
///
/// `Ok(None)` means the write is not visible yet. Errors are logged and
/// retried like a miss. When every attempt misses, `fallback` is returned so
/// the caller still gets the value it knows it wrote.
pub async fn read_with_fallback<T, E, F, Fut>(
    policy: RetryPolicy,
    what: &str,
    fallback: T,
    mut read: F,
) -> T
where
    E: std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
{
    for attempt in 1..=policy.attempts {
        match read().await {
            Ok(Some(value)) => return value,
            Ok(None) => debug!(what, attempt, "write not visible yet"),
            Err(err) => warn!(what, attempt, error = %err, "read-back failed"),
        }
        if attempt < policy.attempts {
            tokio::time::sleep(policy.delay).await;
        }
    }
    warn!(what, attempts = policy.attempts, "falling back to local value");
    fallback
}

//! Retry decorator with exponential back-off.
//!
//! One policy object serves every outbound call site (RPC, storage upload,
//! URL signing, task enqueue) instead of each client carrying its own
//! attempt loop.

use std::future::Future;
use std::time::Duration;

use crate::error::{Error, Result};

/// Retry policy: total attempt count and the base back-off.
///
/// Sleep before attempt `n` (1-based retries) is `base · 2^(n-1)`.
#[derive(Clone, Copy, Debug)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(attempts: u32, base_backoff: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            base_backoff,
        }
    }

    /// Three attempts, 1 s base — the default for remote procedure calls.
    pub fn rpc() -> Self {
        Self::new(3, Duration::from_secs(1))
    }

    /// Three attempts, 500 ms base — uploads, deletes, and signing.
    pub fn storage() -> Self {
        Self::new(3, Duration::from_millis(500))
    }

    /// Back-off before the given retry (retry 1 → base, retry 2 → 2·base …).
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry.saturating_sub(1));
        self.base_backoff.saturating_mul(factor)
    }

    /// Run `op` until it succeeds, retries are exhausted, or `retryable`
    /// rejects the error. The attempt index (0-based) is passed to `op`.
    pub async fn run<T, F, Fut>(
        &self,
        mut op: F,
        retryable: impl Fn(&Error) -> bool,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last: Option<Error> = None;
        for attempt in 0..self.attempts {
            if attempt > 0 {
                tokio::time::sleep(self.backoff(attempt)).await;
            }
            match op(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    if attempt + 1 < self.attempts && retryable(&e) {
                        tracing::debug!(attempt, error = %e, "retrying after transient error");
                        last = Some(e);
                    } else {
                        return Err(e);
                    }
                }
            }
        }
        Err(last.unwrap_or_else(|| Error::Other("retry attempts exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn transient(_: &Error) -> bool {
        true
    }

    #[tokio::test]
    async fn first_attempt_success_does_not_retry() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let out: Result<u32> = policy
            .run(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(7) }
                },
                transient,
            )
            .await;
        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_millis(1));
        let out: Result<&str> = policy
            .run(
                |attempt| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async move {
                        if attempt < 2 {
                            Err(Error::Http("503".into()))
                        } else {
                            Ok("done")
                        }
                    }
                },
                transient,
            )
            .await;
        assert_eq!(out.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_millis(1));
        let out: Result<()> = policy
            .run(
                |_| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(Error::Auth("401".into())) }
                },
                |e| !matches!(e, Error::Auth(_)),
            )
            .await;
        assert!(matches!(out, Err(Error::Auth(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausted_attempts_return_last_error() {
        let policy = RetryPolicy::new(2, Duration::from_millis(1));
        let out: Result<()> = policy
            .run(|_| async { Err(Error::Http("502".into())) }, transient)
            .await;
        assert!(matches!(out, Err(Error::Http(_))));
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::new(4, Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(1));
        assert_eq!(policy.backoff(2), Duration::from_secs(2));
        assert_eq!(policy.backoff(3), Duration::from_secs(4));
    }
}

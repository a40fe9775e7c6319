//! Bounded exponential backoff for remote index writes.

use std::future::Future;
use std::time::Duration;

use crate::error::IndexError;

/// Outcome of one failed attempt.
#[derive(Debug)]
pub enum AttemptError {
    /// Worth retrying: connection problems, timeouts, 429 and 5xx responses
    Transient(String),
    /// Returned immediately
    Fatal(IndexError),
}

impl From<IndexError> for AttemptError {
    fn from(err: IndexError) -> Self {
        AttemptError::Fatal(err)
    }
}

/// `max_attempts` tries in total, sleeping `base_delay * 2^(n-1)` after the n-th failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: usize, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay after the `attempt`-th failure (1-based).
    pub fn delay_for(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16) as u32;
        self.base_delay.saturating_mul(1 << exponent)
    }

    /// Run `attempt_fn` until it succeeds, fails fatally or runs out of attempts.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T, IndexError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, AttemptError>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match attempt_fn().await {
                Ok(value) => return Ok(value),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Transient(message)) => {
                    if attempt >= self.max_attempts {
                        tracing::error!(
                            "{} failed after {} attempts: {}",
                            operation,
                            attempt,
                            message
                        );
                        return Err(IndexError::RetriesExhausted {
                            operation: operation.to_string(),
                            attempts: attempt,
                            message,
                        });
                    }
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "{} attempt {}/{} failed: {}; retrying in {:?}",
                        operation,
                        attempt,
                        self.max_attempts,
                        message,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tracing_test::traced_test;

    fn fast_policy(max_attempts: usize) -> RetryPolicy {
        RetryPolicy::new(max_attempts, Duration::from_millis(1))
    }

    #[test]
    fn test_delay_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
        assert_eq!(RetryPolicy::new(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let calls = AtomicUsize::new(0);
        let result = fast_policy(3)
            .run("upsert", || {
                let call = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if call < 2 {
                        Err(AttemptError::Transient("503".to_string()))
                    } else {
                        Ok(call)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[traced_test]
    #[tokio::test]
    async fn test_retry_ceiling_surfaces_error() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = fast_policy(3)
            .run("upsert", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AttemptError::Transient("connection reset".to_string())) }
            })
            .await;

        assert!(matches!(
            result,
            Err(IndexError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(logs_contain("upsert attempt 1/3 failed: connection reset"));
        assert!(logs_contain("upsert failed after 3 attempts"));
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let calls = AtomicUsize::new(0);
        let result: Result<(), _> = fast_policy(5)
            .run("upsert", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(AttemptError::Fatal(IndexError::dimension(384, 3))) }
            })
            .await;

        assert!(matches!(result, Err(IndexError::DimensionMismatch { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

//! Component I: the retry engine shared by the queued and streaming
//! drivers. Grounded in the teacher's `RetryLogic`/backoff shape
//! (`lib/file-source/src/file_server.rs`'s doubling `backoff_cap`),
//! adapted from a `tower::Retry` middleware into a free async loop since
//! this crate has no `tower::Service` boundary to hang a layer off of.

use std::time::Duration;

use rand::Rng;

use crate::error::IngestError;

/// Backoff policy: exponential with a jitter factor, capped at `max_delay`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub jitter_ratio: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter_ratio: 0.2,
        }
    }
}

impl RetryPolicy {
    pub(crate) fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.initial_delay.as_millis() as f64 * 2f64.powi(attempt as i32);
        let capped = exp.min(self.max_delay.as_millis() as f64);
        let jitter = 1.0 + rand::rng().random_range(-self.jitter_ratio..=self.jitter_ratio);
        Duration::from_millis((capped * jitter).max(0.0) as u64)
    }
}

/// Runs `operation` until it succeeds, returns a permanent error, or
/// exhausts `policy.max_attempts`. Transient [`IngestError`]s (see
/// [`IngestError::is_permanent`]) are retried with backoff; permanent ones
/// are returned immediately.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    mut operation: F,
) -> Result<T, IngestError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, IngestError>>,
{
    let mut attempt = 0;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_permanent() => return Err(err),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    tracing::warn!(attempts = attempt, error = %err, "retry attempts exhausted");
                    return Err(err);
                }
                let delay = policy.delay_for(attempt);
                tracing::debug!(attempt, ?delay, error = %err, "retrying after transient error");
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn retries_transient_errors_until_success() {
        let policy = RetryPolicy {
            max_attempts: 5,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            jitter_ratio: 0.0,
        };
        let attempts = AtomicU32::new(0);
        let result = retry_with_backoff(&policy, || {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(IngestError::Throttled)
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_short_circuit() {
        let policy = RetryPolicy::default();
        let attempts = AtomicU32::new(0);
        let result: Result<(), IngestError> = retry_with_backoff(&policy, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(IngestError::NoContainers) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhausts_attempts_on_persistent_transient_error() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(1),
            jitter_ratio: 0.0,
        };
        let attempts = AtomicU32::new(0);
        let result: Result<(), IngestError> = retry_with_backoff(&policy, || {
            attempts.fetch_add(1, Ordering::SeqCst);
            async { Err(IngestError::Throttled) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
    }

    use proptest::prelude::*;

    proptest::proptest! {
        #[test]
        fn delay_stays_within_jittered_cap(attempt in 0u32..64) {
            let policy = RetryPolicy {
                max_attempts: 10,
                initial_delay: Duration::from_millis(500),
                max_delay: Duration::from_secs(30),
                jitter_ratio: 0.2,
            };
            let delay = policy.delay_for(attempt);
            let jittered_cap = policy.max_delay.mul_f64(1.0 + policy.jitter_ratio);
            prop_assert!(delay <= jittered_cap);
        }
    }
}

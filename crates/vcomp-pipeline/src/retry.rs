//! Retry utilities with exponential backoff and jitter.
//!
//! One generic policy consumed by the downloader, the uploader and the
//! remote-call helpers.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts (not including the initial attempt).
    pub max_attempts: u32,
    /// Base delay for exponential backoff (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Jitter fraction applied to each delay, 0.0 to 1.0.
    pub jitter: f64,
    /// Operation name for logging.
    pub operation_name: String,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(5),
            jitter: 0.2,
            operation_name: "operation".to_string(),
        }
    }
}

impl RetryPolicy {
    /// Create a new policy with the given operation name.
    pub fn new(operation_name: impl Into<String>) -> Self {
        Self {
            operation_name: operation_name.into(),
            ..Default::default()
        }
    }

    /// Set the maximum number of retries.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the base delay for exponential backoff.
    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    /// Calculate delay for a given attempt number, jitter included.
    fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let backoff = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);

        if self.jitter <= 0.0 {
            return backoff;
        }
        let spread = backoff.as_secs_f64() * self.jitter;
        let jittered = backoff.as_secs_f64() + rand::rng().random_range(-spread..=spread);
        Duration::from_secs_f64(jittered.max(0.0))
    }
}

/// Result of a retried operation.
#[derive(Debug)]
pub enum RetryResult<T, E> {
    /// Operation succeeded.
    Success(T),
    /// Operation failed after all retries exhausted.
    Failed { error: E, attempts: u32 },
}

impl<T, E> RetryResult<T, E> {
    /// Returns true if the operation succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, RetryResult::Success(_))
    }

    /// Convert into a plain `Result`, dropping the attempt count.
    pub fn into_result(self) -> Result<T, E> {
        match self {
            RetryResult::Success(v) => Ok(v),
            RetryResult::Failed { error, .. } => Err(error),
        }
    }
}

/// Execute an async operation with retry logic.
///
/// `retryable` decides whether a given error is worth another attempt;
/// permanent failures short-circuit.
pub async fn retry_async<F, Fut, T, E, R>(
    policy: &RetryPolicy,
    retryable: R,
    operation: F,
) -> RetryResult<T, E>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    R: Fn(&E) -> bool,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => return RetryResult::Success(value),
            Err(e) if attempt < policy.max_attempts && retryable(&e) => {
                attempt += 1;
                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    "{} attempt {} failed, retrying in {:?}: {}",
                    policy.operation_name, attempt, delay, e
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                return RetryResult::Failed {
                    error: e,
                    attempts: attempt + 1,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy::new("test")
            .with_base_delay(Duration::from_millis(1))
            .with_max_attempts(3)
    }

    #[test]
    fn test_delay_backoff_without_jitter() {
        let policy = RetryPolicy {
            jitter: 0.0,
            base_delay: Duration::from_millis(100),
            ..RetryPolicy::new("test")
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn test_delay_capped_at_max() {
        let policy = RetryPolicy {
            jitter: 0.0,
            base_delay: Duration::from_secs(1),
            ..RetryPolicy::new("test")
        };
        assert!(policy.delay_for_attempt(10) <= Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_immediate_success() {
        let calls = AtomicU32::new(0);
        let result = retry_async(&policy(), |_: &String| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, String>(42) }
        })
        .await;

        assert!(result.is_success());
        assert_eq!(result.into_result().unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_eventual_success() {
        let calls = AtomicU32::new(0);
        let result = retry_async(&policy(), |_: &&str| true, || {
            let count = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if count < 2 {
                    Err("transient error")
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert!(result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_short_circuits() {
        let calls = AtomicU32::new(0);
        let result = retry_async(&policy(), |_: &&str| false, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>("permanent") }
        })
        .await;

        assert!(!result.is_success());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        match result {
            RetryResult::Failed { attempts, .. } => assert_eq!(attempts, 1),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_attempts_exhausted() {
        let calls = AtomicU32::new(0);
        let result = retry_async(&policy(), |_: &&str| true, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<u32, _>("still failing") }
        })
        .await;

        // Initial attempt plus three retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        match result {
            RetryResult::Failed { attempts, .. } => assert_eq!(attempts, 4),
            _ => unreachable!(),
        }
    }
}

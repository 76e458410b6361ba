//! Bounded retry around per-category provisioning.
//!
//! Exhausting the attempts returns the last error, which the assembler turns
//! into a denial.

use super::{FeatureCategory, ProvisionError};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Base delay for exponential backoff.
const BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Maximum backoff delay.
const BACKOFF_MAX: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl RetryPolicy {
    /// `max_attempts` total calls per category; values below 1 count as 1.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: BACKOFF_BASE,
            max_delay: BACKOFF_MAX,
        }
    }

    /// A single attempt.
    pub fn none() -> Self {
        Self::new(1)
    }

    #[must_use]
    pub fn with_delays(mut self, base_delay: Duration, max_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self.max_delay = max_delay;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub(crate) async fn run<T, F, Fut>(
        &self,
        category: FeatureCategory,
        mut attempt: F,
    ) -> Result<T, ProvisionError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProvisionError>>,
    {
        let mut attempts = 0;
        let mut delay = self.base_delay;

        loop {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    attempts += 1;
                    if attempts >= self.max_attempts || !e.is_retryable() {
                        return Err(e);
                    }

                    warn!(
                        target: "rc.capabilities",
                        error = %e,
                        category = %category,
                        attempt = attempts,
                        delay_ms = delay.as_millis(),
                        "Provisioning failed, retrying"
                    );

                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(self.max_delay);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(max_attempts).with_delays(Duration::from_millis(1), Duration::from_millis(2))
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = AtomicU32::new(0);

        let result = fast(3)
            .run(FeatureCategory::Chat, || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProvisionError::Backend("flaky".to_string()))
                } else {
                    Ok(7)
                }
            })
            .await;

        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = fast(2)
            .run(FeatureCategory::Chat, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProvisionError::Backend("down".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rejected_is_not_retried() {
        let calls = AtomicU32::new(0);

        let result: Result<(), _> = fast(5)
            .run(FeatureCategory::Chat, || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ProvisionError::Rejected("never".to_string()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::new(0).max_attempts(), 1);
        assert_eq!(RetryPolicy::none().max_attempts(), 1);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::new(5);
        let mut delay = policy.base_delay;
        let mut seen = Vec::new();
        for _ in 0..6 {
            seen.push(delay);
            delay = (delay * 2).min(policy.max_delay);
        }
        assert_eq!(seen.first(), Some(&Duration::from_millis(50)));
        assert_eq!(seen.last(), Some(&Duration::from_secs(1)));
    }
}

//! Bounded timeouts and transient-failure retry.
//!
//! Every call to an external store may block, so it runs under [`bounded`].
//! Request-boundary callers additionally wrap dependency calls in
//! [`with_backoff`], which retries transient failures with exponential
//! backoff plus jitter and gives up after a fixed number of attempts.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::debug;

use crate::errors::{PipelineError, Result};

/// Retry budget for transient dependency failures.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(50),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (zero-based), capped and jittered.
    fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(self.max_delay);
        let jitter_ceiling = (exp.as_millis() as u64 / 4).max(1);
        let jitter = rand::rng().random_range(0..=jitter_ceiling);
        exp + Duration::from_millis(jitter)
    }
}

/// Run `op` until it succeeds, fails non-transiently, or exhausts the policy.
pub async fn with_backoff<T, F, Fut>(policy: &BackoffPolicy, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_retries => {
                let delay = policy.delay_for(attempt);
                debug!(%err, attempt, delay_ms = delay.as_millis() as u64, "retrying after transient failure");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Await `fut` for at most `budget`, converting elapse into a `Timeout` error.
pub async fn bounded<T, Fut>(operation: &'static str, budget: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(PipelineError::Timeout { operation, budget }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn backoff_retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let policy = BackoffPolicy {
            max_retries: 5,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        };
        let result = with_backoff(&policy, || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(PipelineError::unavailable("metadata store", "refused"))
                } else {
                    Ok(n)
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn backoff_does_not_retry_validation_errors() {
        let calls = AtomicU32::new(0);
        let err = with_backoff(&BackoffPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(PipelineError::Validation("nope".into())) }
        })
        .await
        .unwrap_err();
        assert!(matches!(err, PipelineError::Validation(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_converts_elapse_into_timeout() {
        let err = bounded("object fetch", Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Timeout {
                operation: "object fetch",
                ..
            }
        ));
    }
}

//! Bounded retry with randomized backoff around browser navigations
//!
//! Every navigation against a defended target is assumed flaky: timeouts,
//! interstitials and half-rendered pages are normal. Retryable failures get a
//! jittered, attempt-scaled backoff; fatal ones (cancellation, browser death)
//! short-circuit immediately. Exhausting the attempts abandons the single
//! date/bundle-size attempt, never the whole job.

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::ExtractError;

#[derive(Debug, Clone)]
pub struct RetryController {
    max_attempts: u32,
    backoff_min_secs: f64,
    backoff_max_secs: f64,
}

impl Default for RetryController {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_min_secs: 5.0,
            backoff_max_secs: 10.0,
        }
    }
}

impl RetryController {
    #[must_use]
    pub fn new(max_attempts: u32, backoff_min_secs: f64, backoff_max_secs: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff_min_secs,
            backoff_max_secs: backoff_max_secs.max(backoff_min_secs),
        }
    }

    /// Run `op` up to `max_attempts` times.
    ///
    /// Backoff before attempt `n+1` is `jitter(min..max) * n` seconds, so the
    /// cadence both randomizes and stretches as failures accumulate.
    pub async fn with_retry<T, F, Fut>(
        &self,
        op_name: &str,
        mut op: F,
    ) -> Result<T, ExtractError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ExtractError>>,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(op = op_name, attempt, "operation recovered after retries");
                    }
                    return Ok(value);
                }
                Err(err) if !err.is_retryable() => {
                    debug!(op = op_name, error = %err, "non-retryable failure");
                    return Err(err);
                }
                Err(err) if attempt >= self.max_attempts => {
                    warn!(
                        op = op_name,
                        attempts = attempt,
                        error = %err,
                        "retries exhausted, abandoning attempt"
                    );
                    return Err(err);
                }
                Err(err) => {
                    let backoff = self.backoff_for(attempt);
                    warn!(
                        op = op_name,
                        attempt,
                        error = %err,
                        backoff_ms = backoff.as_millis() as u64,
                        "retryable failure, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    fn backoff_for(&self, attempt: u32) -> Duration {
        let base = if self.backoff_max_secs > self.backoff_min_secs {
            rand::rng().random_range(self.backoff_min_secs..self.backoff_max_secs)
        } else {
            self.backoff_min_secs
        };
        Duration::from_secs_f64(base * f64::from(attempt))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_retry() -> RetryController {
        RetryController::new(3, 0.0, 0.001)
    }

    #[tokio::test]
    async fn succeeds_first_try_without_backoff() {
        let calls = AtomicU32::new(0);
        let result = fast_retry()
            .with_retry("nav", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Ok::<_, ExtractError>(42) }
            })
            .await
            .expect("ok");
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_transient_failures_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = fast_retry()
            .with_retry("nav", || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(ExtractError::Navigation("flaky".into()))
                    } else {
                        Ok(7u32)
                    }
                }
            })
            .await
            .expect("third attempt succeeds");
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let err = fast_retry()
            .with_retry("nav", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(ExtractError::Navigation("down".into())) }
            })
            .await
            .expect_err("exhausted");
        assert!(err.is_retryable());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_short_circuits() {
        let calls = AtomicU32::new(0);
        let err = fast_retry()
            .with_retry("nav", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<u32, _>(ExtractError::Cancelled) }
            })
            .await
            .expect_err("fatal");
        assert!(matches!(err, ExtractError::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

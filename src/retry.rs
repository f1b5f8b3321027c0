//! Bounded exponential backoff for rule-store and booking-source I/O.
//!
//! Only [`EngineError::Transport`] failures are retried. Everything else
//! (validation, not-found, limits) is returned on the first attempt.

use std::future::Future;
use std::time::Duration;

use crate::engine::EngineError;
use crate::limits::MAX_RETRY_ATTEMPTS;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first. Always at least 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn with_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts.clamp(1, MAX_RETRY_ATTEMPTS),
            ..Default::default()
        }
    }

    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self::with_attempts(1)
    }

    /// Next delay, clamped to `max_delay`.
    pub fn next_delay(&self, current: Duration) -> Duration {
        let next_ms = (current.as_millis() as f64 * self.multiplier) as u64;
        Duration::from_millis(next_ms).min(self.max_delay)
    }
}

/// Run `op` until it succeeds, fails with a non-retryable error, or the
/// attempt budget is spent. The last error is returned unchanged.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, label: &'static str, mut op: F) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let max_attempts = policy.max_attempts.clamp(1, MAX_RETRY_ATTEMPTS);
    let mut delay = policy.initial_delay;
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt < max_attempts => {
                tracing::warn!(
                    op = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "retrying after transport error",
                );
                metrics::counter!(crate::observability::STORE_RETRIES_TOTAL, "op" => label).increment(1);
                tokio::time::sleep(delay).await;
                delay = policy.next_delay(delay);
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts: attempts,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            multiplier: 2.0,
        }
    }

    #[test]
    fn next_delay_doubles_and_clamps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.next_delay(Duration::from_millis(100)), Duration::from_millis(200));
        assert_eq!(policy.next_delay(Duration::from_secs(3)), Duration::from_secs(2));
    }

    #[test]
    fn attempts_are_bounded() {
        assert_eq!(RetryPolicy::with_attempts(0).max_attempts, 1);
        assert_eq!(RetryPolicy::with_attempts(1_000).max_attempts, MAX_RETRY_ATTEMPTS);
    }

    #[tokio::test]
    async fn transient_error_then_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = with_retry(&fast(3), "test", move || async move {
            if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(EngineError::Transport("connection reset".into()))
            } else {
                Ok(42)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retry(&fast(3), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Transport("down".into()))
        })
        .await;
        assert!(matches!(result, Err(EngineError::Transport(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_error_not_retried() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<(), _> = with_retry(&fast(5), "test", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::EmptyTarget)
        })
        .await;
        assert!(matches!(result, Err(EngineError::EmptyTarget)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

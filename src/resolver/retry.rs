//! Bounded retry with exponential backoff
//!
//! Retry state lives in an explicit policy object passed through a
//! combinator, not in ambient mutable counters, so it can be unit-tested
//! away from any resolver.

use crate::error::{EngineError, EngineResult};
use crate::metrics;

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Retry policy scoped to one logical request.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Run `f` until it succeeds, the error stops matching `retry_on`, or
    /// attempts are exhausted. Backoff doubles per attempt
    /// (`base_delay * 2^attempt`).
    pub async fn run<T, F, Fut, P>(
        &self,
        operation: &str,
        retry_on: P,
        mut f: F,
    ) -> EngineResult<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = EngineResult<T>>,
        P: Fn(&EngineError) -> bool,
    {
        let mut attempt = 1u32;
        loop {
            match f(attempt).await {
                Ok(value) => return Ok(value),
                Err(e) if retry_on(&e) && attempt < self.max_attempts => {
                    let delay = self.base_delay * 2u32.saturating_pow(attempt);
                    warn!(
                        "{} failed (attempt {}/{}), retrying in {:?}: {}",
                        operation, attempt, self.max_attempts, delay, e
                    );
                    metrics::record_quote_retry();
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_secs(1))
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let result = policy()
            .run("op", EngineError::is_retryable, |_| {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(EngineError::RateLimited)
                    } else {
                        Ok(n)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let result: EngineResult<()> = policy()
            .run("op", EngineError::is_retryable, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::RateLimited) }
            })
            .await;
        assert!(matches!(result, Err(EngineError::RateLimited)));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_terminal_errors() {
        let calls = AtomicU32::new(0);
        let result: EngineResult<()> = policy()
            .run("op", EngineError::is_retryable, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::NoRoute) }
            })
            .await;
        assert!(matches!(result, Err(EngineError::NoRoute)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn predicate_narrows_the_retry_set() {
        let calls = AtomicU32::new(0);
        let only_rate_limits = |e: &EngineError| matches!(e, EngineError::RateLimited);
        let result: EngineResult<()> = policy()
            .run("op", only_rate_limits, |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(EngineError::Network("down".into())) }
            })
            .await;
        assert!(matches!(result, Err(EngineError::Network(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

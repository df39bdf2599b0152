//! Bounded retry-with-delay shared by connect, discovery and subscription.

use std::future::Future;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::bluetooth::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{operation} failed after {attempts} attempt(s): {last_error}")]
pub struct RetryExhausted {
    pub operation: String,
    pub attempts: u32,
    pub last_error: TransportError,
}

/// How many times to try an operation and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub const fn new(max_attempts: u32, delay_ms: u64) -> Self {
        Self {
            max_attempts,
            delay_ms,
        }
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }

    /// Runs `attempt` until it succeeds, the budget is spent, or it returns
    /// an error that is not worth repeating. `attempt` receives the 1-based
    /// attempt number. There is no sleep after the final attempt.
    pub async fn run<T, F, Fut>(&self, operation: &str, mut attempt: F) -> Result<T, RetryExhausted>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, TransportError>>,
    {
        let budget = self.max_attempts.max(1);
        let mut tries = 0;

        loop {
            tries += 1;
            match attempt(tries).await {
                Ok(value) => {
                    if tries > 1 {
                        info!("{} succeeded on attempt {}", operation, tries);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!("{} attempt {}/{} failed: {}", operation, tries, budget, e);

                    if !e.is_retryable() || tries >= budget {
                        return Err(RetryExhausted {
                            operation: operation.to_string(),
                            attempts: tries,
                            last_error: e,
                        });
                    }

                    info!("Retrying {} in {} ms...", operation, self.delay_ms);
                    tokio::time::sleep(self.delay()).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn spends_exactly_the_budget() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();
        let policy = RetryPolicy::new(5, 500);

        let result: Result<(), _> = policy
            .run("subscribe", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(TransportError::Backend("busy".into())) }
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 5);
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        // four gaps, none after the last attempt
        assert_eq!(start.elapsed(), Duration::from_millis(2000));
    }

    #[tokio::test(start_paused = true)]
    async fn stops_on_non_retryable_error() {
        let policy = RetryPolicy::new(5, 100);
        let result: Result<(), _> = policy
            .run("open", |_| async {
                Err(TransportError::DeviceNotFound("AA:BB".into()))
            })
            .await;

        let err = result.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert_eq!(err.last_error, TransportError::DeviceNotFound("AA:BB".into()));
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_success() {
        let policy = RetryPolicy::new(5, 100);
        let value = policy
            .run("read", |n| async move {
                if n < 3 {
                    Err(TransportError::Backend("flaky".into()))
                } else {
                    Ok(n)
                }
            })
            .await
            .unwrap();
        assert_eq!(value, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_still_tries_once() {
        let calls = AtomicU32::new(0);
        let _ = RetryPolicy::new(0, 100)
            .run("write", |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(TransportError::ServicesNotReady) }
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

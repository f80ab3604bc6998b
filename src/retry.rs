//! Retry policy shared by the RPC and log API call sites.
//!
//! Call sites classify each failure as `backoff::Error::transient` or
//! `backoff::Error::permanent`; the policy bounds the number of attempts and
//! draws delays from an exponential schedule. Sleeping goes through
//! `tokio::time`, so tests can drive it with a paused clock.

use crate::config::RetryConfig;
use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(8),
            multiplier: 2.0,
        }
    }
}

impl From<RetryConfig> for RetryPolicy {
    fn from(cfg: RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts.max(1),
            initial_backoff: Duration::from_millis(cfg.initial_backoff_ms),
            max_backoff: Duration::from_millis(cfg.max_backoff_ms),
            ..Self::default()
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Deterministic (unjittered) delay schedule for one call.
    pub fn schedule(&self) -> ExponentialBackoff {
        ExponentialBackoff {
            current_interval: self.initial_backoff,
            initial_interval: self.initial_backoff,
            randomization_factor: 0.0,
            multiplier: self.multiplier,
            max_interval: self.max_backoff,
            max_elapsed_time: None,
            ..ExponentialBackoff::default()
        }
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// A transient error carrying `retry_after` waits that long instead of the
    /// scheduled delay. The last error is returned when attempts run out.
    pub async fn run<T, E, F, Fut>(&self, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, backoff::Error<E>>>,
        E: fmt::Display,
    {
        let mut delays = self.schedule();
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(backoff::Error::Permanent(err)) => return Err(err),
                Err(backoff::Error::Transient { err, retry_after }) => {
                    if attempt >= self.max_attempts {
                        return Err(err);
                    }
                    let delay = retry_after
                        .or_else(|| delays.next_backoff())
                        .unwrap_or(self.max_backoff);
                    debug!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "Retrying after transient failure"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(250),
            multiplier: 2.0,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result: Result<u32, String> = policy(5)
            .run(|| async {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 {
                    Err(backoff::Error::transient(format!("fail {}", n)))
                } else {
                    Ok(n)
                }
            })
            .await;

        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // 100ms then 200ms
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_capped_at_max_backoff() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result: Result<(), String> = policy(4)
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(backoff::Error::transient("down".to_string()))
            })
            .await;

        assert_eq!(result, Err("down".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // 100 + 200 + 250 (capped)
        assert_eq!(start.elapsed(), Duration::from_millis(550));
    }

    #[tokio::test(start_paused = true)]
    async fn test_permanent_error_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), String> = policy(5)
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(backoff::Error::permanent("bad request".to_string()))
            })
            .await;

        assert_eq!(result, Err("bad request".to_string()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_overrides_schedule() {
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result: Result<(), String> = policy(2)
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(backoff::Error::retry_after(
                        "429".to_string(),
                        Duration::from_secs(3),
                    ))
                } else {
                    Ok(())
                }
            })
            .await;

        assert!(result.is_ok());
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn test_from_retry_config() {
        let policy = RetryPolicy::from(RetryConfig {
            max_attempts: 0,
            initial_backoff_ms: 10,
            max_backoff_ms: 20,
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.initial_backoff, Duration::from_millis(10));
        assert_eq!(policy.max_backoff, Duration::from_millis(20));
    }
}

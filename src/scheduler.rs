//! Process-wide request scheduler for the shared, rate-limited log API.
//!
//! Every chain's log client is handed the same `Arc<RequestScheduler>`.
//! Waiters queue on a FIFO-fair `tokio::sync::Mutex`; the holder sleeps until
//! `min_interval` has passed since the previous request started, then runs its
//! request while still holding the gate, so requests never overlap.

use std::future::Future;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
pub struct RequestScheduler {
    min_interval: Duration,
    last_started: Mutex<Option<Instant>>,
}

impl RequestScheduler {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_started: Mutex::new(None),
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Run `task` once its turn comes up.
    pub async fn schedule<F, T>(&self, task: F) -> T
    where
        F: Future<Output = T>,
    {
        let mut last_started = self.last_started.lock().await;
        if let Some(last) = *last_started {
            let ready_at = last + self.min_interval;
            if ready_at > Instant::now() {
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last_started = Some(Instant::now());
        task.await
    }
}

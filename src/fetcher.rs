//! Adaptive, chunked log fetching against a result-capped log API.
//!
//! The chunk width grows while chunks come back sparse and shrinks toward the
//! configured target density; a provider result-limit error halves it and the
//! same sub-range is retried.

use crate::chain::{LogApiError, LogSource};
use crate::config::ChainConfig;
use crate::domain::{Address, BlockNumber, LogFilter, RawLog};
use std::sync::Arc;
use tracing::{debug, warn};

/// Bounds and target for the chunk width, in blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    pub min: u64,
    pub max: u64,
    pub target_logs_per_call: u64,
}

impl ChunkPolicy {
    pub fn new(min: u64, max: u64, target_logs_per_call: u64) -> Self {
        let min = min.max(1);
        Self {
            min,
            max: max.max(min),
            target_logs_per_call: target_logs_per_call.max(1),
        }
    }

    pub fn from_config(cfg: &ChainConfig) -> Self {
        Self::new(cfg.chunk_min, cfg.chunk_max, cfg.target_logs_per_call)
    }

    pub fn clamp(&self, width: u64) -> u64 {
        width.clamp(self.min, self.max)
    }

    /// Width to use after a chunk of `width` blocks returned `logs` logs.
    pub fn next_width(&self, width: u64, logs: usize) -> u64 {
        let next = if logs == 0 {
            width.saturating_mul(2)
        } else {
            width.saturating_mul(self.target_logs_per_call) / logs as u64
        };
        self.clamp(next)
    }
}

#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub logs: Vec<RawLog>,
    /// Requests sent, including ones rejected for size.
    pub calls: u32,
    pub shrinks: u32,
}

#[derive(Debug)]
pub struct AdaptiveLogFetcher {
    source: Arc<dyn LogSource>,
    address: Address,
    topics: Vec<String>,
    policy: ChunkPolicy,
    width: u64,
}

impl AdaptiveLogFetcher {
    /// Start at the widest allowed chunk.
    pub fn new(
        source: Arc<dyn LogSource>,
        address: Address,
        topics: Vec<String>,
        policy: ChunkPolicy,
    ) -> Self {
        Self {
            source,
            address,
            topics,
            width: policy.max,
            policy,
        }
    }

    pub fn with_initial_width(mut self, width: u64) -> Self {
        self.width = self.policy.clamp(width);
        self
    }

    /// Width the next chunk will request.
    pub fn width(&self) -> u64 {
        self.width
    }

    /// Fetch every matching log in `from..=to`, in chunk order.
    ///
    /// # Errors
    /// Fails on the first non-result-limit error, or on a result-limit error
    /// at minimum width.
    pub async fn fetch(
        &mut self,
        from: BlockNumber,
        to: BlockNumber,
    ) -> Result<FetchOutcome, LogApiError> {
        let mut outcome = FetchOutcome::default();
        if to < from {
            return Ok(outcome);
        }

        let mut start = from;
        loop {
            let requested = self.width.min(to - start + 1);
            let end = start + requested - 1;
            let filter = LogFilter {
                address: self.address.clone(),
                from_block: start,
                to_block: end,
                topics: self.topics.clone(),
            };

            outcome.calls += 1;
            match self.source.get_logs(&filter).await {
                Ok(logs) => {
                    debug!(
                        from = start,
                        to = end,
                        width = requested,
                        logs = logs.len(),
                        "Fetched log chunk"
                    );
                    // Sparse tails are shorter than the window; grow from the window.
                    self.width = if logs.is_empty() {
                        self.policy.next_width(self.width, 0)
                    } else {
                        self.policy.next_width(requested, logs.len())
                    };
                    outcome.logs.extend(logs);
                }
                Err(err) if err.is_result_limit() => {
                    if requested <= self.policy.min {
                        warn!(
                            from = start,
                            to = end,
                            error = %err,
                            "Result limit at minimum chunk width"
                        );
                        return Err(err);
                    }
                    self.width = (requested / 2).max(self.policy.min);
                    outcome.shrinks += 1;
                    debug!(
                        from = start,
                        to = end,
                        width = self.width,
                        "Result limit, shrinking chunk"
                    );
                    continue;
                }
                Err(err) => return Err(err),
            }

            if end >= to {
                break;
            }
            start = end + 1;
        }

        Ok(outcome)
    }
}

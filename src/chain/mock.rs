//! In-memory chain and log API for testing without network calls.

use super::{ChainClient, LogApiError, LogSource, RpcError};
use crate::decoder::encode_event;
use crate::domain::{Address, BlockHeader, BlockTag, Chain, EventKind, LogFilter, RawLog};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Canonical chain that tests can extend, reorganize and tag.
#[derive(Debug, Clone)]
pub struct MockChain {
    inner: Arc<Mutex<MockChainState>>,
}

#[derive(Debug)]
struct MockChainState {
    chain: Chain,
    blocks: BTreeMap<u64, BlockHeader>,
    finalized: Option<u64>,
    safe: Option<u64>,
    calls: Vec<BlockTag>,
    failing: bool,
}

impl MockChain {
    /// Chain with blocks `0..=head`, no finality tags.
    pub fn new(chain: Chain, head: u64) -> Self {
        let mock = Self {
            inner: Arc::new(Mutex::new(MockChainState {
                chain,
                blocks: BTreeMap::new(),
                finalized: None,
                safe: None,
                calls: Vec::new(),
                failing: false,
            })),
        };
        mock.extend_to(head);
        mock
    }

    fn state(&self) -> MutexGuard<'_, MockChainState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Expose a `finalized` tag at the given height (`None` = unsupported).
    pub fn with_finalized(self, height: Option<u64>) -> Self {
        self.state().finalized = height;
        self
    }

    /// Expose a `safe` tag at the given height (`None` = unsupported).
    pub fn with_safe(self, height: Option<u64>) -> Self {
        self.state().safe = height;
        self
    }

    pub fn set_finalized(&self, height: Option<u64>) {
        self.state().finalized = height;
    }

    /// Make every call fail with a network error until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.state().failing = failing;
    }

    /// Append canonical blocks up to `head`.
    pub fn extend_to(&self, head: u64) {
        let mut state = self.state();
        let start = state.blocks.keys().next_back().map(|n| n + 1).unwrap_or(0);
        for number in start..=head {
            let header = make_header(&state, number, "");
            state.blocks.insert(number, header);
        }
    }

    /// Replace every block at or above `from` with a fork tagged by `salt`.
    pub fn reorg_from(&self, from: u64, salt: &str) {
        let mut state = self.state();
        let heights: Vec<u64> = state.blocks.range(from..).map(|(n, _)| *n).collect();
        for number in heights {
            let header = make_header(&state, number, salt);
            state.blocks.insert(number, header);
        }
    }

    pub fn head_number(&self) -> u64 {
        self.state().blocks.keys().next_back().copied().unwrap_or(0)
    }

    pub fn hash_at(&self, number: u64) -> Option<String> {
        self.state().blocks.get(&number).map(|b| b.hash.clone())
    }

    pub fn header_at(&self, number: u64) -> Option<BlockHeader> {
        self.state().blocks.get(&number).cloned()
    }

    /// Tags requested so far, in order.
    pub fn calls(&self) -> Vec<BlockTag> {
        self.state().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }
}

fn make_header(state: &MockChainState, number: u64, salt: &str) -> BlockHeader {
    let parent_hash = match number.checked_sub(1) {
        Some(parent) => state
            .blocks
            .get(&parent)
            .map(|b| b.hash.clone())
            .unwrap_or_default(),
        None => format!("0x{:064x}", 0),
    };
    BlockHeader {
        chain: state.chain.clone(),
        number,
        hash: format!("0x{}{:0>56x}{}", state.chain.as_str().len(), number, salt),
        parent_hash,
        timestamp: 1_700_000_000 + number * 12,
    }
}

#[async_trait]
impl ChainClient for MockChain {
    async fn get_block(&self, tag: BlockTag) -> Result<Option<BlockHeader>, RpcError> {
        let mut state = self.state();
        state.calls.push(tag);
        if state.failing {
            return Err(RpcError::Network("mock chain unavailable".to_string()));
        }
        let unsupported = |name: &str| RpcError::Provider {
            code: -32602,
            message: format!("invalid block tag: {}", name),
        };
        let number = match tag {
            BlockTag::Latest => state.blocks.keys().next_back().copied(),
            BlockTag::Finalized => Some(state.finalized.ok_or_else(|| unsupported("finalized"))?),
            BlockTag::Safe => Some(state.safe.ok_or_else(|| unsupported("safe"))?),
            BlockTag::Number(n) => Some(n),
        };
        Ok(number.and_then(|n| state.blocks.get(&n).cloned()))
    }
}

/// Log API serving a fixed set of logs, with an optional result cap.
#[derive(Debug, Clone, Default)]
pub struct MockLogSource {
    inner: Arc<Mutex<MockLogState>>,
}

#[derive(Debug, Default)]
struct MockLogState {
    logs: Vec<RawLog>,
    result_cap: Option<usize>,
    fail_next: usize,
    requests: Vec<(u64, u64)>,
}

impl MockLogSource {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockLogState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Reject any query matching more than `cap` logs as a result-limit error.
    pub fn with_result_cap(self, cap: usize) -> Self {
        self.state().result_cap = Some(cap);
        self
    }

    pub fn push_log(&self, log: RawLog) {
        self.state().logs.push(log);
    }

    /// Fail the next `n` requests with a network error.
    pub fn fail_next(&self, n: usize) {
        self.state().fail_next = n;
    }

    /// Drop every log above `height` (e.g. after a simulated reorg).
    pub fn remove_logs_above(&self, height: u64) {
        self.state().logs.retain(|l| l.block_number <= height);
    }

    /// Block ranges requested so far, in order.
    pub fn requests(&self) -> Vec<(u64, u64)> {
        self.state().requests.clone()
    }

    pub fn clear_requests(&self) {
        self.state().requests.clear();
    }
}

#[async_trait]
impl LogSource for MockLogSource {
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, LogApiError> {
        let mut state = self.state();
        state.requests.push((filter.from_block, filter.to_block));
        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(LogApiError::Network("mock log api unavailable".to_string()));
        }

        let matching: Vec<RawLog> = state
            .logs
            .iter()
            .filter(|l| l.address == filter.address)
            .filter(|l| l.block_number >= filter.from_block && l.block_number <= filter.to_block)
            .filter(|l| {
                filter.topics.is_empty()
                    || l.topics
                        .first()
                        .is_some_and(|t| filter.topics.iter().any(|f| f.eq_ignore_ascii_case(t)))
            })
            .cloned()
            .collect();

        if let Some(cap) = state.result_cap {
            if matching.len() > cap {
                return Err(LogApiError::ResultLimit(format!(
                    "query returned more than {} results",
                    cap
                )));
            }
        }
        Ok(matching)
    }
}

/// Build an encoded position event log as the position manager would emit it.
#[allow(clippy::too_many_arguments)]
pub fn position_log(
    contract: &Address,
    token_id: u128,
    kind: &EventKind,
    block_number: u64,
    block_hash: &str,
    transaction_hash: &str,
    transaction_index: u64,
    log_index: u64,
) -> RawLog {
    let (topics, data) = encode_event(token_id, kind);
    RawLog {
        address: contract.clone(),
        topics,
        data,
        block_number,
        block_hash: block_hash.to_string(),
        transaction_hash: transaction_hash.to_string(),
        transaction_index,
        log_index,
        block_timestamp: None,
        removed: false,
    }
}

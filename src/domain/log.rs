//! Raw log entries as delivered by the upstream log API.

use super::{Address, BlockNumber};
use serde::{Deserialize, Serialize};

/// A single undecoded on-chain log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawLog {
    pub address: Address,
    pub topics: Vec<String>,
    pub data: String,
    pub block_number: BlockNumber,
    pub block_hash: String,
    pub transaction_hash: String,
    pub transaction_index: u64,
    pub log_index: u64,
    /// Unix seconds; not every provider returns it.
    pub block_timestamp: Option<u64>,
    /// Set by providers when the log was dropped by a reorg.
    #[serde(default)]
    pub removed: bool,
}

impl RawLog {
    pub fn key(&self) -> LogKey {
        LogKey {
            transaction_hash: self.transaction_hash.to_ascii_lowercase(),
            log_index: self.log_index,
            block_hash: self.block_hash.to_ascii_lowercase(),
        }
    }
}

/// Identity of one on-chain log occurrence.
///
/// The same `(transaction_hash, log_index)` under a different `block_hash`
/// is a re-inclusion after a reorg, not a duplicate delivery.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LogKey {
    pub transaction_hash: String,
    pub log_index: u64,
    pub block_hash: String,
}

/// Range query against the log API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub from_block: BlockNumber,
    pub to_block: BlockNumber,
    /// Accepted values for topic0; empty means any.
    pub topics: Vec<String>,
}

impl LogFilter {
    /// Same filter over a different block range.
    pub fn with_range(&self, from_block: BlockNumber, to_block: BlockNumber) -> Self {
        Self {
            from_block,
            to_block,
            ..self.clone()
        }
    }
}

//! Block headers as kept by the header store.

use super::{BlockNumber, Chain};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A recently observed block, kept only for reorg comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub chain: Chain,
    pub number: BlockNumber,
    pub hash: String,
    pub parent_hash: String,
    /// Unix seconds.
    pub timestamp: u64,
}

impl BlockHeader {
    /// Returns `true` if `self` is the direct child of `parent`.
    pub fn extends(&self, parent: &BlockHeader) -> bool {
        self.number == parent.number + 1 && self.parent_hash.eq_ignore_ascii_case(&parent.hash)
    }
}

/// Block reference accepted by `eth_getBlockByNumber`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockTag {
    Latest,
    Finalized,
    Safe,
    Number(BlockNumber),
}

impl BlockTag {
    /// JSON-RPC parameter form of the tag.
    pub fn as_param(&self) -> String {
        match self {
            BlockTag::Latest => "latest".to_string(),
            BlockTag::Finalized => "finalized".to_string(),
            BlockTag::Safe => "safe".to_string(),
            BlockTag::Number(n) => format!("0x{:x}", n),
        }
    }
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockTag::Number(n) => write!(f, "{}", n),
            other => write!(f, "{}", other.as_param()),
        }
    }
}

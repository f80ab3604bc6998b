//! Decoded position events.

use super::{Address, BlockNumber, Chain, EventOrderingKey};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of an on-chain position, shared by every local record tracking it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub chain: Chain,
    pub protocol: String,
    /// Position NFT token id, decimal.
    pub external_id: String,
}

impl fmt::Display for PositionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.chain, self.protocol, self.external_id)
    }
}

/// Typed payload of a recognized event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    IncreaseLiquidity {
        liquidity: u128,
        amount0: u128,
        amount1: u128,
    },
    DecreaseLiquidity {
        liquidity: u128,
        amount0: u128,
        amount1: u128,
    },
    Collect {
        recipient: Address,
        amount0: u128,
        amount1: u128,
    },
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::IncreaseLiquidity { .. } => "increase_liquidity",
            EventKind::DecreaseLiquidity { .. } => "decrease_liquidity",
            EventKind::Collect { .. } => "collect",
        }
    }

    /// Liquidity moved by the event; zero for Collect.
    pub fn liquidity_delta(&self) -> u128 {
        match self {
            EventKind::IncreaseLiquidity { liquidity, .. }
            | EventKind::DecreaseLiquidity { liquidity, .. } => *liquidity,
            EventKind::Collect { .. } => 0,
        }
    }

    pub fn amounts(&self) -> (u128, u128) {
        match self {
            EventKind::IncreaseLiquidity {
                amount0, amount1, ..
            }
            | EventKind::DecreaseLiquidity {
                amount0, amount1, ..
            }
            | EventKind::Collect {
                amount0, amount1, ..
            } => (*amount0, *amount1),
        }
    }

    pub fn recipient(&self) -> Option<&Address> {
        match self {
            EventKind::Collect { recipient, .. } => Some(recipient),
            _ => None,
        }
    }
}

/// A decoded event bound to the position it affects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub position: PositionKey,
    pub kind: EventKind,
    pub block_number: BlockNumber,
    /// Unix seconds.
    pub block_timestamp: u64,
    pub transaction_hash: String,
    pub transaction_index: u64,
    pub log_index: u64,
}

impl DomainEvent {
    pub fn ordering_key(&self) -> EventOrderingKey {
        EventOrderingKey::new(self.block_number, self.transaction_index, self.log_index)
    }
}

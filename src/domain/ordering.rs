//! Stable event ordering matching on-chain execution order.

use crate::domain::DomainEvent;
use serde::{Deserialize, Serialize};

/// Total order in which events are folded into the ledger.
///
/// Ordering: block_number -> transaction_index -> log_index
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventOrderingKey {
    pub block_number: u64,
    pub transaction_index: u64,
    pub log_index: u64,
}

impl EventOrderingKey {
    pub fn new(block_number: u64, transaction_index: u64, log_index: u64) -> Self {
        Self {
            block_number,
            transaction_index,
            log_index,
        }
    }
}

/// Sort events into execution order.
pub fn sort_events(events: &mut [DomainEvent]) {
    events.sort_by_key(|e| e.ordering_key());
}

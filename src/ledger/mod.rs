//! Position ledger: a pure fold over decoded events plus the applier that
//! persists its results.

use crate::domain::{Address, BlockNumber, Chain, Decimal, DomainEvent, EventOrderingKey};
use thiserror::Error;

pub mod applier;
pub mod balances;
pub mod valuation;

pub use applier::{ApplyReport, LedgerApplier, OwnerOutcome, OwnerResult};
pub use balances::LedgerBalances;
pub use valuation::{FixedPriceValuer, ValuationError, Valuer};

/// Why an event could not be folded into a position's ledger.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("decrease of {requested} exceeds liquidity {available}")]
    LiquidityUnderflow {
        requested: Decimal,
        available: Decimal,
    },
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),
    #[error("event at {event:?} does not follow latest entry at {latest:?}")]
    OutOfOrder {
        event: EventOrderingKey,
        latest: EventOrderingKey,
    },
    #[error(transparent)]
    Valuation(#[from] ValuationError),
    #[error(transparent)]
    Storage(#[from] sqlx::Error),
}

/// One persisted step of a position's ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    /// Row id; `None` until stored.
    pub id: Option<i64>,
    pub position_id: i64,
    pub chain: Chain,
    pub event_type: String,
    pub block_number: BlockNumber,
    pub block_timestamp: u64,
    pub transaction_hash: String,
    pub transaction_index: u64,
    pub log_index: u64,
    pub liquidity_delta: Decimal,
    pub amount0: Decimal,
    pub amount1: Decimal,
    pub recipient: Option<Address>,
    pub before: LedgerBalances,
    pub after: LedgerBalances,
}

impl LedgerEntry {
    /// Build the entry recording `event` moving a position from `before` to `after`.
    pub fn from_event(
        position_id: i64,
        event: &DomainEvent,
        before: LedgerBalances,
        after: LedgerBalances,
    ) -> Result<Self, LedgerError> {
        let (amount0, amount1) = event.kind.amounts();
        Ok(LedgerEntry {
            id: None,
            position_id,
            chain: event.position.chain.clone(),
            event_type: event.kind.name().to_string(),
            block_number: event.block_number,
            block_timestamp: event.block_timestamp,
            transaction_hash: event.transaction_hash.to_lowercase(),
            transaction_index: event.transaction_index,
            log_index: event.log_index,
            liquidity_delta: balances::to_decimal(event.kind.liquidity_delta(), "liquidity_delta")?,
            amount0: balances::to_decimal(amount0, "amount0")?,
            amount1: balances::to_decimal(amount1, "amount1")?,
            recipient: event.kind.recipient().cloned(),
            before,
            after,
        })
    }

    pub fn ordering_key(&self) -> EventOrderingKey {
        EventOrderingKey::new(self.block_number, self.transaction_index, self.log_index)
    }
}

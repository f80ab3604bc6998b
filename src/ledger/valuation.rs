//! Valuation of token amounts for cost basis and realized PnL.

use crate::domain::{Decimal, PositionKey};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValuationError {
    #[error("no price available for {0}")]
    MissingPrice(String),
    #[error("value overflow for {0}")]
    Overflow(String),
}

/// Prices a pair of raw token amounts in a common unit.
///
/// The pricing layer lives outside this crate; the ledger only needs this seam.
pub trait Valuer: Send + Sync + std::fmt::Debug {
    fn value(
        &self,
        position: &PositionKey,
        amount0: u128,
        amount1: u128,
    ) -> Result<Decimal, ValuationError>;
}

/// Constant unit prices per token, with token decimals applied to raw amounts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixedPriceValuer {
    pub price0: Decimal,
    pub price1: Decimal,
    pub decimals0: u32,
    pub decimals1: u32,
}

impl Default for FixedPriceValuer {
    fn default() -> Self {
        Self {
            price0: Decimal::from(1u64),
            price1: Decimal::from(1u64),
            decimals0: 0,
            decimals1: 0,
        }
    }
}

impl FixedPriceValuer {
    pub fn new(price0: Decimal, price1: Decimal, decimals0: u32, decimals1: u32) -> Self {
        Self {
            price0,
            price1,
            decimals0,
            decimals1,
        }
    }

    fn leg(
        position: &PositionKey,
        amount: u128,
        decimals: u32,
        price: Decimal,
    ) -> Result<Decimal, ValuationError> {
        Decimal::from_scaled_u128(amount, decimals)
            .and_then(|scaled| scaled.checked_mul(price))
            .ok_or_else(|| ValuationError::Overflow(position.to_string()))
    }
}

impl Valuer for FixedPriceValuer {
    fn value(
        &self,
        position: &PositionKey,
        amount0: u128,
        amount1: u128,
    ) -> Result<Decimal, ValuationError> {
        let v0 = Self::leg(position, amount0, self.decimals0, self.price0)?;
        let v1 = Self::leg(position, amount1, self.decimals1, self.price1)?;
        v0.checked_add(v1)
            .ok_or_else(|| ValuationError::Overflow(position.to_string()))
    }
}

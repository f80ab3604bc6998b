//! Pure fold of position events into running balances.

use crate::domain::{Decimal, EventKind, PositionKey};

use super::{LedgerError, Valuer};

/// Running state of one position's ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerBalances {
    pub liquidity: Decimal,
    pub cost_basis: Decimal,
    pub realized_pnl: Decimal,
    /// Raw token0 units collected.
    pub fees_collected0: Decimal,
    /// Raw token1 units collected.
    pub fees_collected1: Decimal,
}

/// Raw on-chain quantities above the decimal mantissa (2^96 - 1) do not fit
/// and are reported as `Overflow(what)`.
pub(crate) fn to_decimal(value: u128, what: &'static str) -> Result<Decimal, LedgerError> {
    Decimal::from_u128(value).ok_or(LedgerError::Overflow(what))
}

fn add(a: Decimal, b: Decimal, what: &'static str) -> Result<Decimal, LedgerError> {
    a.checked_add(b).ok_or(LedgerError::Overflow(what))
}

fn sub(a: Decimal, b: Decimal, what: &'static str) -> Result<Decimal, LedgerError> {
    a.checked_sub(b).ok_or(LedgerError::Overflow(what))
}

impl LedgerBalances {
    /// State of a position that has no entries yet.
    pub fn opening(base_liquidity: Decimal) -> Self {
        Self {
            liquidity: base_liquidity,
            ..Self::default()
        }
    }

    /// Fold one event, returning the new balances. `self` is left untouched.
    ///
    /// # Errors
    /// `LiquidityUnderflow` when a decrease exceeds the current liquidity,
    /// `Overflow` when a balance leaves the decimal range, and `Valuation`
    /// when the amounts cannot be priced.
    pub fn apply(
        &self,
        kind: &EventKind,
        position: &PositionKey,
        valuer: &dyn Valuer,
    ) -> Result<LedgerBalances, LedgerError> {
        let mut next = *self;
        match kind {
            EventKind::IncreaseLiquidity {
                liquidity,
                amount0,
                amount1,
            } => {
                let delta = to_decimal(*liquidity, "liquidity")?;
                let value = valuer.value(position, *amount0, *amount1)?;
                next.liquidity = add(self.liquidity, delta, "liquidity")?;
                next.cost_basis = add(self.cost_basis, value, "cost_basis")?;
            }
            EventKind::DecreaseLiquidity {
                liquidity,
                amount0,
                amount1,
            } => {
                let delta = to_decimal(*liquidity, "liquidity")?;
                if delta > self.liquidity {
                    return Err(LedgerError::LiquidityUnderflow {
                        requested: delta,
                        available: self.liquidity,
                    });
                }
                let removed_cost = if delta.is_zero() {
                    Decimal::zero()
                } else if delta == self.liquidity {
                    self.cost_basis
                } else {
                    // Ratio first: cost * delta overflows for 18-decimal sized balances.
                    delta
                        .checked_div(self.liquidity)
                        .and_then(|ratio| self.cost_basis.checked_mul(ratio))
                        .ok_or(LedgerError::Overflow("cost_basis"))?
                };
                let value = valuer.value(position, *amount0, *amount1)?;
                let pnl = sub(value, removed_cost, "realized_pnl")?;
                next.realized_pnl = add(self.realized_pnl, pnl, "realized_pnl")?;
                next.cost_basis = sub(self.cost_basis, removed_cost, "cost_basis")?;
                next.liquidity = sub(self.liquidity, delta, "liquidity")?;
            }
            EventKind::Collect {
                amount0, amount1, ..
            } => {
                next.fees_collected0 = add(
                    self.fees_collected0,
                    to_decimal(*amount0, "amount0")?,
                    "fees_collected0",
                )?;
                next.fees_collected1 = add(
                    self.fees_collected1,
                    to_decimal(*amount1, "amount1")?,
                    "fees_collected1",
                )?;
            }
        }
        Ok(next)
    }
}

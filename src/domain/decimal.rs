//! Lossless decimal numeric type backed by rust_decimal.
//!
//! Ledger balances are persisted as canonical strings, never as SQLite REAL.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal as RustDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lossless decimal numeric type for ledger balances.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Decimal(#[serde(with = "rust_decimal::serde::str")] RustDecimal);

impl Decimal {
    pub fn new(value: RustDecimal) -> Self {
        Decimal(value)
    }

    /// Parse a Decimal from a string losslessly.
    pub fn from_str_canonical(s: &str) -> Result<Self, rust_decimal::Error> {
        RustDecimal::from_str(s).map(Decimal)
    }

    /// Convert an on-chain integer quantity.
    ///
    /// Returns `None` when the value does not fit the 96-bit mantissa.
    pub fn from_u128(value: u128) -> Option<Self> {
        RustDecimal::from_u128(value).map(Decimal)
    }

    /// Scale an integer token amount down by `decimals` places.
    pub fn from_scaled_u128(value: u128, decimals: u32) -> Option<Self> {
        let mut d = RustDecimal::from_u128(value)?;
        d.set_scale(decimals).ok()?;
        Some(Decimal(d))
    }

    /// Format without exponent notation and without trailing zeros.
    pub fn to_canonical_string(&self) -> String {
        format!("{}", self.0.normalize())
    }

    pub fn inner(&self) -> RustDecimal {
        self.0
    }

    pub fn zero() -> Self {
        Decimal(RustDecimal::ZERO)
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn checked_add(self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_add(rhs.0).map(Decimal)
    }

    pub fn checked_sub(self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_sub(rhs.0).map(Decimal)
    }

    pub fn checked_mul(self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_mul(rhs.0).map(Decimal)
    }

    pub fn checked_div(self, rhs: Decimal) -> Option<Decimal> {
        self.0.checked_div(rhs.0).map(Decimal)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_canonical_string())
    }
}

impl FromStr for Decimal {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_canonical(s)
    }
}

impl From<RustDecimal> for Decimal {
    fn from(value: RustDecimal) -> Self {
        Decimal(value)
    }
}

impl From<u64> for Decimal {
    fn from(value: u64) -> Self {
        Decimal(RustDecimal::from(value))
    }
}

impl std::ops::Add for Decimal {
    type Output = Decimal;

    fn add(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Decimal {
    type Output = Decimal;

    fn sub(self, rhs: Decimal) -> Decimal {
        Decimal(self.0 - rhs.0)
    }
}

impl std::ops::Neg for Decimal {
    type Output = Decimal;

    fn neg(self) -> Decimal {
        Decimal(-self.0)
    }
}

//! Domain types for the position ledger.
//!
//! This module provides:
//! - Lossless numeric handling via Decimal wrapper
//! - Domain primitives: Chain, Address, BlockNumber
//! - Block headers, raw logs and decoded position events
//! - Stable event ordering key for deterministic processing

pub mod decimal;
pub mod event;
pub mod header;
pub mod log;
pub mod ordering;
pub mod primitives;

pub use decimal::Decimal;
pub use event::{DomainEvent, EventKind, PositionKey};
pub use header::{BlockHeader, BlockTag};
pub use log::{LogFilter, LogKey, RawLog};
pub use ordering::{sort_events, EventOrderingKey};
pub use primitives::{Address, BlockNumber, Chain};

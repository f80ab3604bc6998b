pub mod chain;
pub mod config;
pub mod db;
pub mod decoder;
pub mod domain;
pub mod error;
pub mod fetcher;
pub mod finality;
pub mod ledger;
pub mod reorg;
pub mod retry;
pub mod scanner;
pub mod scheduler;

pub use chain::{ChainClient, ExplorerLogApi, JsonRpcClient, LogApiError, LogSource, RpcError};
pub use config::{ChainConfig, Config};
pub use db::{init_db, Repository};
pub use domain::{
    Address, BlockHeader, BlockNumber, BlockTag, Chain, Decimal, DomainEvent, EventKind,
    PositionKey, RawLog,
};
pub use error::{AppError, ScanError};
pub use ledger::{FixedPriceValuer, LedgerApplier, Valuer};
pub use scanner::{ChainScanner, ScannerState, TickReport};
pub use scheduler::RequestScheduler;

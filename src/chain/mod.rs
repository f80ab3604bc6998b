//! Upstream interfaces: the chain RPC node and the rate-limited log API.

use crate::domain::{BlockHeader, BlockTag, LogFilter, RawLog};
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub mod explorer;
pub mod mock;
pub mod rpc;

pub use explorer::ExplorerLogApi;
pub use mock::{MockChain, MockLogSource};
pub use rpc::JsonRpcClient;

/// Block header access on one chain.
#[async_trait]
pub trait ChainClient: Send + Sync + fmt::Debug {
    /// Fetch a block header by tag or number.
    ///
    /// `Ok(None)` means the node does not know the block (yet).
    /// Unsupported tags (`finalized`/`safe` on some chains) surface as
    /// `RpcError::Provider`; callers probing capabilities treat that as a signal.
    async fn get_block(&self, tag: BlockTag) -> Result<Option<BlockHeader>, RpcError>;

    /// Fetch the current head.
    async fn head(&self) -> Result<BlockHeader, RpcError> {
        self.get_block(BlockTag::Latest)
            .await?
            .ok_or_else(|| RpcError::Parse("latest block missing".to_string()))
    }
}

/// Range queries against the log API.
///
/// Implementations must report provider result/range caps as
/// `LogApiError::ResultLimit`, distinctly from transport failures.
#[async_trait]
pub trait LogSource: Send + Sync + fmt::Debug {
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, LogApiError>;
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RpcError {
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    /// JSON-RPC error object returned by the node.
    #[error("Provider error {code}: {message}")]
    Provider { code: i64, message: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LogApiError {
    /// Range or result count exceeds what the provider will return in one call.
    #[error("Result limit: {0}")]
    ResultLimit(String),
    #[error("Rate limited")]
    RateLimited,
    #[error("Network error: {0}")]
    Network(String),
    #[error("HTTP error {status}: {message}")]
    Http { status: u16, message: String },
    #[error("Authentication error: {0}")]
    Auth(String),
    #[error("Provider error: {0}")]
    Provider(String),
    #[error("Parse error: {0}")]
    Parse(String),
}

impl LogApiError {
    pub fn is_result_limit(&self) -> bool {
        matches!(self, LogApiError::ResultLimit(_))
    }

    /// Worth retrying the same request after a delay.
    pub fn is_transient(&self) -> bool {
        match self {
            LogApiError::RateLimited | LogApiError::Network(_) => true,
            LogApiError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Build the HTTP client shared by the RPC and log API clients.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder().timeout(timeout).build()
}

use crate::chain::{LogApiError, RpcError};
use crate::config::ConfigError;
use thiserror::Error;

/// Process-level errors; only configuration and database setup are fatal.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Failure of a single scanner tick.
///
/// Never fatal: the scanner logs it and retries on the next poll.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error(transparent)]
    LogApi(#[from] LogApiError),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
    #[error("block {0} not available from provider")]
    MissingBlock(u64),
    #[error("watermark for chain {0} is missing")]
    MissingWatermark(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_error_wraps_config_error() {
        let err: AppError = ConfigError::MissingEnv("DATABASE_PATH".to_string()).into();
        assert_eq!(
            err.to_string(),
            "Configuration error: Missing required environment variable: DATABASE_PATH"
        );
    }

    #[test]
    fn test_scan_error_is_transparent_for_upstream() {
        let err: ScanError = LogApiError::RateLimited.into();
        assert_eq!(err.to_string(), "Rate limited");
        assert_eq!(
            ScanError::MissingBlock(42).to_string(),
            "block 42 not available from provider"
        );
    }
}

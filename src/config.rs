use crate::domain::{Address, Chain};
use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub log_api_url: String,
    pub log_api_key: String,
    pub log_api_min_interval_ms: u64,
    pub log_api_max_results: usize,
    pub request_timeout_ms: u64,
    pub retry: RetryConfig,
    pub resume_from_watermark: bool,
    pub chains: Vec<ChainConfig>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

/// Per-chain scanner settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainConfig {
    pub chain: Chain,
    pub chain_id: u64,
    pub rpc_url: String,
    pub position_manager: Address,
    pub protocol: String,
    /// Blocks behind head treated as final when no finality tag is exposed.
    pub confirmations_fallback: u64,
    pub poll_interval_ms: u64,
    pub chunk_min: u64,
    pub chunk_max: u64,
    pub target_logs_per_call: u64,
    pub max_blocks_per_tick: u64,
}

impl ChainConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_map(std::env::vars().collect())
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_path = required(&env_map, "DATABASE_PATH")?;
        let log_api_key = required(&env_map, "LOG_API_KEY")?;
        let log_api_url = env_map
            .get("LOG_API_URL")
            .cloned()
            .unwrap_or_else(|| "https://api.etherscan.io/v2/api".to_string());

        let log_api_min_interval_ms = parse_or(&env_map, "LOG_API_MIN_INTERVAL_MS", 250u64)?;
        let log_api_max_results = parse_or(&env_map, "LOG_API_MAX_RESULTS", 1000usize)?;
        let request_timeout_ms = parse_or(&env_map, "REQUEST_TIMEOUT_MS", 30_000u64)?;

        let retry = RetryConfig {
            max_attempts: parse_or(&env_map, "RETRY_MAX_ATTEMPTS", 5u32)?,
            initial_backoff_ms: parse_or(&env_map, "RETRY_INITIAL_BACKOFF_MS", 500u64)?,
            max_backoff_ms: parse_or(&env_map, "RETRY_MAX_BACKOFF_MS", 8_000u64)?,
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue(
                "RETRY_MAX_ATTEMPTS".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let resume_from_watermark = match env_map
            .get("RESUME_FROM_WATERMARK")
            .map(|s| s.as_str())
            .unwrap_or("false")
        {
            "true" | "1" => true,
            "false" | "0" => false,
            other => {
                return Err(ConfigError::InvalidValue(
                    "RESUME_FROM_WATERMARK".to_string(),
                    format!("must be true or false, got {}", other),
                ))
            }
        };

        let slugs = parse_chain_slugs(&required(&env_map, "CHAINS")?);
        if slugs.is_empty() {
            return Err(ConfigError::InvalidValue(
                "CHAINS".to_string(),
                "must name at least one chain".to_string(),
            ));
        }

        let chains = slugs
            .iter()
            .map(|slug| parse_chain_config(&env_map, slug))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Config {
            database_path,
            log_api_url,
            log_api_key,
            log_api_min_interval_ms,
            log_api_max_results,
            request_timeout_ms,
            retry,
            resume_from_watermark,
            chains,
        })
    }
}

fn parse_chain_slugs(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn parse_chain_config(
    env_map: &HashMap<String, String>,
    slug: &str,
) -> Result<ChainConfig, ConfigError> {
    let prefix = format!("CHAIN_{}_", slug.to_ascii_uppercase().replace('-', "_"));
    let key = |suffix: &str| format!("{}{}", prefix, suffix);

    let rpc_url = required(env_map, &key("RPC_URL"))?;
    let chain_id = parse_required::<u64>(env_map, &key("CHAIN_ID"))?;
    let position_manager = Address::new(required(env_map, &key("POSITION_MANAGER"))?);
    let protocol = env_map
        .get(&key("PROTOCOL"))
        .cloned()
        .unwrap_or_else(|| "uniswap-v3".to_string());

    let confirmations_fallback = parse_or(env_map, &key("CONFIRMATIONS_FALLBACK"), 64u64)?;
    let poll_interval_ms = parse_or(env_map, &key("POLL_INTERVAL_MS"), 12_000u64)?;
    let chunk_min = parse_or(env_map, &key("CHUNK_MIN"), 10u64)?;
    let chunk_max = parse_or(env_map, &key("CHUNK_MAX"), 2_000u64)?;
    let target_logs_per_call = parse_or(env_map, &key("TARGET_LOGS_PER_CALL"), 500u64)?;
    let max_blocks_per_tick = parse_or(env_map, &key("MAX_BLOCKS_PER_TICK"), 500u64)?;

    if chunk_min == 0 {
        return Err(ConfigError::InvalidValue(
            key("CHUNK_MIN"),
            "must be at least 1".to_string(),
        ));
    }
    if chunk_min > chunk_max {
        return Err(ConfigError::InvalidValue(
            key("CHUNK_MAX"),
            format!("must be >= CHUNK_MIN ({})", chunk_min),
        ));
    }
    for (name, value) in [
        ("MAX_BLOCKS_PER_TICK", max_blocks_per_tick),
        ("POLL_INTERVAL_MS", poll_interval_ms),
        ("TARGET_LOGS_PER_CALL", target_logs_per_call),
    ] {
        if value == 0 {
            return Err(ConfigError::InvalidValue(
                key(name),
                "must be at least 1".to_string(),
            ));
        }
    }

    Ok(ChainConfig {
        chain: Chain::new(slug),
        chain_id,
        rpc_url,
        position_manager,
        protocol,
        confirmations_fallback,
        poll_interval_ms,
        chunk_min,
        chunk_max,
        target_logs_per_call,
        max_blocks_per_tick,
    })
}

fn required(env_map: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    env_map
        .get(name)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ConfigError::MissingEnv(name.to_string()))
}

fn parse_required<T: FromStr>(
    env_map: &HashMap<String, String>,
    name: &str,
) -> Result<T, ConfigError> {
    let raw = required(env_map, name)?;
    raw.parse::<T>().map_err(|_| {
        ConfigError::InvalidValue(name.to_string(), format!("could not parse {:?}", raw))
    })
}

fn parse_or<T: FromStr>(
    env_map: &HashMap<String, String>,
    name: &str,
    default: T,
) -> Result<T, ConfigError> {
    match env_map.get(name) {
        Some(raw) => raw.trim().parse::<T>().map_err(|_| {
            ConfigError::InvalidValue(name.to_string(), format!("could not parse {:?}", raw))
        }),
        None => Ok(default),
    }
}

//! Etherscan-compatible `getLogs` client.
//!
//! All requests go through the process-wide [`RequestScheduler`] so that
//! every chain together stays under the provider's per-second ceiling.

use super::{LogApiError, LogSource};
use crate::domain::primitives::parse_hex_u64;
use crate::domain::{Address, LogFilter, RawLog};
use crate::retry::RetryPolicy;
use crate::scheduler::RequestScheduler;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ExplorerLogApi {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    chain_id: u64,
    /// Page size requested; a full page is treated as truncated.
    max_results: usize,
    scheduler: Arc<RequestScheduler>,
    retry: RetryPolicy,
}

/// One log row in the explorer's response format.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExplorerLog {
    address: String,
    topics: Vec<String>,
    data: String,
    block_number: String,
    #[serde(default)]
    block_hash: String,
    #[serde(default)]
    time_stamp: Option<String>,
    log_index: String,
    transaction_hash: String,
    transaction_index: String,
}

impl ExplorerLogApi {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        client: reqwest::Client,
        base_url: String,
        api_key: String,
        chain_id: u64,
        max_results: usize,
        scheduler: Arc<RequestScheduler>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            client,
            base_url,
            api_key,
            chain_id,
            max_results: max_results.max(1),
            scheduler,
            retry,
        }
    }

    fn query_params(&self, filter: &LogFilter) -> Vec<(&'static str, String)> {
        let mut params = vec![
            ("chainid", self.chain_id.to_string()),
            ("module", "logs".to_string()),
            ("action", "getLogs".to_string()),
            ("address", filter.address.as_str().to_string()),
            ("fromBlock", filter.from_block.to_string()),
            ("toBlock", filter.to_block.to_string()),
            ("page", "1".to_string()),
            ("offset", self.max_results.to_string()),
            ("apikey", self.api_key.clone()),
        ];
        // The explorer filters on a single topic0; multiple signatures are
        // filtered locally after the call.
        if let [topic0] = filter.topics.as_slice() {
            params.push(("topic0", topic0.clone()));
        }
        params
    }

    async fn request_once(&self, params: &[(&'static str, String)]) -> Result<Value, LogApiError> {
        let response = self
            .client
            .get(&self.base_url)
            .query(params)
            .send()
            .await
            .map_err(|e| LogApiError::Network(e.to_string()))?;

        let status = response.status();
        if status == 429 {
            return Err(LogApiError::RateLimited);
        }
        if status == 401 || status == 403 {
            return Err(LogApiError::Auth(format!("HTTP {}", status.as_u16())));
        }
        if !status.is_success() {
            return Err(LogApiError::Http {
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| LogApiError::Parse(e.to_string()))
    }
}

#[async_trait]
impl LogSource for ExplorerLogApi {
    async fn get_logs(&self, filter: &LogFilter) -> Result<Vec<RawLog>, LogApiError> {
        debug!(
            chain_id = self.chain_id,
            from = filter.from_block,
            to = filter.to_block,
            "Fetching logs"
        );
        let params = self.query_params(filter);

        let body = self
            .retry
            .run(|| async {
                self.scheduler
                    .schedule(self.request_once(&params))
                    .await
                    .map_err(|e| {
                        if e.is_transient() {
                            backoff::Error::transient(e)
                        } else {
                            backoff::Error::permanent(e)
                        }
                    })
            })
            .await?;

        let rows = parse_response(body)?;
        if rows.len() >= self.max_results {
            return Err(LogApiError::ResultLimit(format!(
                "{} results returned for {}..={}, page is full",
                rows.len(),
                filter.from_block,
                filter.to_block
            )));
        }

        let mut logs = Vec::with_capacity(rows.len());
        for row in rows {
            let log = row_to_raw_log(row)?;
            if filter.topics.is_empty()
                || log
                    .topics
                    .first()
                    .is_some_and(|t| filter.topics.iter().any(|f| f.eq_ignore_ascii_case(t)))
            {
                logs.push(log);
            }
        }
        Ok(logs)
    }
}

/// Interpret the explorer's `{status, message, result}` envelope.
fn parse_response(body: Value) -> Result<Vec<ExplorerLog>, LogApiError> {
    let status = body.get("status").and_then(|s| s.as_str()).unwrap_or("");
    let message = body
        .get("message")
        .and_then(|m| m.as_str())
        .unwrap_or("")
        .to_string();

    if status == "1" {
        let result = body
            .get("result")
            .cloned()
            .ok_or_else(|| LogApiError::Parse("Missing result field".to_string()))?;
        return serde_json::from_value(result).map_err(|e| LogApiError::Parse(e.to_string()));
    }

    let detail = match body.get("result") {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };
    let text = format!("{} {}", message, detail).to_ascii_lowercase();

    if text.contains("no records found") {
        Ok(Vec::new())
    } else if text.contains("rate limit") {
        Err(LogApiError::RateLimited)
    } else if text.contains("api key") || text.contains("apikey") {
        Err(LogApiError::Auth(detail))
    } else if text.contains("result window is too large")
        || text.contains("more than")
        || text.contains("too many")
        || text.contains("block range")
    {
        Err(LogApiError::ResultLimit(format!("{} {}", message, detail).trim().to_string()))
    } else {
        Err(LogApiError::Provider(format!("{} {}", message, detail).trim().to_string()))
    }
}

fn row_to_raw_log(row: ExplorerLog) -> Result<RawLog, LogApiError> {
    let hex = |name: &str, value: &str| {
        parse_hex_u64(value)
            .ok_or_else(|| LogApiError::Parse(format!("Invalid {}: {}", name, value)))
    };
    Ok(RawLog {
        address: Address::new(row.address),
        topics: row.topics.into_iter().map(|t| t.to_ascii_lowercase()).collect(),
        data: row.data,
        block_number: hex("blockNumber", &row.block_number)?,
        block_hash: row.block_hash.to_ascii_lowercase(),
        transaction_hash: row.transaction_hash.to_ascii_lowercase(),
        transaction_index: hex("transactionIndex", &row.transaction_index)?,
        log_index: hex("logIndex", &row.log_index)?,
        block_timestamp: match row.time_stamp {
            Some(ts) => Some(hex("timeStamp", &ts)?),
            None => None,
        },
        removed: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample_row() -> Value {
        serde_json::json!({
            "address": "0xC36442b4a4522E871399CD717aBDD847Ab11FE88",
            "topics": [
                "0x3067048BEEE31B25B2F1681F88DAC838C8BBA36AF25BFB2B7CF7473A5847E35F",
                "0x01"
            ],
            "data": "0x",
            "blockNumber": "0x10",
            "blockHash": "0xBEEF",
            "timeStamp": "0x65",
            "gasPrice": "0x1",
            "gasUsed": "0x1",
            "logIndex": "0x",
            "transactionHash": "0xFEED",
            "transactionIndex": "0x2"
        })
    }

    #[test]
    fn test_parse_ok_response() {
        let body = serde_json::json!({"status": "1", "message": "OK", "result": [sample_row()]});
        let rows = parse_response(body).unwrap();
        assert_eq!(rows.len(), 1);

        let log = row_to_raw_log(rows.into_iter().next().unwrap()).unwrap();
        assert_eq!(log.block_number, 16);
        assert_eq!(log.log_index, 0);
        assert_eq!(log.transaction_index, 2);
        assert_eq!(log.block_timestamp, Some(0x65));
        assert_eq!(log.block_hash, "0xbeef");
        assert_eq!(log.address.as_str(), "0xc36442b4a4522e871399cd717abdd847ab11fe88");
    }

    #[test]
    fn test_parse_no_records() {
        let body = serde_json::json!({"status": "0", "message": "No records found", "result": []});
        assert!(parse_response(body).unwrap().is_empty());
    }

    #[test]
    fn test_parse_result_window_error() {
        let body = serde_json::json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Result window is too large, PageNo x Offset size must be less than or equal to 10000"
        });
        assert!(parse_response(body).unwrap_err().is_result_limit());
    }

    #[test]
    fn test_parse_rate_limit_error() {
        let body = serde_json::json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Max rate limit reached, please use API Key for higher rate limit"
        });
        assert_eq!(parse_response(body).unwrap_err(), LogApiError::RateLimited);
    }

    #[test]
    fn test_parse_auth_error() {
        let body = serde_json::json!({
            "status": "0",
            "message": "NOTOK",
            "result": "Invalid API Key"
        });
        assert!(matches!(parse_response(body), Err(LogApiError::Auth(_))));
    }

    #[test]
    fn test_query_params_single_topic() {
        let api = ExplorerLogApi::new(
            reqwest::Client::new(),
            "http://example.invalid".to_string(),
            "secret".to_string(),
            42161,
            1000,
            Arc::new(RequestScheduler::new(Duration::from_millis(1))),
            RetryPolicy::none(),
        );
        let filter = LogFilter {
            address: Address::new("0xpm"),
            from_block: 10,
            to_block: 20,
            topics: vec!["0xt0".to_string()],
        };
        let params = api.query_params(&filter);
        assert!(params.contains(&("chainid", "42161".to_string())));
        assert!(params.contains(&("topic0", "0xt0".to_string())));
        assert!(params.contains(&("offset", "1000".to_string())));

        let multi = LogFilter {
            topics: vec!["0xt0".to_string(), "0xt1".to_string()],
            ..filter
        };
        assert!(!api.query_params(&multi).iter().any(|(k, _)| *k == "topic0"));
    }
}

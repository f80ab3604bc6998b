//! JSON-RPC node client for block headers.

use super::{ChainClient, RpcError};
use crate::domain::primitives::parse_hex_u64;
use crate::domain::{BlockHeader, BlockTag, Chain};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Header client over `eth_getBlockByNumber`.
#[derive(Debug)]
pub struct JsonRpcClient {
    client: Client,
    url: String,
    chain: Chain,
    retry: RetryPolicy,
    next_id: AtomicU64,
}

impl JsonRpcClient {
    pub fn new(client: Client, url: String, chain: Chain, retry: RetryPolicy) -> Self {
        Self {
            client,
            url,
            chain,
            retry,
            next_id: AtomicU64::new(1),
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, RpcError> {
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": self.next_id.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });

        self.retry
            .run(|| async {
                let response = self
                    .client
                    .post(&self.url)
                    .json(&payload)
                    .send()
                    .await
                    .map_err(|e| backoff::Error::transient(RpcError::Network(e.to_string())))?;

                let status = response.status();
                if status == 429 || status.is_server_error() {
                    return Err(backoff::Error::transient(RpcError::Http {
                        status: status.as_u16(),
                        message: "Server busy".to_string(),
                    }));
                }
                if !status.is_success() {
                    return Err(backoff::Error::permanent(RpcError::Http {
                        status: status.as_u16(),
                        message: "Client error".to_string(),
                    }));
                }

                let body = response
                    .json::<Value>()
                    .await
                    .map_err(|e| backoff::Error::permanent(RpcError::Parse(e.to_string())))?;
                extract_result(body).map_err(backoff::Error::permanent)
            })
            .await
    }
}

#[async_trait]
impl ChainClient for JsonRpcClient {
    async fn get_block(&self, tag: BlockTag) -> Result<Option<BlockHeader>, RpcError> {
        debug!(chain = %self.chain, tag = %tag, "eth_getBlockByNumber");
        let result = self
            .call(
                "eth_getBlockByNumber",
                serde_json::json!([tag.as_param(), false]),
            )
            .await?;
        if result.is_null() {
            return Ok(None);
        }
        parse_header(&self.chain, &result).map(Some)
    }
}

/// Split a JSON-RPC response into its result or its error object.
fn extract_result(mut body: Value) -> Result<Value, RpcError> {
    if let Some(err) = body.get("error") {
        return Err(RpcError::Provider {
            code: err.get("code").and_then(|c| c.as_i64()).unwrap_or(0),
            message: err
                .get("message")
                .and_then(|m| m.as_str())
                .unwrap_or("unknown error")
                .to_string(),
        });
    }
    Ok(body.get_mut("result").map(Value::take).unwrap_or(Value::Null))
}

fn parse_header(chain: &Chain, block: &Value) -> Result<BlockHeader, RpcError> {
    let field = |name: &str| {
        block
            .get(name)
            .and_then(|v| v.as_str())
            .ok_or_else(|| RpcError::Parse(format!("Missing {} field", name)))
    };
    let number = parse_hex_u64(field("number")?)
        .ok_or_else(|| RpcError::Parse("Invalid block number".to_string()))?;
    let timestamp = parse_hex_u64(field("timestamp")?)
        .ok_or_else(|| RpcError::Parse("Invalid block timestamp".to_string()))?;

    Ok(BlockHeader {
        chain: chain.clone(),
        number,
        hash: field("hash")?.to_ascii_lowercase(),
        parent_hash: field("parentHash")?.to_ascii_lowercase(),
        timestamp,
    })
}

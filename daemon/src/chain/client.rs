//! Narrow interface to the EVM world: log polling over JSON-RPC and
//! checkpoint submission through the custody submitter. The full EVM
//! transaction pipeline (nonces, gas, signing) lives behind the submitter
//! endpoint, outside this process.

use std::str::FromStr;

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::core::{error::BrokerError, model::CheckpointData};

/// A raw log as fetched from the chain.
#[derive(Debug, Clone)]
pub struct ChainLog {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Vec<u8>,
    pub block_number: u64,
    pub tx_hash: B256,
    pub log_index: u64,
}

#[async_trait]
pub trait ChainClient: Send + Sync {
    async fn head_block(&self) -> Result<u64, BrokerError>;

    async fn fetch_logs(
        &self,
        contract: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ChainLog>, BrokerError>;

    /// Land a co-signed state on chain to refute a stale challenge.
    /// Returns the transaction hash.
    async fn checkpoint(&self, data: &CheckpointData) -> Result<String, BrokerError>;
}

pub struct HttpChainClient {
    http: reqwest::Client,
    rpc_url: String,
    submitter_url: Option<String>,
}

impl HttpChainClient {
    pub fn new(rpc_url: String, submitter_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            rpc_url,
            submitter_url,
        }
    }

    async fn rpc_call(&self, url: &str, method: &str, params: Value) -> Result<Value, BrokerError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        let response: Value = self
            .http
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| BrokerError::ChainClient(format!("{}: {}", method, e)))?
            .json()
            .await
            .map_err(|e| BrokerError::ChainClient(format!("{}: {}", method, e)))?;
        if let Some(error) = response.get("error") {
            return Err(BrokerError::ChainClient(format!("{}: {}", method, error)));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| BrokerError::ChainClient(format!("{}: missing result", method)))
    }
}

fn parse_quantity(value: &Value) -> Result<u64, BrokerError> {
    let raw = value
        .as_str()
        .ok_or_else(|| BrokerError::ChainClient(format!("expected quantity, got {}", value)))?;
    let stripped = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(stripped, 16)
        .map_err(|_| BrokerError::ChainClient(format!("bad quantity {}", raw)))
}

fn parse_hash(value: &Value) -> Result<B256, BrokerError> {
    let raw = value
        .as_str()
        .ok_or_else(|| BrokerError::ChainClient(format!("expected hash, got {}", value)))?;
    B256::from_str(raw).map_err(|_| BrokerError::ChainClient(format!("bad hash {}", raw)))
}

fn parse_log(value: &Value) -> Result<ChainLog, BrokerError> {
    let address = value
        .get("address")
        .and_then(|a| a.as_str())
        .and_then(|a| Address::from_str(a).ok())
        .ok_or_else(|| BrokerError::ChainClient("log missing address".to_string()))?;
    let topics = value
        .get("topics")
        .and_then(|t| t.as_array())
        .ok_or_else(|| BrokerError::ChainClient("log missing topics".to_string()))?
        .iter()
        .map(parse_hash)
        .collect::<Result<Vec<_>, _>>()?;
    let data_raw = value.get("data").and_then(|d| d.as_str()).unwrap_or("0x");
    let data = hex::decode(data_raw.strip_prefix("0x").unwrap_or(data_raw))
        .map_err(|_| BrokerError::ChainClient("bad log data".to_string()))?;
    Ok(ChainLog {
        address,
        topics,
        data,
        block_number: parse_quantity(
            value
                .get("blockNumber")
                .ok_or_else(|| BrokerError::ChainClient("log missing blockNumber".to_string()))?,
        )?,
        tx_hash: parse_hash(
            value
                .get("transactionHash")
                .ok_or_else(|| BrokerError::ChainClient("log missing transactionHash".to_string()))?,
        )?,
        log_index: parse_quantity(
            value
                .get("logIndex")
                .ok_or_else(|| BrokerError::ChainClient("log missing logIndex".to_string()))?,
        )?,
    })
}

#[async_trait]
impl ChainClient for HttpChainClient {
    async fn head_block(&self) -> Result<u64, BrokerError> {
        let result = self
            .rpc_call(&self.rpc_url, "eth_blockNumber", json!([]))
            .await?;
        parse_quantity(&result)
    }

    async fn fetch_logs(
        &self,
        contract: Address,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ChainLog>, BrokerError> {
        let result = self
            .rpc_call(
                &self.rpc_url,
                "eth_getLogs",
                json!([{
                    "address": contract.to_checksum(None),
                    "fromBlock": format!("0x{:x}", from_block),
                    "toBlock": format!("0x{:x}", to_block),
                }]),
            )
            .await?;
        result
            .as_array()
            .ok_or_else(|| BrokerError::ChainClient("eth_getLogs: expected array".to_string()))?
            .iter()
            .map(parse_log)
            .collect()
    }

    async fn checkpoint(&self, data: &CheckpointData) -> Result<String, BrokerError> {
        let submitter = self.submitter_url.as_ref().ok_or_else(|| {
            BrokerError::ChainClient("no custody submitter configured".to_string())
        })?;
        let result = self
            .rpc_call(submitter, "custody_checkpoint", json!([data]))
            .await?;
        result
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| BrokerError::ChainClient("custody_checkpoint: expected tx hash".to_string()))
    }
}

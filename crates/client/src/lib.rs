// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Read-only JSON-RPC client for the settlement chain.
//!
//! Every read the monitor performs goes through here: the latest height,
//! block timestamps, filtered event logs, transaction payloads and contract
//! view calls at a historical height. Calls are retried on transport faults;
//! a revert is classified at this layer and surfaced as [`Error::Revert`] so
//! callers never match on message strings.

use std::sync::atomic::{AtomicUsize, Ordering};

use ethereum_types::{Address, H256};
use log::warn;
use serde_json::{json, Value};

use monitor_types::{
    constants::{EXECUTION_REVERTED, RETRIES, RETRY_WAIT, RPC_TIMEOUT},
    Error, Log,
};

/// A handle to one ETH node. Cheap to clone; the underlying HTTP connection
/// pool is shared.
#[derive(Debug, Clone)]
pub struct EthRpcClient {
    http: reqwest::Client,
    url: String,
}

static REQUEST_ID: AtomicUsize = AtomicUsize::new(1);

impl EthRpcClient {
    pub fn new(url: &str) -> Result<Self, Error> {
        let http = reqwest::Client::builder()
            .timeout(RPC_TIMEOUT)
            .build()
            .map_err(|e| Error::Dial(format!("unable to build HTTP client: {}", e)))?;
        Ok(EthRpcClient {
            http,
            url: url.to_owned(),
        })
    }

    /// Latest block number known to the node.
    pub async fn current_height(&self) -> Result<u64, Error> {
        let result = self
            .request_with_retry("eth_blockNumber", json!([]))
            .await?;
        parse_quantity(&result)
    }

    /// Timestamp of the block at `number`.
    pub async fn block_timestamp(&self, number: u64) -> Result<u64, Error> {
        let result = self
            .request_with_retry("eth_getBlockByNumber", json!([quantity(number), false]))
            .await?;
        if result.is_null() {
            return Err(Error::Other(format!("block {} not found", number)));
        }
        let timestamp = result
            .get("timestamp")
            .ok_or_else(|| Error::Other(format!("header of block {} has no timestamp", number)))?;
        parse_quantity(timestamp)
    }

    /// All logs emitted by `address` in the inclusive block range.
    /// An empty result is reported as [`Error::NoLogsFound`].
    pub async fn filter_logs(
        &self,
        from: u64,
        to: u64,
        address: &Address,
    ) -> Result<Vec<Log>, Error> {
        let query = json!([{
            "fromBlock": quantity(from),
            "toBlock": quantity(to),
            "address": format!("{:#x}", address),
        }]);
        let result = self.request_with_retry("eth_getLogs", query).await?;
        let logs: Vec<Log> = serde_json::from_value(result)
            .map_err(|e| Error::Other(format!("unable to decode log batch: {}", e)))?;
        if logs.is_empty() {
            warn!("No logs were found for the given criteria.");
            return Err(Error::NoLogsFound);
        }
        Ok(logs)
    }

    /// Input payload of a mined transaction. Not retried here: the caller
    /// owns the retry policy for this read, since a pending transaction is
    /// expected to resolve on its own.
    pub async fn transaction_payload(&self, tx_hash: &H256) -> Result<Vec<u8>, Error> {
        let result = match self
            .request("eth_getTransactionByHash", json!([format!("{:#x}", tx_hash)]))
            .await
        {
            Ok(result) => result,
            Err(e @ Error::Dial(_)) => return Err(e),
            Err(_) => {
                return Err(Error::TxHash(
                    "unable to fetch transaction from the ETH node".into(),
                ))
            }
        };
        if result.is_null() {
            return Err(Error::TxHash(format!(
                "transaction {:#x} is unknown to the node",
                tx_hash
            )));
        }
        if result.get("blockNumber").map_or(true, Value::is_null) {
            return Err(Error::PendingTx);
        }
        let input = result
            .get("input")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::TxHash("transaction payload missing".into()))?;
        decode_hex_bytes(input)
    }

    /// `eth_call` against `to` with the given calldata. `at` pins the call to
    /// a historical height; `None` calls against the latest block. Reverts
    /// come back as [`Error::Revert`] and are never retried.
    pub async fn call_contract(
        &self,
        to: &Address,
        data: Vec<u8>,
        at: Option<u64>,
    ) -> Result<Vec<u8>, Error> {
        let block = match at {
            Some(number) => json!(quantity(number)),
            None => json!("latest"),
        };
        let params = json!([{
            "to": format!("{:#x}", to),
            "data": format!("0x{}", hex::encode(&data)),
        }, block]);
        let result = self.request_with_retry("eth_call", params).await?;
        let output = result
            .as_str()
            .ok_or_else(|| Error::Other("eth_call returned a non-string result".into()))?;
        decode_hex_bytes(output)
    }

    async fn request_with_retry(&self, method: &str, params: Value) -> Result<Value, Error> {
        let mut attempt = 0;
        loop {
            match self.request(method, params.clone()).await {
                Ok(result) => return Ok(result),
                Err(e @ Error::Revert(_)) => return Err(e),
                Err(e) => {
                    attempt += 1;
                    if attempt >= RETRIES {
                        return Err(e);
                    }
                    tokio::time::sleep(RETRY_WAIT).await;
                }
            }
        }
    }

    async fn request(&self, method: &str, params: Value) -> Result<Value, Error> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": REQUEST_ID.fetch_add(1, Ordering::Relaxed),
            "method": method,
            "params": params,
        });
        let response: Value = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Dial(format!("{} ({})", e, self.url)))?
            .json()
            .await
            .map_err(|e| Error::Dial(format!("malformed response from {}: {}", self.url, e)))?;

        if let Some(rpc_error) = response.get("error").filter(|e| !e.is_null()) {
            let message = rpc_error
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown RPC error")
                .to_owned();
            if message == EXECUTION_REVERTED {
                return Err(Error::Revert(message));
            }
            return Err(Error::Dial(format!("RPC error for {}: {}", method, message)));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| Error::Other(format!("RPC response for {} has no result", method)))
    }
}

fn quantity(number: u64) -> String {
    format!("0x{:x}", number)
}

fn parse_quantity(value: &Value) -> Result<u64, Error> {
    let raw = value
        .as_str()
        .ok_or_else(|| Error::Other("expected a hex quantity".into()))?;
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    u64::from_str_radix(digits, 16)
        .map_err(|e| Error::Other(format!("bad hex quantity {:?}: {}", raw, e)))
}

fn decode_hex_bytes(raw: &str) -> Result<Vec<u8>, Error> {
    let digits = raw.strip_prefix("0x").unwrap_or(raw);
    hex::decode(digits).map_err(|e| Error::Other(format!("bad hex payload: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantities_round_trip() {
        assert_eq!(quantity(10_000_000), "0x989680");
        assert_eq!(parse_quantity(&json!("0x989680")).unwrap(), 10_000_000);
        assert_eq!(parse_quantity(&json!("0x0")).unwrap(), 0);
    }

    #[test]
    fn quantities_reject_non_strings() {
        assert!(parse_quantity(&json!(12)).is_err());
        assert!(parse_quantity(&json!("0xzz")).is_err());
    }

    #[test]
    fn payloads_decode_with_or_without_prefix() {
        assert_eq!(decode_hex_bytes("0x0102ff").unwrap(), vec![1, 2, 255]);
        assert_eq!(decode_hex_bytes("0102ff").unwrap(), vec![1, 2, 255]);
        assert!(decode_hex_bytes("0x01ga").is_err());
    }
}

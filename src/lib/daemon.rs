//! Daemon RPC gateway used to reconcile found blocks.
//!
//! Only two logical calls are consumed: the wallet view of the block's coinbase
//! transaction and the current network difficulty.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use crate::{config::DaemonConfig, error::DaemonError};

/// Wallet details of a transaction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransactionDetails {
    /// Amount paid to the pool wallet by the transaction
    pub amount: f64,
}

#[async_trait]
pub trait DaemonRpc: Send + Sync {
    /// `gettransaction`: fails while the daemon has no usable record of `tx_hash`.
    async fn get_transaction(&self, tx_hash: &str) -> Result<TransactionDetails, DaemonError>;

    /// `getdifficulty`
    async fn get_network_difficulty(&self) -> Result<f64, DaemonError>;
}

pub(crate) fn parse_transaction_details(response: &Value) -> Result<TransactionDetails, DaemonError> {
    let amount = response
        .get("details")
        .and_then(|details| details.get(0))
        .and_then(|detail| detail.get("amount"))
        .ok_or(DaemonError::MissingField("transaction details"))?
        .as_f64()
        .ok_or_else(|| DaemonError::Malformed("transaction amount is not a number".to_string()))?;

    // An unconfirmed coinbase reports no payout yet.
    if amount == 0.0 {
        return Err(DaemonError::MissingField("transaction amount"));
    }
    Ok(TransactionDetails { amount })
}

/// Plain number, or an object carrying `proof-of-work` on hybrid PoW/PoS coins.
pub(crate) fn parse_difficulty(response: &Value) -> Result<f64, DaemonError> {
    match response {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| DaemonError::Malformed(format!("difficulty {}", n))),
        Value::Object(fields) => fields
            .get("proof-of-work")
            .and_then(Value::as_f64)
            .ok_or(DaemonError::MissingField("proof-of-work difficulty")),
        Value::Null => Err(DaemonError::MissingField("difficulty")),
        other => Err(DaemonError::Malformed(format!("difficulty {}", other))),
    }
}

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// HTTP JSON-RPC client for a bitcoind-style coin daemon.
pub struct JsonRpcDaemon {
    http_client: reqwest::Client,
    url: String,
    user: String,
    password: String,
    request_id: AtomicU64,
}

impl JsonRpcDaemon {
    pub fn new(config: &DaemonConfig, timeout: Duration) -> Result<Self, DaemonError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DaemonError::Transport(e.to_string()))?;

        Ok(Self {
            http_client,
            url: config.url(),
            user: config.user.clone(),
            password: config.password.clone(),
            request_id: AtomicU64::new(1),
        })
    }

    async fn call(&self, method: &str, params: Vec<Value>) -> Result<Value, DaemonError> {
        let request = JsonRpcRequest {
            jsonrpc: "1.0",
            id: self.request_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        // Daemons answer RPC errors with a non-2xx status and a JSON body, so the
        // status is not checked before decoding.
        let response: JsonRpcResponse = self
            .http_client
            .post(&self.url)
            .basic_auth(&self.user, Some(&self.password))
            .json(&request)
            .send()
            .await
            .map_err(|e| DaemonError::Transport(e.to_string()))?
            .json()
            .await
            .map_err(|e| DaemonError::Malformed(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(DaemonError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        response.result.ok_or(DaemonError::MissingField("result"))
    }
}

#[async_trait]
impl DaemonRpc for JsonRpcDaemon {
    async fn get_transaction(&self, tx_hash: &str) -> Result<TransactionDetails, DaemonError> {
        let response = self
            .call("gettransaction", vec![Value::String(tx_hash.to_string())])
            .await?;
        parse_transaction_details(&response)
    }

    async fn get_network_difficulty(&self) -> Result<f64, DaemonError> {
        let response = self.call("getdifficulty", Vec::new()).await?;
        parse_difficulty(&response)
    }
}

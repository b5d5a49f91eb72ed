//! JSON-RPC over HTTP using reqwest
//!
//! Implements only the methods the tracker needs instead of pulling in the
//! full Solana client stack.

use super::types::{LedgerTransaction, RpcVersion, SignatureInfo};
use super::{LedgerRpc, RpcConnector};
use crate::config::Commitment;
use crate::error::RpcError;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

/// JSON-RPC response envelope
#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

pub struct HttpRpcClient {
    endpoint: String,
    http: reqwest::Client,
    commitment: Commitment,
    timeout: Duration,
}

impl HttpRpcClient {
    pub fn new(endpoint: &str, commitment: Commitment, timeout: Duration) -> Result<Self, RpcError> {
        let url = reqwest::Url::parse(endpoint)
            .map_err(|e| RpcError::InvalidEndpoint(format!("{}: {}", endpoint, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(RpcError::InvalidEndpoint(format!(
                "{}: scheme must be http or https",
                endpoint
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        Ok(Self {
            endpoint: endpoint.to_string(),
            http,
            commitment,
            timeout,
        })
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let request_body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        log::debug!("RPC call: {} {}", method, params);

        let response = self
            .http
            .post(&self.endpoint)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| self.map_transport(e))?;

        let result = decode_response(status, &body)?;
        serde_json::from_value(result)
            .map_err(|e| RpcError::Malformed(format!("{} result: {}", method, e)))
    }

    fn map_transport(&self, err: reqwest::Error) -> RpcError {
        if err.is_timeout() {
            RpcError::Timeout(self.timeout)
        } else if err.status().map(|s| s.as_u16()) == Some(429) {
            RpcError::RateLimited
        } else {
            RpcError::Transport(err.to_string())
        }
    }
}

/// Turn an HTTP status and body into the JSON-RPC `result` value
///
/// A missing or null `result` without an `error` decodes as `Value::Null`.
pub fn decode_response(status: u16, body: &str) -> Result<Value, RpcError> {
    if status == 429 {
        return Err(RpcError::RateLimited);
    }
    if !(200..300).contains(&status) {
        return Err(RpcError::Http(status));
    }

    let envelope: RpcEnvelope =
        serde_json::from_str(body).map_err(|e| RpcError::Malformed(e.to_string()))?;

    if let Some(error) = envelope.error {
        return Err(map_rpc_error(error.code, error.message));
    }

    Ok(envelope.result.unwrap_or(Value::Null))
}

fn map_rpc_error(code: i64, message: String) -> RpcError {
    let lower = message.to_lowercase();
    if code == 429
        || code == -32429
        || lower.contains("429")
        || lower.contains("too many requests")
        || lower.contains("rate limit")
    {
        RpcError::RateLimited
    } else {
        RpcError::Rpc { code, message }
    }
}

#[async_trait]
impl LedgerRpc for HttpRpcClient {
    async fn get_version(&self) -> Result<RpcVersion, RpcError> {
        self.call("getVersion", json!([])).await
    }

    async fn get_signatures_for_address(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, RpcError> {
        self.call(
            "getSignaturesForAddress",
            json!([address, { "limit": limit, "commitment": self.commitment.as_str() }]),
        )
        .await
    }

    async fn get_transaction(&self, signature: &str) -> Result<Option<LedgerTransaction>, RpcError> {
        // processed is not accepted by getTransaction
        let commitment = match self.commitment {
            Commitment::Processed => Commitment::Confirmed,
            other => other,
        };

        self.call(
            "getTransaction",
            json!([signature, {
                "encoding": "jsonParsed",
                "commitment": commitment.as_str(),
                "maxSupportedTransactionVersion": 0
            }]),
        )
        .await
    }
}

/// Opens `HttpRpcClient`s with shared request settings
#[derive(Debug, Clone)]
pub struct HttpConnector {
    pub commitment: Commitment,
    pub timeout: Duration,
}

impl RpcConnector for HttpConnector {
    fn open(&self, endpoint: &str) -> Result<Arc<dyn LedgerRpc>, RpcError> {
        let client = HttpRpcClient::new(endpoint, self.commitment, self.timeout)?;
        Ok(Arc::new(client))
    }
}

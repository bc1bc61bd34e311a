//! JSON-RPC over HTTP implementation of [`LedgerRpc`].

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

use super::{Commitment, LedgerRpc, RpcError};
use crate::validity::ValidityToken;

/// Default per-request deadline.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse<T> {
    result: Option<T>,
    error: Option<JsonRpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcErrorBody {
    code: i64,
    message: String,
}

/// `{ "context": {...}, "value": T }` wrapper used by most account/bank reads.
#[derive(Debug, Deserialize)]
struct WithContext<T> {
    value: T,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BlockhashValue {
    blockhash: String,
    last_valid_block_height: u64,
}

#[derive(Debug, Deserialize)]
struct AccountOwnerValue {
    owner: String,
}

/// Plain JSON-RPC client bound to a single endpoint.
#[derive(Clone)]
pub struct HttpRpcClient {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
    next_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for HttpRpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRpcClient")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl HttpRpcClient {
    /// Create a client with the default request timeout.
    pub fn new(url: impl Into<String>) -> Result<Self, RpcError> {
        Self::with_timeout(url, DEFAULT_TIMEOUT)
    }

    /// Create a client with a custom request timeout.
    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self, RpcError> {
        let url = url.into();
        reqwest::Url::parse(&url).map_err(|_| RpcError::InvalidUrl(url.clone()))?;

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RpcError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            url,
            timeout,
            next_id: Arc::new(AtomicU64::new(1)),
        })
    }

    /// Endpoint URL this client talks to.
    pub fn url(&self) -> &str {
        &self.url
    }

    fn map_transport(&self, err: reqwest::Error) -> RpcError {
        if err.is_timeout() {
            RpcError::Timeout(self.timeout)
        } else {
            RpcError::from(err)
        }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, RpcError> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0",
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| self.map_transport(e))?
            .error_for_status()
            .map_err(|e| self.map_transport(e))?;

        let body: JsonRpcResponse<T> = response.json().await.map_err(|e| self.map_transport(e))?;
        unwrap_response(method, body)
    }
}

fn unwrap_response<T>(method: &str, body: JsonRpcResponse<T>) -> Result<T, RpcError> {
    if let Some(err) = body.error {
        return Err(RpcError::Rpc {
            code: err.code,
            message: err.message,
        });
    }
    body.result
        .ok_or_else(|| RpcError::MalformedResponse(format!("{method}: missing result")))
}

#[async_trait]
impl LedgerRpc for HttpRpcClient {
    async fn probe(&self) -> Result<(), RpcError> {
        let slot: u64 = self
            .call("getSlot", json!([{ "commitment": Commitment::Processed.as_str() }]))
            .await?;
        debug!(url = %self.url, slot, "Probe ok");
        Ok(())
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn block_height(&self, commitment: Commitment) -> Result<u64, RpcError> {
        self.call("getBlockHeight", json!([{ "commitment": commitment.as_str() }]))
            .await
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn latest_blockhash(&self, commitment: Commitment) -> Result<ValidityToken, RpcError> {
        let response: WithContext<BlockhashValue> = self
            .call("getLatestBlockhash", json!([{ "commitment": commitment.as_str() }]))
            .await?;

        Ok(ValidityToken {
            token: response.value.blockhash,
            expiry_height: response.value.last_valid_block_height,
        })
    }

    #[instrument(skip(self), fields(url = %self.url, account = %account))]
    async fn account_owner(&self, account: &Pubkey) -> Result<Option<Pubkey>, RpcError> {
        let response: WithContext<Option<AccountOwnerValue>> = self
            .call(
                "getAccountInfo",
                json!([
                    account.to_string(),
                    {
                        "encoding": "base64",
                        "commitment": Commitment::Confirmed.as_str(),
                        "dataSlice": { "offset": 0, "length": 0 }
                    }
                ]),
            )
            .await?;

        response
            .value
            .map(|v| {
                Pubkey::from_str(&v.owner)
                    .map_err(|e| RpcError::MalformedResponse(format!("owner '{}': {e}", v.owner)))
            })
            .transpose()
    }
}

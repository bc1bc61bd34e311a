//! Ledger RPC abstraction.
//!
//! The freshness layer only needs four read calls from a node. They are
//! expressed as the [`LedgerRpc`] trait so that endpoint selection and token
//! caching can run against any transport, and so tests can substitute
//! in-memory fakes.
//!
//! # Example
//!
//! ```rust,ignore
//! use keeper_chain::rpc::{Commitment, HttpRpcClient, LedgerRpc};
//!
//! let client = HttpRpcClient::new("https://api.mainnet-beta.solana.com")?;
//! let height = client.block_height(Commitment::Processed).await?;
//! ```

mod http;
pub mod retry;

pub use http::HttpRpcClient;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

use crate::validity::ValidityToken;

/// Errors surfaced by RPC calls.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Connection, TLS or HTTP-level failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The call did not complete within its deadline.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The node answered with a JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },

    /// The node answered, but not with the shape we expected.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// The endpoint URL could not be parsed.
    #[error("invalid endpoint url '{0}'")]
    InvalidUrl(String),
}

impl RpcError {
    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Transport(_) | RpcError::Timeout(_))
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            RpcError::MalformedResponse(err.to_string())
        } else {
            RpcError::Transport(err.to_string())
        }
    }
}

/// Read level requested from the node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    /// Fastest, uncommitted view of the node's tip.
    #[default]
    Processed,
    /// Voted on by a supermajority.
    Confirmed,
    /// Rooted.
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only ledger calls used by the freshness layer.
#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Cheapest possible round trip, used to measure latency.
    async fn probe(&self) -> Result<(), RpcError>;

    /// Current block height at the given read level.
    async fn block_height(&self, commitment: Commitment) -> Result<u64, RpcError>;

    /// Fetch a fresh blockhash and the last block height at which it is valid.
    async fn latest_blockhash(&self, commitment: Commitment) -> Result<ValidityToken, RpcError>;

    /// Owner program of an account, or `None` if the account does not exist.
    async fn account_owner(&self, account: &Pubkey) -> Result<Option<Pubkey>, RpcError>;
}

//! Keeper chain interaction layer.
//!
//! This crate provides:
//! - A narrow ledger RPC trait with a JSON-RPC/HTTP implementation
//! - Latency probing and primary/secondary endpoint selection
//! - A single-slot cache for the recent-blockhash validity token
//! - The pre-submission transaction size gate
//! - A mint → token program lookup cache
//! - Retry layering for RPC calls

pub mod endpoint;
pub mod rpc;
pub mod token_program;
pub mod tx_size;
pub mod validity;

pub use endpoint::{Endpoint, EndpointSelector, RpcEndpoint, DEFAULT_PROBE_TIMEOUT};
pub use rpc::retry::{with_retry, RetryPolicy};
pub use rpc::{Commitment, HttpRpcClient, LedgerRpc, RpcError};
pub use token_program::{TokenProgram, TokenProgramCache, SPL_TOKEN_PROGRAM_ID, TOKEN_2022_PROGRAM_ID};
pub use tx_size::{is_tx_too_large, raw_tx_bytes, TxSizeCheck, WireSize, MAX_TX_BYTES};
pub use validity::{ValidityToken, ValidityTokenCache, DEFAULT_SAFETY_BLOCKS};

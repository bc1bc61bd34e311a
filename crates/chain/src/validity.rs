//! Validity-token (recent blockhash) cache.
//!
//! A blockhash stays acceptable until the chain passes its
//! `lastValidBlockHeight`. The cache keeps one token and hands it out while
//! the current block height is below that bound minus a safety margin;
//! past that point the token is replaced wholesale.
//!
//! Block height is the only ledger-progress metric used here. The expiry
//! bound returned by `getLatestBlockhash` is expressed in block height, and
//! comparing it with a slot number would overstate the remaining window
//! whenever slots are skipped.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use solana_sdk::hash::Hash;
use std::str::FromStr;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::endpoint::EndpointSelector;
use crate::rpc::{Commitment, LedgerRpc, RpcError};

/// Default safety margin in blocks.
pub const DEFAULT_SAFETY_BLOCKS: u64 = 30;

/// A recent blockhash and the last block height at which it is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidityToken {
    /// Base58 blockhash, treated as opaque.
    pub token: String,
    /// Last valid block height reported by the node.
    pub expiry_height: u64,
}

impl ValidityToken {
    /// Whether the token can still be used at `height` given a safety margin.
    #[inline]
    pub fn is_usable_at(&self, height: u64, safety_blocks: u64) -> bool {
        height < self.expiry_height.saturating_sub(safety_blocks)
    }

    /// Blocks left before the safety bound, zero once unusable.
    pub fn remaining_blocks(&self, height: u64, safety_blocks: u64) -> u64 {
        self.expiry_height
            .saturating_sub(safety_blocks)
            .saturating_sub(height)
    }

    /// Parse the token as a blockhash for transaction assembly.
    pub fn hash(&self) -> Option<Hash> {
        Hash::from_str(&self.token).ok()
    }
}

/// Single-slot validity-token cache.
pub struct ValidityTokenCache {
    /// Current token; replaced, never patched.
    slot: RwLock<Option<ValidityToken>>,
    /// Blocks subtracted from the expiry before a token is considered unusable.
    safety_blocks: u64,
    /// Read level for token fetches. Height reads always use `Processed`.
    token_commitment: Commitment,
    /// Serializes refreshes so concurrent misses issue one fetch.
    refresh_guard: Mutex<()>,
}

impl ValidityTokenCache {
    /// Create a cache with the given safety margin.
    ///
    /// A zero margin is honored but means a token may be handed out on the
    /// very last block it is valid for.
    pub fn new(safety_blocks: u64) -> Self {
        Self::with_commitment(safety_blocks, Commitment::Confirmed)
    }

    /// Create a cache that fetches tokens at a specific read level.
    pub fn with_commitment(safety_blocks: u64, token_commitment: Commitment) -> Self {
        if safety_blocks == 0 {
            warn!("Validity token cache created with zero safety margin");
        }
        Self {
            slot: RwLock::new(None),
            safety_blocks,
            token_commitment,
            refresh_guard: Mutex::new(()),
        }
    }

    /// Safety margin in blocks.
    pub fn safety_blocks(&self) -> u64 {
        self.safety_blocks
    }

    /// Currently cached token, regardless of usability.
    pub fn cached(&self) -> Option<ValidityToken> {
        self.slot.read().clone()
    }

    /// Drop the cached token so the next call refetches.
    pub fn invalidate(&self) {
        *self.slot.write() = None;
    }

    fn reusable_at(&self, height: u64) -> Option<ValidityToken> {
        self.slot
            .read()
            .as_ref()
            .filter(|t| t.is_usable_at(height, self.safety_blocks))
            .cloned()
    }

    /// Return a token that is safe to use right now.
    ///
    /// Always reads the current block height first. Reuses the cached token
    /// while `height < expiry - safety_blocks`, otherwise fetches a new one
    /// from the same endpoint and replaces the cache. RPC errors propagate.
    pub async fn get_fresh(&self, rpc: &dyn LedgerRpc) -> Result<ValidityToken, RpcError> {
        let height = rpc.block_height(Commitment::Processed).await?;

        if let Some(token) = self.reusable_at(height) {
            debug!(
                height,
                expiry_height = token.expiry_height,
                remaining = token.remaining_blocks(height, self.safety_blocks),
                "Validity token cache hit"
            );
            return Ok(token);
        }

        let _guard = self.refresh_guard.lock().await;

        // A concurrent caller may have refreshed while we waited.
        if let Some(token) = self.reusable_at(height) {
            debug!(height, "Validity token refreshed by concurrent caller");
            return Ok(token);
        }

        let fresh = rpc.latest_blockhash(self.token_commitment).await?;
        if !fresh.is_usable_at(height, self.safety_blocks) {
            warn!(
                height,
                expiry_height = fresh.expiry_height,
                safety_blocks = self.safety_blocks,
                "Fresh validity token is already inside the safety margin"
            );
        }

        *self.slot.write() = Some(fresh.clone());

        info!(
            height,
            expiry_height = fresh.expiry_height,
            token = %fresh.token,
            "Validity token refreshed"
        );

        Ok(fresh)
    }

    /// [`get_fresh`](Self::get_fresh) against the currently selected endpoint.
    pub async fn get_fresh_via(
        &self,
        selector: &EndpointSelector,
    ) -> Result<ValidityToken, RpcError> {
        let rpc = selector.connection();
        self.get_fresh(rpc.as_ref()).await
    }
}

impl Default for ValidityTokenCache {
    fn default() -> Self {
        Self::new(DEFAULT_SAFETY_BLOCKS)
    }
}

//! Submission planning.
//!
//! Before a forecast is turned into a transaction the planner checks it is
//! still worth acting on, picks the endpoint to send through, and hands out
//! a validity token that will outlive the submission. After the transaction
//! is built and signed, [`SubmissionPlanner::gate`] rejects anything that
//! would not fit in a packet.

use keeper_chain::{
    is_tx_too_large, EndpointSelector, RpcError, TxSizeCheck, ValidityToken, ValidityTokenCache,
    WireSize, MAX_TX_BYTES,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use crate::forecast::{evaluate_forecast, now_ms, ExpiryReason, Forecast, StalenessPolicy};

#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("transaction is {raw} bytes, limit is {max}")]
    TxTooLarge { raw: usize, max: usize },

    #[error("validity token unavailable: {0}")]
    Rpc(#[from] RpcError),
}

/// Everything needed to build and send one transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionTicket {
    pub key: String,
    pub endpoint_url: String,
    pub token: ValidityToken,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionDecision {
    Ready(SubmissionTicket),
    Skip(ExpiryReason),
}

impl SubmissionDecision {
    pub fn is_ready(&self) -> bool {
        matches!(self, SubmissionDecision::Ready(_))
    }
}

pub struct SubmissionPlanner {
    selector: Arc<EndpointSelector>,
    tokens: Arc<ValidityTokenCache>,
    policy: StalenessPolicy,
}

impl SubmissionPlanner {
    pub fn new(
        selector: Arc<EndpointSelector>,
        tokens: Arc<ValidityTokenCache>,
        policy: StalenessPolicy,
    ) -> Self {
        Self {
            selector,
            tokens,
            policy,
        }
    }

    pub fn policy(&self) -> &StalenessPolicy {
        &self.policy
    }

    /// Decide whether `forecast` should be acted on at `now_ms`.
    ///
    /// Expired forecasts are skipped without any RPC traffic. Token fetch
    /// failures propagate.
    #[instrument(skip(self, forecast), fields(key = %forecast.key))]
    pub async fn plan(
        &self,
        forecast: &Forecast,
        now_ms: i64,
    ) -> Result<SubmissionDecision, SubmissionError> {
        let evaluated = evaluate_forecast(forecast, &self.policy, now_ms);
        if let Some(reason) = evaluated.reason {
            debug!(reason = %reason, "Forecast skipped");
            return Ok(SubmissionDecision::Skip(reason));
        }

        let (endpoint, rpc) = self.selector.selected();
        let token = self.tokens.get_fresh(rpc.as_ref()).await?;

        debug!(
            endpoint = %endpoint.url,
            latency_ms = endpoint.latency_ms,
            expiry_height = token.expiry_height,
            "Forecast ready for submission"
        );

        Ok(SubmissionDecision::Ready(SubmissionTicket {
            key: forecast.key.clone(),
            endpoint_url: endpoint.url,
            token,
        }))
    }

    /// [`plan`](Self::plan) against the wall clock read at call time.
    pub async fn plan_now(&self, forecast: &Forecast) -> Result<SubmissionDecision, SubmissionError> {
        self.plan(forecast, now_ms()).await
    }

    /// Size gate for a signed transaction.
    pub fn gate<T: WireSize + ?Sized>(&self, tx: &T) -> Result<TxSizeCheck, SubmissionError> {
        let check = is_tx_too_large(tx);
        if check.too_large {
            warn!(raw = check.raw, max = MAX_TX_BYTES, "Transaction exceeds packet size");
            return Err(SubmissionError::TxTooLarge {
                raw: check.raw,
                max: MAX_TX_BYTES,
            });
        }
        Ok(check)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use keeper_chain::{Commitment, LedgerRpc, RpcEndpoint};
    use solana_sdk::hash::Hash;
    use solana_sdk::instruction::Instruction;
    use solana_sdk::pubkey::Pubkey;
    use solana_sdk::signature::{Keypair, Signer};
    use solana_sdk::transaction::Transaction;
    use std::sync::atomic::{AtomicU64, Ordering};

    const NOW: i64 = 1_700_000_000_000;

    struct Node {
        fail: bool,
        fetches: AtomicU64,
    }

    impl Node {
        fn new(fail: bool) -> Arc<Self> {
            Arc::new(Self {
                fail,
                fetches: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl LedgerRpc for Node {
        async fn probe(&self) -> Result<(), RpcError> {
            Ok(())
        }

        async fn block_height(&self, _: Commitment) -> Result<u64, RpcError> {
            if self.fail {
                return Err(RpcError::Transport("down".into()));
            }
            Ok(1_000)
        }

        async fn latest_blockhash(&self, _: Commitment) -> Result<ValidityToken, RpcError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(ValidityToken {
                token: Hash::new_unique().to_string(),
                expiry_height: 1_150,
            })
        }

        async fn account_owner(&self, _: &Pubkey) -> Result<Option<Pubkey>, RpcError> {
            Ok(None)
        }
    }

    fn planner(node: Arc<Node>) -> SubmissionPlanner {
        let selector = EndpointSelector::new(RpcEndpoint::new("http://node", node), None);
        SubmissionPlanner::new(
            Arc::new(selector),
            Arc::new(ValidityTokenCache::new(30)),
            StalenessPolicy::default(),
        )
    }

    fn tx(data_len: usize) -> Transaction {
        let payer = Keypair::new();
        let ix = Instruction::new_with_bytes(Pubkey::new_unique(), &vec![1u8; data_len], vec![]);
        Transaction::new_signed_with_payer(&[ix], Some(&payer.pubkey()), &[&payer], Hash::new_unique())
    }

    #[tokio::test]
    async fn test_active_forecast_gets_ticket() {
        let node = Node::new(false);
        let planner = planner(node.clone());
        let forecast = Forecast::new("liq:1", 25.0, NOW).with_ttl("10m");

        let ticket = match planner.plan(&forecast, NOW).await.unwrap() {
            SubmissionDecision::Ready(ticket) => ticket,
            other => panic!("expected a ticket, got {other:?}"),
        };
        assert_eq!(ticket.key, "liq:1");
        assert_eq!(ticket.endpoint_url, "http://node");
        assert_eq!(ticket.token.expiry_height, 1_150);

        // Second plan reuses the cached token.
        assert!(planner.plan(&forecast, NOW).await.unwrap().is_ready());
        assert_eq!(node.fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_expired_forecast_skips_without_rpc() {
        let node = Node::new(true);
        let planner = planner(node.clone());
        let forecast = Forecast::new("liq:2", 25.0, NOW).with_ttl("1m");

        let decision = planner.plan(&forecast, NOW).await.unwrap();
        assert_eq!(decision, SubmissionDecision::Skip(ExpiryReason::TtlExpired));
        assert_eq!(node.fetches.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_plan_now_reads_current_clock() {
        let node = Node::new(false);
        let planner = planner(node.clone());
        let max_age = planner.policy().max_age_ms;
        let updated_at = now_ms() - max_age - 1_000;
        let forecast = Forecast::new("liq:old", 25.0, updated_at).with_ttl("10m");

        // Fresh when judged at an earlier instant, stale at the current one.
        assert!(planner.plan(&forecast, updated_at + 1_000).await.unwrap().is_ready());
        assert_eq!(
            planner.plan_now(&forecast).await.unwrap(),
            SubmissionDecision::Skip(ExpiryReason::StaleAge)
        );
    }

    #[tokio::test]
    async fn test_token_failure_propagates() {
        let planner = planner(Node::new(true));
        let forecast = Forecast::new("liq:3", 25.0, NOW).with_ttl("10m");

        let err = planner.plan(&forecast, NOW).await.unwrap_err();
        assert!(matches!(err, SubmissionError::Rpc(RpcError::Transport(_))));
    }

    #[test]
    fn test_gate() {
        let planner = planner(Node::new(false));

        let check = planner.gate(&tx(64)).unwrap();
        assert!(!check.too_large);

        let err = planner.gate(&tx(2_000)).unwrap_err();
        match err {
            SubmissionError::TxTooLarge { raw, max } => {
                assert!(raw > max);
                assert_eq!(max, MAX_TX_BYTES);
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}

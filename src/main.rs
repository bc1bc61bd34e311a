//! Keeper
//!
//! Freshness layer for a Solana trading/liquidation agent.
//! Each pass:
//! - loads the forecast queue and drops stale or decayed forecasts
//! - keeps a usable recent blockhash through the fastest RPC endpoint
//! - plans submissions for the forecasts that are still worth acting on

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use keeper_chain::{
    with_retry, EndpointSelector, HttpRpcClient, RetryPolicy, RpcEndpoint, ValidityTokenCache,
};
use keeper_core::{
    active_forecasts, evaluate_forecasts, forecast::now_ms, ForecastQueue, KeeperConfig,
    RpcSettings, StalenessReport, SubmissionDecision, SubmissionPlanner,
};

/// Environment variable names.
mod env {
    pub const ONESHOT: &str = "KEEPER_ONESHOT";
    pub const LOG_FORMAT: &str = "LOG_FORMAT";
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    init_tracing();

    // KEEPER_CONFIG file, else KEEPER_PROFILE, then env overrides
    let config = KeeperConfig::load().context("Failed to load keeper configuration")?;
    config.log_config();

    info!("Starting keeper");

    let selector = Arc::new(build_selector(&config.rpc)?);
    selector.refresh_latencies().await;
    for endpoint in selector.snapshot() {
        info!(url = %endpoint.url, latency_ms = endpoint.latency_ms, "Initial endpoint latency");
    }
    let prober = selector.clone().spawn_prober(config.rpc.probe_interval());

    let tokens = Arc::new(ValidityTokenCache::with_commitment(
        config.validity.safety_blocks,
        config.rpc.token_commitment,
    ));
    let planner = SubmissionPlanner::new(selector.clone(), tokens.clone(), config.staleness.clone());
    let queue = ForecastQueue::new(config.queue.path.clone());
    let oneshot = std::env::var(env::ONESHOT).is_ok();
    // Never poll faster than the policy allows re-evaluation.
    let pass_interval = config.pass_interval();

    loop {
        run_pass(&queue, &planner, &selector, &tokens).await;

        if oneshot {
            info!("One-shot mode, exiting after first pass");
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep(pass_interval) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
        }
    }

    prober.abort();
    info!("Keeper stopped");
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,keeper_core=debug,keeper_chain=debug"));
    let registry = tracing_subscriber::registry().with(filter);

    if std::env::var(env::LOG_FORMAT).is_ok_and(|f| f.eq_ignore_ascii_case("json")) {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}

fn build_selector(rpc: &RpcSettings) -> Result<EndpointSelector> {
    let endpoint = |url: &str, ws_url: Option<&String>| -> Result<RpcEndpoint> {
        let client = HttpRpcClient::with_timeout(url, rpc.request_timeout())
            .with_context(|| format!("Invalid RPC endpoint {url}"))?;
        let endpoint = RpcEndpoint::new(url, Arc::new(client));
        Ok(match ws_url {
            Some(ws) => endpoint.with_ws_url(ws.as_str()),
            None => endpoint,
        })
    };

    let primary = endpoint(&rpc.primary_url, rpc.primary_ws_url.as_ref())?;
    let secondary = rpc
        .secondary_url
        .as_deref()
        .map(|url| endpoint(url, rpc.secondary_ws_url.as_ref()))
        .transpose()?;

    Ok(EndpointSelector::new(primary, secondary).with_probe_timeout(rpc.probe_timeout()))
}

/// One evaluation and planning pass. Failures are logged, never fatal.
async fn run_pass(
    queue: &ForecastQueue,
    planner: &SubmissionPlanner,
    selector: &EndpointSelector,
    tokens: &ValidityTokenCache,
) {
    let forecasts = match queue.load() {
        Ok(forecasts) => forecasts,
        Err(e) => {
            error!(error = %e, "Failed to load forecast queue");
            return;
        }
    };

    let now = now_ms();
    let evaluated = evaluate_forecasts(&forecasts, planner.policy(), now);
    let report = StalenessReport::new(&evaluated, now);
    report.log();
    if report.total() > 0 {
        info!("\n{report}");
    }

    let active = active_forecasts(&evaluated);
    if active.is_empty() {
        return;
    }

    // Warm the token once with retry; planning below then hits the cache.
    match with_retry(&RetryPolicy::default(), move || tokens.get_fresh_via(selector)).await {
        Ok(token) => info!(
            endpoint = %selector.selected_url(),
            expiry_height = token.expiry_height,
            "Validity token ready"
        ),
        Err(e) => {
            warn!(error = %e, "Validity token unavailable, skipping submissions this pass");
            return;
        }
    }

    // The warm-up may have spent seconds in backoff; judge against the clock now.
    for entry in active {
        match planner.plan_now(&entry.forecast).await {
            Ok(SubmissionDecision::Ready(ticket)) => info!(
                key = %ticket.key,
                endpoint = %ticket.endpoint_url,
                token = %ticket.token.token,
                expiry_height = ticket.token.expiry_height,
                "Submission planned"
            ),
            Ok(SubmissionDecision::Skip(reason)) => {
                info!(key = %entry.key(), reason = %reason, "Submission skipped")
            }
            Err(e) => warn!(key = %entry.key(), error = %e, "Submission planning failed"),
        }
    }
}

//! RPC endpoint probing and selection.
//!
//! Probing and selection are decoupled: [`EndpointSelector::refresh_latencies`]
//! does the network work and is scheduled on its own cadence, while
//! [`EndpointSelector::connection`] only reads the cached latencies and is
//! cheap enough to call on every submission attempt.

use futures::future::join_all;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::rpc::LedgerRpc;

/// Default deadline for a single probe round trip.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// An endpoint to register with the selector.
#[derive(Clone)]
pub struct RpcEndpoint {
    /// HTTP JSON-RPC URL
    pub url: String,
    /// Optional WebSocket subscription URL
    pub ws_url: Option<String>,
    /// Client used for probes and for callers of [`EndpointSelector::connection`]
    pub client: Arc<dyn LedgerRpc>,
}

impl RpcEndpoint {
    pub fn new(url: impl Into<String>, client: Arc<dyn LedgerRpc>) -> Self {
        Self {
            url: url.into(),
            ws_url: None,
            client,
        }
    }

    pub fn with_ws_url(mut self, ws_url: impl Into<String>) -> Self {
        self.ws_url = Some(ws_url.into());
        self
    }
}

impl std::fmt::Debug for RpcEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcEndpoint")
            .field("url", &self.url)
            .field("ws_url", &self.ws_url)
            .finish()
    }
}

/// Point-in-time view of an endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Endpoint {
    pub url: String,
    pub ws_url: Option<String>,
    /// Last measured latency in milliseconds; `INFINITY` when unreachable
    /// or not yet measured.
    pub latency_ms: f64,
}

impl Endpoint {
    pub fn is_reachable(&self) -> bool {
        self.latency_ms.is_finite()
    }
}

/// Endpoint plus its latency, stored as f64 bits for lock-free reads.
struct EndpointSlot {
    endpoint: RpcEndpoint,
    latency_bits: AtomicU64,
}

impl EndpointSlot {
    fn new(endpoint: RpcEndpoint) -> Self {
        Self {
            endpoint,
            latency_bits: AtomicU64::new(f64::INFINITY.to_bits()),
        }
    }

    fn latency_ms(&self) -> f64 {
        f64::from_bits(self.latency_bits.load(Ordering::Relaxed))
    }

    fn record_latency(&self, latency_ms: f64) {
        self.latency_bits
            .store(latency_ms.to_bits(), Ordering::Relaxed);
    }

    fn snapshot(&self) -> Endpoint {
        Endpoint {
            url: self.endpoint.url.clone(),
            ws_url: self.endpoint.ws_url.clone(),
            latency_ms: self.latency_ms(),
        }
    }

    /// One probe round trip. Failures come back as `INFINITY`.
    async fn measure(&self, timeout: Duration) -> f64 {
        let started = Instant::now();
        match tokio::time::timeout(timeout, self.endpoint.client.probe()).await {
            Ok(Ok(())) => started.elapsed().as_secs_f64() * 1000.0,
            Ok(Err(e)) => {
                warn!(url = %self.endpoint.url, error = %e, "Endpoint probe failed");
                f64::INFINITY
            }
            Err(_) => {
                warn!(
                    url = %self.endpoint.url,
                    timeout_ms = timeout.as_millis() as u64,
                    "Endpoint probe timed out"
                );
                f64::INFINITY
            }
        }
    }
}

/// Primary/secondary endpoint selector driven by measured latency.
pub struct EndpointSelector {
    primary: EndpointSlot,
    secondary: Option<EndpointSlot>,
    probe_timeout: Duration,
    /// Single-flight guard for refreshes.
    refresh_guard: Mutex<()>,
}

impl EndpointSelector {
    /// Create a selector. Latencies start unmeasured (`INFINITY`), so the
    /// primary is selected until the first refresh.
    pub fn new(primary: RpcEndpoint, secondary: Option<RpcEndpoint>) -> Self {
        info!(
            primary = %primary.url,
            secondary = secondary.as_ref().map(|s| s.url.as_str()).unwrap_or("-"),
            "Endpoint selector configured"
        );
        Self {
            primary: EndpointSlot::new(primary),
            secondary: secondary.map(EndpointSlot::new),
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            refresh_guard: Mutex::new(()),
        }
    }

    /// Set the per-probe deadline.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    fn slots(&self) -> impl Iterator<Item = &EndpointSlot> {
        std::iter::once(&self.primary).chain(self.secondary.as_ref())
    }

    fn selected_slot(&self) -> &EndpointSlot {
        match &self.secondary {
            Some(secondary) if secondary.latency_ms() < self.primary.latency_ms() => secondary,
            _ => &self.primary,
        }
    }

    /// Probe every endpoint once, concurrently, and record latencies.
    ///
    /// Never fails. If a refresh is already running, returns immediately.
    pub async fn refresh_latencies(&self) {
        let Ok(_guard) = self.refresh_guard.try_lock() else {
            debug!("Latency refresh already in flight, skipping");
            return;
        };

        let timeout = self.probe_timeout;
        let measured = join_all(self.slots().map(|slot| async move {
            let latency = slot.measure(timeout).await;
            slot.record_latency(latency);
            (slot.endpoint.url.as_str(), latency)
        }))
        .await;

        for (url, latency_ms) in &measured {
            debug!(url, latency_ms, "Endpoint latency recorded");
        }
        debug!(selected = %self.selected_slot().endpoint.url, "Endpoint selection updated");
    }

    /// Client for the currently preferred endpoint. No I/O.
    pub fn connection(&self) -> Arc<dyn LedgerRpc> {
        self.selected_slot().endpoint.client.clone()
    }

    /// Snapshot of the currently preferred endpoint. No I/O.
    pub fn select(&self) -> Endpoint {
        self.selected_slot().snapshot()
    }

    /// Selected endpoint together with its client, read in one decision.
    pub fn selected(&self) -> (Endpoint, Arc<dyn LedgerRpc>) {
        let slot = self.selected_slot();
        (slot.snapshot(), slot.endpoint.client.clone())
    }

    /// URL of the currently preferred endpoint.
    pub fn selected_url(&self) -> &str {
        &self.selected_slot().endpoint.url
    }

    /// All configured endpoints, primary first.
    pub fn snapshot(&self) -> Vec<Endpoint> {
        self.slots().map(EndpointSlot::snapshot).collect()
    }

    /// Whether a secondary endpoint is configured.
    pub fn has_secondary(&self) -> bool {
        self.secondary.is_some()
    }

    /// Run [`refresh_latencies`](Self::refresh_latencies) on a fixed cadence
    /// in a background task. The first probe runs immediately.
    pub fn spawn_prober(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                self.refresh_latencies().await;
            }
        })
    }
}

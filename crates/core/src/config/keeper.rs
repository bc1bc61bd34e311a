//! Keeper runtime configuration with profile support.
//!
//! Profiles (default, testing, production) give complete starting points;
//! a TOML file may override any field, and a few environment variables
//! override the file.

use anyhow::{bail, Result};
use keeper_chain::{Commitment, DEFAULT_SAFETY_BLOCKS};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::forecast::StalenessPolicy;

/// Main configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeeperConfig {
    /// Profile name (for logging/identification)
    #[serde(default = "default_profile_name")]
    pub profile: String,

    pub rpc: RpcSettings,

    #[serde(default)]
    pub validity: ValiditySettings,

    #[serde(default)]
    pub staleness: StalenessPolicy,

    #[serde(default)]
    pub queue: QueueSettings,
}

fn default_profile_name() -> String {
    "default".to_string()
}

/// RPC endpoints and timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcSettings {
    pub primary_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub primary_ws_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secondary_ws_url: Option<String>,

    /// Per-request timeout (milliseconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,

    /// Latency probe timeout (milliseconds)
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_ms: u64,

    /// Background probe period (milliseconds)
    #[serde(default = "default_probe_interval")]
    pub probe_interval_ms: u64,

    /// Read level for validity-token fetches
    #[serde(default = "default_token_commitment")]
    pub token_commitment: Commitment,
}

fn default_primary_url() -> String {
    "https://api.mainnet-beta.solana.com".to_string()
}
fn default_request_timeout() -> u64 {
    5_000
}
fn default_probe_timeout() -> u64 {
    2_000
}
fn default_probe_interval() -> u64 {
    10_000
}
fn default_token_commitment() -> Commitment {
    Commitment::Confirmed
}

impl Default for RpcSettings {
    fn default() -> Self {
        Self {
            primary_url: default_primary_url(),
            primary_ws_url: None,
            secondary_url: None,
            secondary_ws_url: None,
            request_timeout_ms: default_request_timeout(),
            probe_timeout_ms: default_probe_timeout(),
            probe_interval_ms: default_probe_interval(),
            token_commitment: default_token_commitment(),
        }
    }
}

impl RpcSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }
    pub fn probe_interval(&self) -> Duration {
        Duration::from_millis(self.probe_interval_ms)
    }
}

/// Validity-token cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValiditySettings {
    /// Blocks subtracted from a token's expiry height before it is replaced
    #[serde(default = "default_safety_blocks")]
    pub safety_blocks: u64,
}

fn default_safety_blocks() -> u64 {
    DEFAULT_SAFETY_BLOCKS
}

impl Default for ValiditySettings {
    fn default() -> Self {
        Self {
            safety_blocks: default_safety_blocks(),
        }
    }
}

/// Forecast queue location and polling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSettings {
    #[serde(default = "default_queue_path")]
    pub path: PathBuf,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,
}

fn default_queue_path() -> PathBuf {
    PathBuf::from("./data/forecasts.json")
}
fn default_poll_interval() -> u64 {
    30_000
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            path: default_queue_path(),
            poll_interval_ms: default_poll_interval(),
        }
    }
}

impl QueueSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for KeeperConfig {
    fn default() -> Self {
        Self {
            profile: default_profile_name(),
            rpc: RpcSettings::default(),
            validity: ValiditySettings::default(),
            staleness: StalenessPolicy::default(),
            queue: QueueSettings::default(),
        }
    }
}

impl KeeperConfig {
    /// Parse a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Local validator, short timeouts and lenient staleness.
    pub fn testing() -> Self {
        Self {
            profile: "testing".to_string(),
            rpc: RpcSettings {
                primary_url: "http://127.0.0.1:8899".to_string(),
                primary_ws_url: Some("ws://127.0.0.1:8900".to_string()),
                request_timeout_ms: 2_000,
                probe_timeout_ms: 500,
                probe_interval_ms: 2_000,
                token_commitment: Commitment::Processed,
                ..Default::default()
            },
            validity: ValiditySettings { safety_blocks: 10 },
            staleness: StalenessPolicy {
                max_age_ms: 900_000,
                min_refresh_interval_ms: 5_000,
                ttl_expired_margin_min: 0.5,
                ev_drop_pct: 0.5,
                min_ev: 0.0,
            },
            queue: QueueSettings {
                path: PathBuf::from("./data/forecasts.json"),
                poll_interval_ms: 5_000,
            },
        }
    }

    /// Conservative thresholds for live trading.
    pub fn production() -> Self {
        Self {
            profile: "production".to_string(),
            rpc: RpcSettings {
                request_timeout_ms: 3_000,
                probe_timeout_ms: 1_000,
                probe_interval_ms: 5_000,
                ..Default::default()
            },
            validity: ValiditySettings { safety_blocks: 40 },
            staleness: StalenessPolicy {
                max_age_ms: 120_000,
                min_refresh_interval_ms: 15_000,
                ttl_expired_margin_min: 3.0,
                ev_drop_pct: 0.10,
                min_ev: 0.01,
            },
            queue: QueueSettings {
                poll_interval_ms: 10_000,
                ..Default::default()
            },
        }
    }

    /// Profile by name. Unknown names fall back to the default profile.
    pub fn profile(name: &str) -> Self {
        match name.to_lowercase().as_str() {
            "testing" | "test" => Self::testing(),
            "production" | "prod" => Self::production(),
            _ => Self::default(),
        }
    }

    /// Delay between evaluation passes: the queue poll interval, stretched
    /// to the policy's minimum refresh interval when that is longer.
    pub fn pass_interval(&self) -> Duration {
        self.queue.poll_interval().max(self.staleness.min_refresh_interval())
    }

    /// Reject settings the keeper cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.rpc.primary_url.trim().is_empty() {
            bail!("rpc.primary_url must not be empty");
        }
        if self.rpc.secondary_url.as_deref().is_some_and(|u| u.trim().is_empty()) {
            bail!("rpc.secondary_url must not be empty when set");
        }
        for (name, value) in [
            ("rpc.request_timeout_ms", self.rpc.request_timeout_ms),
            ("rpc.probe_timeout_ms", self.rpc.probe_timeout_ms),
            ("rpc.probe_interval_ms", self.rpc.probe_interval_ms),
            ("queue.poll_interval_ms", self.queue.poll_interval_ms),
        ] {
            if value == 0 {
                bail!("{name} must be positive");
            }
        }

        let s = &self.staleness;
        if s.max_age_ms <= 0 {
            bail!("staleness.max_age_ms must be positive, got {}", s.max_age_ms);
        }
        if s.min_refresh_interval_ms < 0 {
            bail!(
                "staleness.min_refresh_interval_ms must be non-negative, got {}",
                s.min_refresh_interval_ms
            );
        }
        if !(s.ttl_expired_margin_min >= 0.0) {
            bail!(
                "staleness.ttl_expired_margin_min must be non-negative, got {}",
                s.ttl_expired_margin_min
            );
        }
        if !(s.ev_drop_pct > 0.0 && s.ev_drop_pct <= 1.0) {
            bail!("staleness.ev_drop_pct must be in (0, 1], got {}", s.ev_drop_pct);
        }
        if !s.min_ev.is_finite() {
            bail!("staleness.min_ev must be finite");
        }

        if self.validity.safety_blocks == 0 {
            tracing::warn!("validity.safety_blocks is 0; tokens may be used on their last valid block");
        }
        Ok(())
    }

    /// Log the effective configuration.
    pub fn log_config(&self) {
        tracing::info!(profile = %self.profile, "Keeper configuration loaded");
        tracing::info!(
            primary = %self.rpc.primary_url,
            secondary = self.rpc.secondary_url.as_deref().unwrap_or("-"),
            request_timeout_ms = self.rpc.request_timeout_ms,
            probe_timeout_ms = self.rpc.probe_timeout_ms,
            probe_interval_ms = self.rpc.probe_interval_ms,
            token_commitment = %self.rpc.token_commitment,
            "RPC endpoints"
        );
        tracing::info!(safety_blocks = self.validity.safety_blocks, "Validity token cache");
        tracing::info!(
            max_age_ms = self.staleness.max_age_ms,
            min_refresh_interval_ms = self.staleness.min_refresh_interval_ms,
            ttl_margin_min = self.staleness.ttl_expired_margin_min,
            ev_drop_pct = self.staleness.ev_drop_pct,
            min_ev = self.staleness.min_ev,
            "Staleness thresholds"
        );
        tracing::info!(
            path = %self.queue.path.display(),
            poll_interval_ms = self.queue.poll_interval_ms,
            pass_interval_ms = self.pass_interval().as_millis() as u64,
            "Forecast queue"
        );
    }
}

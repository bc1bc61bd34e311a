//! Configuration loading from file, profile and environment.
//!
//! Resolution order:
//! 1. `KEEPER_CONFIG` names a TOML file, otherwise `KEEPER_PROFILE` picks a
//!    built-in profile
//! 2. environment overrides (`RPC_URL`, `RPC_WS_URL`, `RPC_SECONDARY_URL`,
//!    `RPC_SECONDARY_WS_URL`, `FORECAST_QUEUE`, `SAFETY_BLOCKS`)
//! 3. `${VAR}` expansion in endpoint URLs
//! 4. validation

use anyhow::{Context, Result};
use regex_lite::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

use super::KeeperConfig;

pub const CONFIG_PATH_VAR: &str = "KEEPER_CONFIG";
pub const PROFILE_VAR: &str = "KEEPER_PROFILE";

impl KeeperConfig {
    /// Load configuration from a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Load, override, expand and validate using the process environment.
    pub fn load() -> Result<Self> {
        Self::load_with(|name| std::env::var(name).ok())
    }

    /// [`KeeperConfig::load`] with an injectable variable lookup.
    pub fn load_with(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = match lookup(CONFIG_PATH_VAR).filter(|p| !p.trim().is_empty()) {
            Some(path) => {
                info!(path = %path, "Loading keeper config file");
                Self::from_file(&path)?
            }
            None => {
                let profile = lookup(PROFILE_VAR).unwrap_or_else(|| "default".to_string());
                Self::profile(&profile)
            }
        };

        config.apply_overrides(&lookup)?;
        config.expand_env_vars_with(&lookup);
        config.validate()?;
        Ok(config)
    }

    /// Apply the environment override variables that are set.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(url) = get("RPC_URL") {
            self.rpc.primary_url = url;
        }
        if let Some(url) = get("RPC_WS_URL") {
            self.rpc.primary_ws_url = Some(url);
        }
        if let Some(url) = get("RPC_SECONDARY_URL") {
            self.rpc.secondary_url = Some(url);
        }
        if let Some(url) = get("RPC_SECONDARY_WS_URL") {
            self.rpc.secondary_ws_url = Some(url);
        }
        if let Some(path) = get("FORECAST_QUEUE") {
            self.queue.path = PathBuf::from(path);
        }
        if let Some(blocks) = get("SAFETY_BLOCKS") {
            self.validity.safety_blocks = blocks
                .trim()
                .parse()
                .with_context(|| format!("SAFETY_BLOCKS must be a block count, got {blocks:?}"))?;
        }
        Ok(())
    }

    /// Expand `${VAR}` patterns in endpoint URLs from the process environment.
    pub fn expand_env_vars(&mut self) {
        self.expand_env_vars_with(|name| std::env::var(name).ok());
    }

    fn expand_env_vars_with(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let rpc = &mut self.rpc;
        rpc.primary_url = expand_env_with(&rpc.primary_url, &lookup);
        for url in [
            &mut rpc.primary_ws_url,
            &mut rpc.secondary_url,
            &mut rpc.secondary_ws_url,
        ]
        .into_iter()
        .flatten()
        {
            *url = expand_env_with(url.as_str(), &lookup);
        }
    }
}

fn env_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("env pattern is valid"))
}

/// Expand `${VAR_NAME}` patterns. Unset variables are left as written.
pub fn expand_env(s: &str) -> String {
    expand_env_with(s, |name| std::env::var(name).ok())
}

fn expand_env_with(s: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    env_pattern()
        .replace_all(s, |cap: &regex_lite::Captures<'_>| {
            let whole = cap.get(0).map_or("", |m| m.as_str());
            cap.get(1)
                .and_then(|name| lookup(name.as_str()))
                .unwrap_or_else(|| whole.to_string())
        })
        .into_owned()
}

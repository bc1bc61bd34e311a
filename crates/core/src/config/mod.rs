//! Keeper configuration.
//!
//! This module provides:
//! - Runtime configuration with profiles (RPC, validity cache, staleness, queue)
//! - Loading from TOML file, profile and environment overrides

mod keeper;
mod loader;

pub use keeper::{KeeperConfig, QueueSettings, RpcSettings, ValiditySettings};
pub use loader::{expand_env, CONFIG_PATH_VAR, PROFILE_VAR};

//! Keeper core logic.
//!
//! This crate provides the freshness layer that sits between forecasting
//! and submission:
//! - Forecast staleness evaluation (age, TTL, EV decay, EV floor)
//! - JSON forecast queue loading
//! - Staleness reports
//! - Submission planning (endpoint, validity token, size gate)
//! - Configuration with profiles and environment overrides

pub mod config;
pub mod forecast;
mod report;
mod submission;

pub use config::{KeeperConfig, QueueSettings, RpcSettings, ValiditySettings};
pub use forecast::{
    active_forecasts, evaluate_forecast, evaluate_forecasts, expired_forecasts,
    parse_ttl_minutes, partition_forecasts, EvaluatedForecast, ExpiryReason, Forecast,
    ForecastQueue, StalenessPolicy,
};
pub use forecast::queue::QueueError;
pub use report::{ReportRow, StalenessReport};
pub use submission::{SubmissionDecision, SubmissionError, SubmissionPlanner, SubmissionTicket};

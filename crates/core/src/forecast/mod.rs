//! Forecast staleness evaluation.
//!
//! A forecast is a precomputed opportunity waiting for execution. Before
//! acting on it the keeper checks, in order:
//!
//! 1. `stale_age`: the forecast was computed too long ago
//! 2. `ttl_expired`: its own time-to-live is at or below the margin
//! 3. `ev_dropped`: EV decayed too far relative to the previous evaluation
//! 4. `ev_floor`: EV is at or below the absolute floor
//!
//! The first condition that fires is reported. Evaluation is pure: it
//! returns annotated copies and never touches the source batch.

pub mod queue;
mod ttl;

pub use queue::ForecastQueue;
pub use ttl::{parse_ttl_minutes, parse_ttl_minutes_at, try_parse_ttl_minutes, UNKNOWN_TTL_MINUTES};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Denominator floor for the relative EV drop.
pub const EV_EPSILON: f64 = 1e-9;

/// A precomputed trading opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Forecast {
    /// Unique key
    pub key: String,
    /// Expected value
    pub ev: f64,
    /// Informational risk metric, not used for expiry
    pub hazard: f64,
    /// Human TTL expression ("5m", "2h", RFC 3339 instant, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl: Option<String>,
    /// TTL already expressed in minutes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_min: Option<f64>,
    /// Creation/update time, milliseconds since the Unix epoch
    pub updated_at_ms: i64,
    /// EV recorded at a prior evaluation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_ev: Option<f64>,
}

impl Forecast {
    pub fn new(key: impl Into<String>, ev: f64, updated_at_ms: i64) -> Self {
        Self {
            key: key.into(),
            ev,
            hazard: 0.0,
            ttl: None,
            ttl_min: None,
            updated_at_ms,
            previous_ev: None,
        }
    }

    pub fn with_ttl(mut self, ttl: impl Into<String>) -> Self {
        self.ttl = Some(ttl.into());
        self
    }

    pub fn with_ttl_min(mut self, minutes: f64) -> Self {
        self.ttl_min = Some(minutes);
        self
    }

    pub fn with_previous_ev(mut self, previous_ev: f64) -> Self {
        self.previous_ev = Some(previous_ev);
        self
    }

    pub fn with_hazard(mut self, hazard: f64) -> Self {
        self.hazard = hazard;
        self
    }

    /// Effective TTL in minutes.
    ///
    /// A parsable TTL string wins over the numeric field; the numeric field
    /// is the fallback; with neither the result is [`UNKNOWN_TTL_MINUTES`].
    pub fn ttl_minutes_at(&self, now_ms: i64) -> f64 {
        self.ttl
            .as_deref()
            .and_then(|raw| try_parse_ttl_minutes(raw, now_ms))
            .or_else(|| {
                self.ttl_min
                    .filter(|m| m.is_finite())
                    .map(|m| m.max(0.0))
            })
            .unwrap_or(UNKNOWN_TTL_MINUTES)
    }

    /// Milliseconds since the last update (negative if stamped in the future).
    pub fn age_ms(&self, now_ms: i64) -> i64 {
        now_ms.saturating_sub(self.updated_at_ms)
    }
}

/// Why a forecast was expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    StaleAge,
    TtlExpired,
    EvDropped,
    EvFloor,
}

impl ExpiryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiryReason::StaleAge => "stale_age",
            ExpiryReason::TtlExpired => "ttl_expired",
            ExpiryReason::EvDropped => "ev_dropped",
            ExpiryReason::EvFloor => "ev_floor",
        }
    }

    /// Whether recomputing the forecast could make it actionable again.
    ///
    /// Age and TTL expiry call for a fresh computation; an EV decay or floor
    /// breach means the opportunity itself has gone away.
    pub fn is_recomputable(&self) -> bool {
        matches!(self, ExpiryReason::StaleAge | ExpiryReason::TtlExpired)
    }
}

impl fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_max_age_ms() -> i64 {
    300_000
}
fn default_min_refresh_interval_ms() -> i64 {
    30_000
}
fn default_ttl_expired_margin_min() -> f64 {
    2.0
}
fn default_ev_drop_pct() -> f64 {
    0.15
}
fn default_min_ev() -> f64 {
    0.0
}

/// Staleness thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StalenessPolicy {
    /// Older than this (now - updated_at) → `stale_age`
    #[serde(default = "default_max_age_ms")]
    pub max_age_ms: i64,

    /// Lower bound on the spacing of evaluation passes. The evaluator itself
    /// ignores it; the pass loop waits at least this long between passes.
    #[serde(default = "default_min_refresh_interval_ms")]
    pub min_refresh_interval_ms: i64,

    /// TTL at or below this many minutes → `ttl_expired`
    #[serde(default = "default_ttl_expired_margin_min")]
    pub ttl_expired_margin_min: f64,

    /// Relative EV drop at or above this fraction → `ev_dropped`
    #[serde(default = "default_ev_drop_pct")]
    pub ev_drop_pct: f64,

    /// EV at or below this → `ev_floor`
    #[serde(default = "default_min_ev")]
    pub min_ev: f64,
}

impl Default for StalenessPolicy {
    fn default() -> Self {
        Self {
            max_age_ms: default_max_age_ms(),
            min_refresh_interval_ms: default_min_refresh_interval_ms(),
            ttl_expired_margin_min: default_ttl_expired_margin_min(),
            ev_drop_pct: default_ev_drop_pct(),
            min_ev: default_min_ev(),
        }
    }
}

impl StalenessPolicy {
    /// Minimum spacing between evaluation passes. Negative values clamp to zero.
    pub fn min_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.min_refresh_interval_ms.max(0) as u64)
    }
}

/// A forecast with the evaluator's verdict.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluatedForecast {
    pub forecast: Forecast,
    pub active: bool,
    pub reason: Option<ExpiryReason>,
    /// Previous EV used for the drift comparison, if any
    pub previous_ev: Option<f64>,
    pub age_ms: i64,
    pub ttl_minutes: f64,
}

impl EvaluatedForecast {
    pub fn key(&self) -> &str {
        &self.forecast.key
    }

    pub fn is_expired(&self) -> bool {
        !self.active
    }
}

/// Relative EV decay: positive when EV fell.
pub fn ev_drop_fraction(previous_ev: f64, ev: f64) -> f64 {
    (previous_ev - ev) / previous_ev.abs().max(EV_EPSILON)
}

/// Classify one forecast at `now_ms`.
pub fn evaluate_forecast(
    forecast: &Forecast,
    policy: &StalenessPolicy,
    now_ms: i64,
) -> EvaluatedForecast {
    let age_ms = forecast.age_ms(now_ms);
    let ttl_minutes = forecast.ttl_minutes_at(now_ms);
    let ev = if forecast.ev.is_finite() { forecast.ev } else { 0.0 };
    let previous_ev = forecast.previous_ev.filter(|p| p.is_finite());

    let reason = if age_ms > policy.max_age_ms {
        Some(ExpiryReason::StaleAge)
    } else if ttl_minutes <= policy.ttl_expired_margin_min {
        Some(ExpiryReason::TtlExpired)
    } else if previous_ev.is_some_and(|prev| ev_drop_fraction(prev, ev) >= policy.ev_drop_pct) {
        Some(ExpiryReason::EvDropped)
    } else if ev <= policy.min_ev {
        Some(ExpiryReason::EvFloor)
    } else {
        None
    };

    EvaluatedForecast {
        forecast: forecast.clone(),
        active: reason.is_none(),
        reason,
        previous_ev,
        age_ms,
        ttl_minutes,
    }
}

/// Classify a batch at `now_ms`, preserving input order.
pub fn evaluate_forecasts(
    forecasts: &[Forecast],
    policy: &StalenessPolicy,
    now_ms: i64,
) -> Vec<EvaluatedForecast> {
    forecasts
        .iter()
        .map(|f| evaluate_forecast(f, policy, now_ms))
        .collect()
}

/// Expired entries, in input order.
pub fn expired_forecasts(evaluated: &[EvaluatedForecast]) -> Vec<&EvaluatedForecast> {
    evaluated.iter().filter(|e| !e.active).collect()
}

/// Active entries, in input order.
pub fn active_forecasts(evaluated: &[EvaluatedForecast]) -> Vec<&EvaluatedForecast> {
    evaluated.iter().filter(|e| e.active).collect()
}

/// Split an evaluated batch into `(active, expired)`, preserving order.
pub fn partition_forecasts(
    evaluated: Vec<EvaluatedForecast>,
) -> (Vec<EvaluatedForecast>, Vec<EvaluatedForecast>) {
    evaluated.into_iter().partition(|e| e.active)
}

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: i64 = 1_700_000_000_000;

    /// Fresh, profitable, long-lived: active under the default policy.
    fn healthy(key: &str) -> Forecast {
        Forecast::new(key, 50.0, NOW - 1_000).with_ttl("30m")
    }

    fn eval(f: &Forecast) -> EvaluatedForecast {
        evaluate_forecast(f, &StalenessPolicy::default(), NOW)
    }

    #[test]
    fn test_healthy_forecast_is_active() {
        let e = eval(&healthy("a"));
        assert!(e.active);
        assert_eq!(e.reason, None);
        assert_eq!(e.age_ms, 1_000);
        assert_eq!(e.ttl_minutes, 30.0);
    }

    #[test]
    fn test_stale_age_takes_precedence() {
        let policy = StalenessPolicy::default();
        let f = Forecast::new("old", 1_000.0, NOW - policy.max_age_ms - 1)
            .with_ttl("2h")
            .with_previous_ev(10.0);
        let e = evaluate_forecast(&f, &policy, NOW);
        assert!(!e.active);
        assert_eq!(e.reason, Some(ExpiryReason::StaleAge));

        // Also beats every other trigger firing at once.
        let f = Forecast::new("everything", -5.0, NOW - policy.max_age_ms - 1)
            .with_ttl("garbage")
            .with_previous_ev(100.0);
        assert_eq!(evaluate_forecast(&f, &policy, NOW).reason, Some(ExpiryReason::StaleAge));
    }

    #[test]
    fn test_age_exactly_at_limit_is_not_stale() {
        let policy = StalenessPolicy::default();
        let f = healthy("edge");
        let f = Forecast {
            updated_at_ms: NOW - policy.max_age_ms,
            ..f
        };
        assert!(evaluate_forecast(&f, &policy, NOW).active);
    }

    #[test]
    fn test_ttl_margin_boundary() {
        let policy = StalenessPolicy {
            ttl_expired_margin_min: 2.0,
            ..Default::default()
        };
        let at_margin = Forecast::new("a", 50.0, NOW).with_ttl_min(2.0);
        let above = Forecast::new("b", 50.0, NOW).with_ttl_min(2.01);

        let e = evaluate_forecast(&at_margin, &policy, NOW);
        assert_eq!(e.reason, Some(ExpiryReason::TtlExpired));
        assert!(evaluate_forecast(&above, &policy, NOW).active);
    }

    #[test]
    fn test_missing_or_unparsable_ttl_expires() {
        let missing = Forecast::new("missing", 50.0, NOW);
        assert_eq!(eval(&missing).reason, Some(ExpiryReason::TtlExpired));

        let garbage = Forecast::new("garbage", 50.0, NOW).with_ttl("whenever");
        assert_eq!(eval(&garbage).reason, Some(ExpiryReason::TtlExpired));
    }

    #[test]
    fn test_ttl_string_is_authoritative() {
        let f = Forecast::new("both", 50.0, NOW).with_ttl("1m").with_ttl_min(60.0);
        assert_eq!(f.ttl_minutes_at(NOW), 1.0);
        assert_eq!(eval(&f).reason, Some(ExpiryReason::TtlExpired));

        // Unparsable string falls back to the numeric field.
        let f = Forecast::new("fallback", 50.0, NOW).with_ttl("??").with_ttl_min(60.0);
        assert_eq!(f.ttl_minutes_at(NOW), 60.0);
        assert!(eval(&f).active);

        // Negative numeric TTL coerces to zero.
        let f = Forecast::new("negative", 50.0, NOW).with_ttl_min(-4.0);
        assert_eq!(f.ttl_minutes_at(NOW), 0.0);
    }

    #[test]
    fn test_ev_drop_threshold() {
        let policy = StalenessPolicy {
            ev_drop_pct: 0.15,
            ..Default::default()
        };

        let dropped = Forecast::new("dropped", 80.0, NOW).with_ttl("30m").with_previous_ev(100.0);
        let e = evaluate_forecast(&dropped, &policy, NOW);
        assert_eq!(e.reason, Some(ExpiryReason::EvDropped));
        assert_eq!(e.previous_ev, Some(100.0));

        let held = Forecast::new("held", 90.0, NOW).with_ttl("30m").with_previous_ev(100.0);
        assert!(evaluate_forecast(&held, &policy, NOW).active);

        // EV increases never count as a drop.
        let grew = Forecast::new("grew", 150.0, NOW).with_ttl("30m").with_previous_ev(100.0);
        assert!(evaluate_forecast(&grew, &policy, NOW).active);
    }

    #[test]
    fn test_ev_drop_with_negative_and_zero_previous() {
        assert!((ev_drop_fraction(-10.0, -20.0) - 1.0).abs() < 1e-12);
        assert!(ev_drop_fraction(0.0, -1.0) > 1.0);
        assert!(ev_drop_fraction(0.0, 1.0) < 0.0);
    }

    #[test]
    fn test_ttl_precedes_ev_drop() {
        let f = Forecast::new("both", 10.0, NOW).with_ttl("1m").with_previous_ev(100.0);
        assert_eq!(eval(&f).reason, Some(ExpiryReason::TtlExpired));
    }

    #[test]
    fn test_ev_floor() {
        let policy = StalenessPolicy {
            min_ev: 5.0,
            ..Default::default()
        };
        let at_floor = Forecast::new("floor", 5.0, NOW).with_ttl("30m");
        assert_eq!(evaluate_forecast(&at_floor, &policy, NOW).reason, Some(ExpiryReason::EvFloor));

        let above = Forecast::new("above", 5.5, NOW).with_ttl("30m");
        assert!(evaluate_forecast(&above, &policy, NOW).active);

        let nan = Forecast::new("nan", f64::NAN, NOW).with_ttl("30m");
        assert_eq!(evaluate_forecast(&nan, &policy, NOW).reason, Some(ExpiryReason::EvFloor));
    }

    #[test]
    fn test_hazard_is_informational() {
        let f = healthy("risky").with_hazard(0.99);
        assert!(eval(&f).active);
    }

    #[test]
    fn test_evaluation_is_idempotent() {
        let batch = vec![
            healthy("a"),
            Forecast::new("b", 80.0, NOW).with_ttl("30m").with_previous_ev(100.0),
            Forecast::new("c", 50.0, NOW).with_ttl("30s"),
            Forecast::new("d", 50.0, 0),
        ];
        let policy = StalenessPolicy::default();

        let first = evaluate_forecasts(&batch, &policy, NOW);
        let second = evaluate_forecasts(&batch, &policy, NOW);
        assert_eq!(first, second);
    }

    #[test]
    fn test_partition_is_complete_and_ordered() {
        let batch = vec![
            healthy("a"),
            Forecast::new("b", 50.0, 0),
            healthy("c"),
            Forecast::new("d", -1.0, NOW).with_ttl("30m"),
            healthy("e"),
        ];
        let evaluated = evaluate_forecasts(&batch, &StalenessPolicy::default(), NOW);

        let active: Vec<_> = active_forecasts(&evaluated).iter().map(|e| e.key()).collect();
        let expired: Vec<_> = expired_forecasts(&evaluated).iter().map(|e| e.key()).collect();
        assert_eq!(active, vec!["a", "c", "e"]);
        assert_eq!(expired, vec!["b", "d"]);
        assert_eq!(active.len() + expired.len(), evaluated.len());

        let (active, expired) = partition_forecasts(evaluated);
        assert_eq!(active.len(), 3);
        assert_eq!(expired.len(), 2);
        assert!(active.iter().all(|e| e.active));
        assert!(expired.iter().all(EvaluatedForecast::is_expired));
    }

    #[test]
    fn test_source_is_not_mutated() {
        let batch = vec![Forecast::new("x", 50.0, 0)];
        let before = batch.clone();
        let _ = evaluate_forecasts(&batch, &StalenessPolicy::default(), NOW);
        assert_eq!(batch, before);
    }

    #[test]
    fn test_reason_codes() {
        assert_eq!(ExpiryReason::StaleAge.to_string(), "stale_age");
        assert_eq!(
            serde_json::to_string(&ExpiryReason::EvDropped).unwrap(),
            "\"ev_dropped\""
        );
        assert!(ExpiryReason::TtlExpired.is_recomputable());
        assert!(!ExpiryReason::EvFloor.is_recomputable());
    }
}

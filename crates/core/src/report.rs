//! Staleness report for an evaluated forecast batch.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::info;

use crate::forecast::{EvaluatedForecast, ExpiryReason};

/// One row per evaluated forecast.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    pub key: String,
    pub active: bool,
    pub reason: Option<ExpiryReason>,
    pub ev: f64,
    pub ttl_minutes: f64,
    pub age_ms: i64,
}

impl From<&EvaluatedForecast> for ReportRow {
    fn from(e: &EvaluatedForecast) -> Self {
        Self {
            key: e.forecast.key.clone(),
            active: e.active,
            reason: e.reason,
            ev: e.forecast.ev,
            ttl_minutes: e.ttl_minutes,
            age_ms: e.age_ms,
        }
    }
}

/// Summary of one evaluation pass.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StalenessReport {
    pub evaluated_at_ms: i64,
    pub rows: Vec<ReportRow>,
    pub active: usize,
    pub expired: usize,
    pub by_reason: BTreeMap<ExpiryReason, usize>,
}

impl StalenessReport {
    pub fn new(evaluated: &[EvaluatedForecast], evaluated_at_ms: i64) -> Self {
        let mut report = Self {
            evaluated_at_ms,
            rows: Vec::with_capacity(evaluated.len()),
            ..Default::default()
        };

        for e in evaluated {
            match e.reason {
                None => report.active += 1,
                Some(reason) => {
                    report.expired += 1;
                    *report.by_reason.entry(reason).or_default() += 1;
                }
            }
            report.rows.push(ReportRow::from(e));
        }

        report
    }

    pub fn total(&self) -> usize {
        self.rows.len()
    }

    pub fn count(&self, reason: ExpiryReason) -> usize {
        self.by_reason.get(&reason).copied().unwrap_or(0)
    }

    /// Emit the summary and one debug line per expired entry.
    pub fn log(&self) {
        info!(
            total = self.total(),
            active = self.active,
            expired = self.expired,
            stale_age = self.count(ExpiryReason::StaleAge),
            ttl_expired = self.count(ExpiryReason::TtlExpired),
            ev_dropped = self.count(ExpiryReason::EvDropped),
            ev_floor = self.count(ExpiryReason::EvFloor),
            "Forecast staleness pass"
        );

        for row in self.rows.iter().filter(|r| !r.active) {
            tracing::debug!(
                key = %row.key,
                reason = %row.reason.map(|r| r.as_str()).unwrap_or("-"),
                ev = row.ev,
                ttl_min = row.ttl_minutes,
                age_ms = row.age_ms,
                "Forecast expired"
            );
        }
    }
}

impl fmt::Display for StalenessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key_width = self
            .rows
            .iter()
            .map(|r| r.key.len())
            .max()
            .unwrap_or(0)
            .max(3);

        writeln!(
            f,
            "{:<key_width$}  {:<7}  {:<11}  {:>12}  {:>9}  {:>10}",
            "key", "status", "reason", "ev", "ttl_min", "age_s"
        )?;
        for row in &self.rows {
            writeln!(
                f,
                "{:<key_width$}  {:<7}  {:<11}  {:>12.4}  {:>9.2}  {:>10.1}",
                row.key,
                if row.active { "active" } else { "expired" },
                row.reason.map(|r| r.as_str()).unwrap_or("-"),
                row.ev,
                row.ttl_minutes,
                row.age_ms as f64 / 1_000.0,
            )?;
        }

        write!(f, "active: {}  expired: {}", self.active, self.expired)?;
        for (reason, count) in &self.by_reason {
            write!(f, "  {reason}: {count}")?;
        }
        Ok(())
    }
}

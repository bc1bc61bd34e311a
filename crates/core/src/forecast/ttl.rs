//! Human time-to-live parsing.
//!
//! Accepted forms (case-insensitive):
//! - bare numbers, read as minutes: `"5"`, `"2.5"`
//! - unit suffixes, optionally combined: `"45s"`, `"5m"`, `"2h"`, `"1h30m"`, `"1d"`
//! - relative phrases: `"in 5 minutes"`, `"3 hours"`, `"1 hour and 15 minutes"`
//! - absolute RFC 3339 instants, read as minutes until that instant
//! - `"expired"` / `"now"`
//!
//! Anything else parses to [`UNKNOWN_TTL_MINUTES`], which the evaluator
//! treats as already expired.

use chrono::DateTime;
use regex_lite::Regex;
use std::sync::OnceLock;

/// Value returned for missing or unparsable TTLs.
pub const UNKNOWN_TTL_MINUTES: f64 = 0.0;

const MS_PER_MINUTE: f64 = 60_000.0;

fn full_duration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:\d+(?:\.\d+)?\s*[a-z]+[\s,]*)+$").expect("duration pattern is valid")
    })
}

fn duration_part_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+(?:\.\d+)?)\s*([a-z]+)").expect("part pattern is valid"))
}

fn unit_minutes(unit: &str) -> Option<f64> {
    match unit {
        "s" | "sec" | "secs" | "second" | "seconds" => Some(1.0 / 60.0),
        "m" | "min" | "mins" | "minute" | "minutes" => Some(1.0),
        "h" | "hr" | "hrs" | "hour" | "hours" => Some(60.0),
        "d" | "day" | "days" => Some(1_440.0),
        _ => None,
    }
}

fn parse_duration_minutes(s: &str) -> Option<f64> {
    let s = s.replace(" and ", " ");
    let s = s.trim();
    if !full_duration_re().is_match(s) {
        return None;
    }

    let mut total = 0.0;
    for cap in duration_part_re().captures_iter(s) {
        let value: f64 = cap.get(1)?.as_str().parse().ok()?;
        total += value * unit_minutes(cap.get(2)?.as_str())?;
    }
    Some(total)
}

/// Parse a TTL expression, returning `None` when it is not understood.
pub fn try_parse_ttl_minutes(raw: &str, now_ms: i64) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Timestamps are case-sensitive ("T", "Z"), so try them before lowercasing.
    if let Ok(instant) = DateTime::parse_from_rfc3339(trimmed) {
        let remaining_ms = instant.timestamp_millis().saturating_sub(now_ms);
        return Some((remaining_ms as f64 / MS_PER_MINUTE).max(0.0));
    }

    let lower = trimmed.to_ascii_lowercase();
    let lower = lower.strip_prefix("in ").unwrap_or(lower.as_str()).trim();

    let minutes = match lower {
        "expired" | "now" => Some(0.0),
        _ => match lower.parse::<f64>() {
            Ok(n) => Some(n),
            Err(_) => parse_duration_minutes(lower),
        },
    }?;

    (minutes.is_finite() && minutes >= 0.0).then_some(minutes)
}

/// Parse a TTL expression relative to `now_ms`. Missing or unparsable input
/// yields [`UNKNOWN_TTL_MINUTES`]; never fails.
pub fn parse_ttl_minutes_at(raw: Option<&str>, now_ms: i64) -> f64 {
    raw.and_then(|s| try_parse_ttl_minutes(s, now_ms))
        .unwrap_or(UNKNOWN_TTL_MINUTES)
}

/// [`parse_ttl_minutes_at`] against the wall clock.
pub fn parse_ttl_minutes(raw: Option<&str>) -> f64 {
    parse_ttl_minutes_at(raw, chrono::Utc::now().timestamp_millis())
}

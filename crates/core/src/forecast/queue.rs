//! JSON forecast queue.
//!
//! The queue is a JSON file written by the forecasting side, either an
//! array of records or an object mapping keys to records. Field values are
//! coerced rather than rejected so one bad record never sinks a batch.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use super::Forecast;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("failed to read forecast queue {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("forecast queue {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("forecast queue {0} must be a JSON array or object")]
    Shape(PathBuf),
}

/// File-backed forecast source.
#[derive(Debug, Clone)]
pub struct ForecastQueue {
    path: PathBuf,
}

impl ForecastQueue {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole queue. A missing file is an empty batch.
    pub fn load(&self) -> Result<Vec<Forecast>, QueueError> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Forecast queue not found, treating as empty");
                return Ok(Vec::new());
            }
            Err(source) => {
                return Err(QueueError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if text.trim().is_empty() {
            return Ok(Vec::new());
        }

        let value: Value = serde_json::from_str(&text).map_err(|source| QueueError::Parse {
            path: self.path.clone(),
            source,
        })?;

        parse_queue(value).ok_or_else(|| QueueError::Shape(self.path.clone()))
    }
}

/// Coerce a parsed queue document into forecasts.
///
/// Returns `None` when the top level is neither an array nor an object.
pub fn parse_queue(value: Value) -> Option<Vec<Forecast>> {
    match value {
        Value::Array(items) => Some(
            items
                .into_iter()
                .enumerate()
                .filter_map(|(index, item)| match item {
                    Value::Object(record) => Some(forecast_from_record(&record, None)),
                    other => {
                        warn!(index, kind = kind_of(&other), "Skipping non-object forecast entry");
                        None
                    }
                })
                .collect(),
        ),
        Value::Object(map) => Some(
            map.into_iter()
                .filter_map(|(key, item)| match item {
                    Value::Object(record) => Some(forecast_from_record(&record, Some(key))),
                    other => {
                        warn!(key = %key, kind = kind_of(&other), "Skipping non-object forecast entry");
                        None
                    }
                })
                .collect(),
        ),
        _ => None,
    }
}

/// Build a forecast from one JSON record. `map_key` is the enclosing key
/// when the queue is an object; an explicit `key` field wins over it.
pub fn forecast_from_record(record: &Map<String, Value>, map_key: Option<String>) -> Forecast {
    let key = field(record, &["key", "id"])
        .and_then(as_key)
        .or(map_key)
        .unwrap_or_default();

    let ttl_value = field(record, &["ttl"]);
    let ttl = ttl_value.and_then(|v| match v {
        Value::String(s) => Some(s.clone()),
        _ => None,
    });
    // A numeric `ttl` is read as minutes.
    let ttl_min = field(record, &["ttlMin", "ttl_min"])
        .and_then(as_f64)
        .or_else(|| ttl_value.filter(|v| v.is_number()).and_then(as_f64));

    Forecast {
        key,
        ev: field(record, &["ev"]).and_then(as_f64).unwrap_or(0.0),
        hazard: field(record, &["hazard"]).and_then(as_f64).unwrap_or(0.0),
        ttl,
        ttl_min,
        updated_at_ms: field(record, &["updatedAtMs", "updated_at_ms", "updatedAt", "updated_at"])
            .and_then(as_epoch_ms)
            .unwrap_or(0),
        previous_ev: field(record, &["previousEv", "previous_ev", "prevEv", "prev_ev"])
            .and_then(as_f64),
    }
}

fn field<'a>(record: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .find_map(|name| record.get(*name))
        .filter(|v| !v.is_null())
}

/// Finite number, or a string holding one.
fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
    .filter(|n| n.is_finite())
}

/// Epoch milliseconds from a number, a numeric string or an RFC 3339 instant.
fn as_epoch_ms(value: &Value) -> Option<i64> {
    as_f64(value).map(|ms| ms as i64).or_else(|| match value {
        Value::String(s) => chrono::DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|t| t.timestamp_millis()),
        _ => None,
    })
}

fn as_key(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn temp_queue(name: &str, contents: &str) -> ForecastQueue {
        let path = std::env::temp_dir().join(format!(
            "keeper-queue-{}-{}-{name}.json",
            std::process::id(),
            chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ));
        std::fs::write(&path, contents).unwrap();
        ForecastQueue::new(path)
    }

    #[test]
    fn test_camel_case_record() {
        let forecasts = parse_queue(json!([{
            "key": "SOL-PERP:liq:42",
            "ev": 12.5,
            "hazard": 0.3,
            "ttl": "5m",
            "updatedAtMs": 1_700_000_000_000i64,
            "previousEv": 14.0
        }]))
        .unwrap();

        assert_eq!(forecasts.len(), 1);
        let f = &forecasts[0];
        assert_eq!(f.key, "SOL-PERP:liq:42");
        assert_eq!(f.ev, 12.5);
        assert_eq!(f.hazard, 0.3);
        assert_eq!(f.ttl.as_deref(), Some("5m"));
        assert_eq!(f.ttl_min, None);
        assert_eq!(f.updated_at_ms, 1_700_000_000_000);
        assert_eq!(f.previous_ev, Some(14.0));
    }

    #[test]
    fn test_snake_case_aliases_and_numeric_strings() {
        let forecasts = parse_queue(json!([{
            "key": "a",
            "ev": "3.5",
            "ttl_min": "7",
            "updated_at_ms": "1000",
            "previous_ev": 4
        }]))
        .unwrap();

        let f = &forecasts[0];
        assert_eq!(f.ev, 3.5);
        assert_eq!(f.ttl_min, Some(7.0));
        assert_eq!(f.updated_at_ms, 1_000);
        assert_eq!(f.previous_ev, Some(4.0));
    }

    #[test]
    fn test_rfc3339_updated_at() {
        let forecasts = parse_queue(json!([
            { "key": "a", "updatedAt": "2026-10-18T05:00:00Z" },
            { "key": "b", "updated_at": "2026-10-18T07:00:00+02:00" },
            { "key": "c", "updatedAt": "yesterday" }
        ]))
        .unwrap();

        let expected = chrono::DateTime::parse_from_rfc3339("2026-10-18T05:00:00Z")
            .unwrap()
            .timestamp_millis();
        assert_eq!(forecasts[0].updated_at_ms, expected);
        assert_eq!(forecasts[1].updated_at_ms, expected);
        assert_eq!(forecasts[2].updated_at_ms, 0);
    }

    #[test]
    fn test_numeric_ttl_is_minutes() {
        let forecasts = parse_queue(json!([{ "key": "a", "ev": 1, "ttl": 12 }])).unwrap();
        assert_eq!(forecasts[0].ttl, None);
        assert_eq!(forecasts[0].ttl_min, Some(12.0));
    }

    #[test]
    fn test_malformed_fields_coerce() {
        let forecasts = parse_queue(json!([{
            "key": "bad",
            "ev": "lots",
            "hazard": [1, 2],
            "ttl": { "minutes": 5 },
            "updatedAtMs": null,
            "previousEv": "n/a"
        }]))
        .unwrap();

        let f = &forecasts[0];
        assert_eq!(f.ev, 0.0);
        assert_eq!(f.hazard, 0.0);
        assert_eq!(f.ttl, None);
        assert_eq!(f.ttl_min, None);
        assert_eq!(f.updated_at_ms, 0);
        assert_eq!(f.previous_ev, None);
    }

    #[test]
    fn test_non_object_entries_skipped() {
        let forecasts = parse_queue(json!([
            { "key": "a", "ev": 1 },
            42,
            "junk",
            null,
            { "key": "b", "ev": 2 }
        ]))
        .unwrap();

        let keys: Vec<_> = forecasts.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_object_queue_uses_map_keys() {
        let forecasts = parse_queue(json!({
            "first": { "ev": 1 },
            "second": { "key": "explicit", "ev": 2 },
            "third": false
        }))
        .unwrap();

        let keys: Vec<_> = forecasts.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["first", "explicit"]);
    }

    #[test]
    fn test_object_queue_keeps_file_order() {
        let value: Value = serde_json::from_str(
            r#"{"zeta": {"ev": 1}, "alpha": {"ev": 2}, "mid": {"ev": 3}}"#,
        )
        .unwrap();
        let forecasts = parse_queue(value).unwrap();

        let keys: Vec<_> = forecasts.iter().map(|f| f.key.as_str()).collect();
        assert_eq!(keys, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_scalar_document_rejected() {
        assert!(parse_queue(json!(7)).is_none());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let queue = ForecastQueue::new(std::env::temp_dir().join("keeper-queue-does-not-exist.json"));
        assert!(queue.load().unwrap().is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let queue = temp_queue(
            "ok",
            r#"[{"key":"x","ev":5,"ttl":"10m","updatedAtMs":1}, "skip me"]"#,
        );
        let forecasts = queue.load().unwrap();
        assert_eq!(forecasts.len(), 1);
        assert_eq!(forecasts[0].key, "x");
        std::fs::remove_file(queue.path()).ok();
    }

    #[test]
    fn test_unparsable_file_is_error() {
        let queue = temp_queue("broken", "[{ not json");
        assert!(matches!(queue.load(), Err(QueueError::Parse { .. })));
        std::fs::remove_file(queue.path()).ok();

        let queue = temp_queue("scalar", "\"hello\"");
        assert!(matches!(queue.load(), Err(QueueError::Shape(_))));
        std::fs::remove_file(queue.path()).ok();
    }
}

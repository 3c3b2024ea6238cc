//! Lookups into untrusted, partially populated JSON payloads.
//!
//! Every helper returns `None` instead of failing when a segment is missing
//! or has an unexpected type.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};

/// Epoch values at or above this are read as milliseconds.
const EPOCH_MILLIS_CUTOFF: i64 = 100_000_000_000;

/// Follows `path` through nested objects.
#[must_use]
pub fn lookup<'a>(data: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Value> {
    let (first, rest) = path.split_first()?;
    let mut current = data.get(*first)?;
    for segment in rest {
        current = current.as_object()?.get(*segment)?;
    }
    Some(current)
}

/// Returns the non-blank string at `path`.
#[must_use]
pub fn str_at<'a>(data: &'a Map<String, Value>, path: &[&str]) -> Option<&'a str> {
    lookup(data, path)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Returns the first non-blank string among `paths`.
#[must_use]
pub fn first_str<'a>(data: &'a Map<String, Value>, paths: &[&[&str]]) -> Option<&'a str> {
    paths.iter().find_map(|path| str_at(data, path))
}

/// Returns the array at `path`.
#[must_use]
pub fn array_at<'a>(data: &'a Map<String, Value>, path: &[&str]) -> Option<&'a Vec<Value>> {
    lookup(data, path).and_then(Value::as_array)
}

/// Returns the object at `path`.
#[must_use]
pub fn object_at<'a>(
    data: &'a Map<String, Value>,
    path: &[&str],
) -> Option<&'a Map<String, Value>> {
    lookup(data, path).and_then(Value::as_object)
}

/// Returns the number at `path` as `f64`. Numeric strings are accepted.
#[must_use]
pub fn f64_at(data: &Map<String, Value>, path: &[&str]) -> Option<f64> {
    let value = match lookup(data, path)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    value.filter(|v| v.is_finite())
}

/// Returns the boolean at `path`.
#[must_use]
pub fn bool_at(data: &Map<String, Value>, path: &[&str]) -> Option<bool> {
    lookup(data, path).and_then(Value::as_bool)
}

/// Renders the scalar at `path` as a dimension value.
///
/// Strings are trimmed, numbers and booleans are formatted. Objects, arrays,
/// null and blank strings yield `None`.
#[must_use]
pub fn scalar_at(data: &Map<String, Value>, path: &[&str]) -> Option<String> {
    lookup(data, path).and_then(scalar)
}

/// Renders a scalar JSON value as a string.
#[must_use]
pub fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Parses a timestamp value.
///
/// Accepts RFC 3339 strings, GitLab's `YYYY-MM-DD HH:MM:SS UTC` form and
/// integer epochs (seconds, or milliseconds for large values as Jira sends).
#[must_use]
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts.with_timezone(&Utc));
            }
            let bare = s.strip_suffix(" UTC").unwrap_or(s);
            NaiveDateTime::parse_from_str(bare, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|naive| naive.and_utc())
        }
        Value::Number(n) => {
            let epoch = n.as_i64()?;
            if epoch.abs() >= EPOCH_MILLIS_CUTOFF {
                DateTime::<Utc>::from_timestamp_millis(epoch)
            } else {
                DateTime::<Utc>::from_timestamp(epoch, 0)
            }
        }
        _ => None,
    }
}

/// Parses the timestamp at `path`.
#[must_use]
pub fn timestamp_at(data: &Map<String, Value>, path: &[&str]) -> Option<DateTime<Utc>> {
    lookup(data, path).and_then(parse_timestamp)
}

/// Seconds between the timestamps at `start` and `end`, if both parse and
/// `end` is not earlier than `start`.
#[must_use]
pub fn seconds_between(data: &Map<String, Value>, start: &[&str], end: &[&str]) -> Option<f64> {
    let start = timestamp_at(data, start)?;
    let end = timestamp_at(data, end)?;
    let secs = (end - start).num_seconds();
    (secs >= 0).then_some(secs as f64)
}

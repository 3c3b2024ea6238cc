//! Turns raw webhook deliveries into [`Event`]s.

use chrono::{DateTime, Utc};
use pulse_core::{Event, EventError, EventId, EventMetadata, EventResult, RawEvent, Source};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::event_type::{infer_event_type, normalize_event_type};
use crate::payload;

/// Event type used when neither the header nor the payload names one.
pub const UNKNOWN_EVENT_TYPE: &str = "unknown";

/// Payload locations that may carry the occurrence time, in priority order.
const TIMESTAMP_PATHS: [&[&str]; 7] = [
    &["head_commit", "timestamp"],
    &["pull_request", "updated_at"],
    &["issue", "updated_at"],
    &["workflow_run", "updated_at"],
    &["timestamp"],
    &["created_at"],
    &["updated_at"],
];

/// Parses a raw delivery into an event.
///
/// The event type comes from the delivery's type header when present, then
/// from payload inference, and finally falls back to `unknown`. The event is
/// named `<source>.<type>`, keyed by the delivery id when one was supplied,
/// and stamped with the first parseable payload timestamp (or the receive
/// time).
///
/// # Errors
///
/// Returns `EventError::InvalidPayload` if the body is not a JSON object or
/// the declared source is blank.
pub fn parse_raw_event(raw: &RawEvent) -> EventResult<Event> {
    let data = parse_body(&raw.payload).inspect_err(|e| {
        warn!(source = %raw.source, error = %e, "rejecting raw event");
    })?;

    let source = Source::parse(&raw.source);
    if source.as_str().is_empty() {
        return Err(EventError::invalid_payload("source cannot be empty"));
    }

    let (event_type, type_inferred) = resolve_event_type(raw, &data);
    let name = format!("{}.{event_type}", source.as_str());
    let timestamp = extract_timestamp(&data).unwrap_or(raw.received_at);

    let id = raw
        .delivery_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map_or_else(EventId::generate, EventId::new);

    let metadata = EventMetadata {
        delivery_id: raw.delivery_id.clone(),
        type_inferred,
        received_at: raw.received_at,
    };

    let event = Event::new(name, source, data)
        .map_err(|e| EventError::invalid_payload(e.to_string()))?
        .with_id(id)
        .with_timestamp(timestamp)
        .with_metadata(metadata);

    debug!(
        event_id = %event.id(),
        name = %event.name(),
        type_inferred,
        "parsed raw event"
    );

    Ok(event)
}

fn parse_body(body: &str) -> EventResult<Map<String, Value>> {
    let value: Value = serde_json::from_str(body)
        .map_err(|e| EventError::invalid_payload(format!("malformed JSON: {e}")))?;
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(EventError::invalid_payload("payload must be a JSON object")),
    }
}

fn resolve_event_type(raw: &RawEvent, data: &Map<String, Value>) -> (String, bool) {
    if let Some(declared) = raw.event_type.as_deref().and_then(normalize_event_type) {
        return (declared, false);
    }
    match infer_event_type(data) {
        Some(inferred) => (inferred, true),
        None => (UNKNOWN_EVENT_TYPE.to_string(), false),
    }
}

/// Returns the first parseable timestamp in the payload.
#[must_use]
pub fn extract_timestamp(data: &Map<String, Value>) -> Option<DateTime<Utc>> {
    TIMESTAMP_PATHS
        .iter()
        .find_map(|path| payload::timestamp_at(data, path))
}

//! Event-type resolution for payloads that may lack a type header.

use serde_json::{Map, Value};

use crate::payload;

/// Payload fields that name the event type outright, in lookup order.
const EXPLICIT_TYPE_FIELDS: [&str; 4] = ["event_type", "object_kind", "webhookEvent", "eventKey"];

/// Top-level keys that mark a CI event. The key itself becomes the type.
const CI_FIELDS: [&str; 4] = ["check_run", "check_suite", "workflow_run", "workflow_job"];

/// Infers the event type from the payload shape.
///
/// Precedence, first match wins:
/// 1. an explicit type field (`event_type`, `object_kind`, `webhookEvent`, `eventKey`)
/// 2. a `commits` array → `push`
/// 3. a `pull_request` object → `pull_request`
/// 4. an `issue` object without `pull_request` → `issues`
/// 5. a CI object (`check_run`, `check_suite`, `workflow_run`, `workflow_job`)
/// 6. `deployment_status` or `deployment`
///
/// Returns `None` when nothing matches; the caller supplies the fallback.
#[must_use]
pub fn infer_event_type(data: &Map<String, Value>) -> Option<String> {
    if let Some(explicit) = EXPLICIT_TYPE_FIELDS
        .iter()
        .filter_map(|field| payload::str_at(data, &[*field]))
        .find_map(normalize_event_type)
    {
        return Some(explicit);
    }

    if data.get("commits").is_some_and(Value::is_array) {
        return Some("push".to_string());
    }

    if data.get("pull_request").is_some_and(Value::is_object) {
        return Some("pull_request".to_string());
    }

    if data.get("issue").is_some_and(Value::is_object) {
        return Some("issues".to_string());
    }

    if let Some(field) = CI_FIELDS
        .iter()
        .find(|field| data.get(**field).is_some_and(Value::is_object))
    {
        return Some((*field).to_string());
    }

    if data.get("deployment_status").is_some_and(Value::is_object) {
        return Some("deployment_status".to_string());
    }
    if data.get("deployment").is_some_and(Value::is_object) {
        return Some("deployment".to_string());
    }

    None
}

/// Normalizes a provider's type label.
///
/// Lowercases, strips Jira's `jira:` prefix, maps Bitbucket keys
/// (`repo:push` → `push`, `pullrequest:*` → `pull_request`, other `repo:x` → `x`)
/// and replaces characters outside `[a-z0-9_.]` with `_`. Returns `None` for
/// a blank label.
#[must_use]
pub fn normalize_event_type(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_ascii_lowercase();
    let label = lowered.strip_prefix("jira:").unwrap_or(&lowered);

    let label = if label.starts_with("pullrequest:") {
        "pull_request"
    } else if let Some(rest) = label.strip_prefix("repo:") {
        rest
    } else {
        label
    };

    let normalized: String = label
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();

    (!normalized.is_empty()).then_some(normalized)
}

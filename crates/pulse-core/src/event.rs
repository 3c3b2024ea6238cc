//! The canonical event model.
//!
//! An [`Event`] is built once at the ingestion boundary and never mutated
//! afterwards. Raw webhook bodies travel through the queue as [`RawEvent`]
//! until they are parsed.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{EventError, EventResult};

/// Opaque event identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(String);

impl EventId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The provider an event came from.
///
/// Known providers get their own variant; anything else is kept verbatim
/// in [`Source::Custom`] so it can still be counted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Source {
    /// GitHub webhooks.
    GitHub,
    /// GitLab webhooks.
    GitLab,
    /// Jira webhooks.
    Jira,
    /// Bitbucket webhooks.
    Bitbucket,
    /// Generic CI system notifications.
    Ci,
    /// Task tracker notifications.
    Task,
    /// Any other source, lowercased.
    Custom(String),
}

impl Source {
    /// Parses a declared source string. Never fails.
    #[must_use]
    pub fn parse(raw: &str) -> Self {
        let normalized = raw.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "github" => Self::GitHub,
            "gitlab" => Self::GitLab,
            "jira" => Self::Jira,
            "bitbucket" => Self::Bitbucket,
            "ci" => Self::Ci,
            "task" => Self::Task,
            _ => Self::Custom(normalized),
        }
    }

    /// Returns the source name as used in metric names and dimensions.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::GitHub => "github",
            Self::GitLab => "gitlab",
            Self::Jira => "jira",
            Self::Bitbucket => "bitbucket",
            Self::Ci => "ci",
            Self::Task => "task",
            Self::Custom(name) => name,
        }
    }

    /// Returns the dispatch kind for this source.
    #[must_use]
    pub const fn kind(&self) -> SourceKind {
        match self {
            Self::GitHub => SourceKind::GitHub,
            Self::GitLab => SourceKind::GitLab,
            Self::Jira => SourceKind::Jira,
            Self::Bitbucket => SourceKind::Bitbucket,
            Self::Ci => SourceKind::Ci,
            Self::Task => SourceKind::Task,
            Self::Custom(_) => SourceKind::Unknown,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<String> for Source {
    fn from(raw: String) -> Self {
        Self::parse(&raw)
    }
}

impl From<&str> for Source {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl From<Source> for String {
    fn from(source: Source) -> Self {
        source.as_str().to_string()
    }
}

/// Fieldless mirror of [`Source`] used as a dispatch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SourceKind {
    /// GitHub.
    GitHub,
    /// GitLab.
    GitLab,
    /// Jira.
    Jira,
    /// Bitbucket.
    Bitbucket,
    /// Generic CI.
    Ci,
    /// Task tracker.
    Task,
    /// Anything not listed above.
    Unknown,
}

impl SourceKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::GitHub,
        Self::GitLab,
        Self::Jira,
        Self::Bitbucket,
        Self::Ci,
        Self::Task,
        Self::Unknown,
    ];
}

/// Ingestion details that travel with the event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Provider delivery identifier, if the boundary supplied one.
    pub delivery_id: Option<String>,
    /// True when the event type was inferred from the payload shape rather
    /// than declared by the provider.
    pub type_inferred: bool,
    /// When the ingestion boundary received the payload.
    pub received_at: DateTime<Utc>,
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self {
            delivery_id: None,
            type_inferred: false,
            received_at: Utc::now(),
        }
    }
}

/// An ingested event.
///
/// `name` and `source` are never empty and `data` is always a mapping
/// (possibly empty).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    id: EventId,
    name: String,
    source: Source,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    data: Map<String, Value>,
    #[serde(default)]
    metadata: EventMetadata,
}

impl Event {
    /// Creates an event stamped with the current time and a generated id.
    ///
    /// # Errors
    ///
    /// Returns `EventError::InvalidEvent` if `name` or `source` is blank.
    pub fn new(
        name: impl Into<String>,
        source: impl Into<Source>,
        data: Map<String, Value>,
    ) -> EventResult<Self> {
        let name = name.into();
        let source = source.into();

        if name.trim().is_empty() {
            return Err(EventError::InvalidEvent {
                reason: "event name cannot be empty".to_string(),
            });
        }
        if source.as_str().is_empty() {
            return Err(EventError::InvalidEvent {
                reason: "event source cannot be empty".to_string(),
            });
        }

        Ok(Self {
            id: EventId::generate(),
            name,
            source,
            timestamp: Utc::now(),
            data,
            metadata: EventMetadata::default(),
        })
    }

    /// Replaces the generated id.
    #[must_use]
    pub fn with_id(mut self, id: EventId) -> Self {
        self.id = id;
        self
    }

    /// Sets the event timestamp.
    #[must_use]
    pub const fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the ingestion metadata.
    #[must_use]
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Parses the canonical envelope form:
    /// `{"id"?, "name", "source", "timestamp"?, "data"?}`.
    ///
    /// # Errors
    ///
    /// Returns `EventError::InvalidPayload` for invalid JSON, a non-object
    /// body, missing `name`/`source`, a non-object `data`, or an unparseable
    /// `timestamp`.
    pub fn from_envelope(json: &str) -> EventResult<Self> {
        let value: Value = serde_json::from_str(json)
            .map_err(|e| EventError::invalid_payload(format!("malformed JSON: {e}")))?;

        let Value::Object(mut envelope) = value else {
            return Err(EventError::invalid_payload("envelope must be a JSON object"));
        };

        let name = required_string(&envelope, "name")?;
        let source = required_string(&envelope, "source")?;

        let data = match envelope.remove("data") {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => return Err(EventError::invalid_payload("'data' must be an object")),
        };

        let mut event = Self::new(name, source.as_str(), data)
            .map_err(|e| EventError::invalid_payload(e.to_string()))?;

        if let Some(id) = envelope.get("id").and_then(Value::as_str) {
            if !id.is_empty() {
                event.id = EventId::new(id);
            }
        }

        if let Some(ts) = envelope.get("timestamp").and_then(Value::as_str) {
            let parsed = DateTime::parse_from_rfc3339(ts).map_err(|e| {
                EventError::invalid_payload(format!("invalid timestamp '{ts}': {e}"))
            })?;
            event.timestamp = parsed.with_timezone(&Utc);
        }

        Ok(event)
    }

    /// Returns the event id.
    #[must_use]
    pub const fn id(&self) -> &EventId {
        &self.id
    }

    /// Returns the dotted event name, e.g. `github.push`.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the source.
    #[must_use]
    pub const fn source(&self) -> &Source {
        &self.source
    }

    /// Returns when the event happened.
    #[must_use]
    pub const fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Returns the payload data.
    #[must_use]
    pub const fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Returns the ingestion metadata.
    #[must_use]
    pub const fn metadata(&self) -> &EventMetadata {
        &self.metadata
    }

    /// Returns the event type: the name without its `<source>.` prefix.
    ///
    /// Remaining dots become underscores, so `jira.issue.updated` yields
    /// `issue_updated`.
    #[must_use]
    pub fn event_type(&self) -> String {
        let prefix = format!("{}.", self.source.as_str());
        let bare = self.name.strip_prefix(&prefix).unwrap_or(&self.name);
        bare.replace('.', "_")
    }
}

fn required_string(envelope: &Map<String, Value>, field: &str) -> EventResult<String> {
    match envelope.get(field).and_then(Value::as_str) {
        Some(s) if !s.trim().is_empty() => Ok(s.to_string()),
        _ => Err(EventError::invalid_payload(format!(
            "missing required field '{field}'"
        ))),
    }
}

/// An unparsed webhook delivery as handed over by the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    /// The request body, untrusted.
    pub payload: String,
    /// The declared source string.
    pub source: String,
    /// The provider's event type header, if any (e.g. `X-GitHub-Event`).
    pub event_type: Option<String>,
    /// The provider's delivery id, if any.
    pub delivery_id: Option<String>,
    /// When the boundary received the request.
    pub received_at: DateTime<Utc>,
}

impl RawEvent {
    /// Creates a raw event received now.
    pub fn new(payload: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            source: source.into(),
            event_type: None,
            delivery_id: None,
            received_at: Utc::now(),
        }
    }

    /// Sets the declared event type.
    #[must_use]
    pub fn with_event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    /// Sets the delivery id.
    #[must_use]
    pub fn with_delivery_id(mut self, delivery_id: impl Into<String>) -> Self {
        self.delivery_id = Some(delivery_id.into());
        self
    }
}

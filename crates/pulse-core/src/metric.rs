//! Metric types: observations produced by classification and the bucketed
//! aggregates persisted by storage.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{RepositoryError, RepositoryResult};
use crate::event::Source;

/// Value used for any dimension whose source data is missing.
pub const UNKNOWN: &str = "unknown";

/// A validated, dotted metric name such as `github.push_count`.
///
/// Metric names must:
/// - Be non-empty
/// - Start with a letter or underscore
/// - Contain only alphanumerics, `_`, `.`, `:` and `-`
/// - Be at most 256 characters long
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MetricName(String);

impl MetricName {
    /// Maximum allowed length for a metric name.
    pub const MAX_LENGTH: usize = 256;

    /// Creates a new validated metric name.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Validation` if the name is invalid.
    pub fn new(name: impl Into<String>) -> RepositoryResult<Self> {
        let name = name.into();

        if name.is_empty() {
            return Err(RepositoryError::validation(
                "name",
                "metric name cannot be empty",
            ));
        }

        if name.len() > Self::MAX_LENGTH {
            return Err(RepositoryError::validation(
                "name",
                format!(
                    "metric name exceeds maximum length of {} characters",
                    Self::MAX_LENGTH
                ),
            ));
        }

        if let Some(c) = name.chars().next() {
            if !c.is_ascii_alphabetic() && c != '_' {
                return Err(RepositoryError::validation(
                    "name",
                    "metric name must start with a letter or underscore",
                ));
            }
        }

        if let Some(c) = name.chars().find(|c| !Self::is_allowed(*c)) {
            return Err(RepositoryError::validation(
                "name",
                format!("invalid character '{c}' in metric name"),
            ));
        }

        Ok(Self(name))
    }

    /// Builds a valid name from arbitrary input by replacing disallowed
    /// characters with `_`. Never fails.
    #[must_use]
    pub fn sanitized(raw: &str) -> Self {
        let mut name: String = raw
            .chars()
            .map(|c| if Self::is_allowed(c) { c } else { '_' })
            .collect();

        match name.chars().next() {
            None => name.push_str(UNKNOWN),
            Some(c) if !c.is_ascii_alphabetic() && c != '_' => name.insert(0, '_'),
            Some(_) => {}
        }

        if name.len() > Self::MAX_LENGTH {
            name.truncate(Self::MAX_LENGTH);
        }

        Self(name)
    }

    const fn is_allowed(c: char) -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | ':' | '-')
    }

    /// Returns the metric name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the name contains `needle`, ignoring ASCII case.
    #[must_use]
    pub fn contains_ignore_case(&self, needle: &str) -> bool {
        self.0
            .to_ascii_lowercase()
            .contains(&needle.to_ascii_lowercase())
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for MetricName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for MetricName {
    type Error = RepositoryError;

    fn try_from(value: String) -> RepositoryResult<Self> {
        Self::new(value)
    }
}

impl From<MetricName> for String {
    fn from(name: MetricName) -> Self {
        name.0
    }
}

/// Dimension name to value mapping.
///
/// Ordered so that two sets with the same entries hash, compare and
/// serialize identically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Dimensions(BTreeMap<String, String>);

impl Dimensions {
    /// Creates an empty dimension set.
    #[must_use]
    pub fn new() -> Self {
        Self(BTreeMap::new())
    }

    /// Inserts a dimension, replacing any previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    /// Inserts a dimension, falling back to [`UNKNOWN`] for missing or
    /// blank values.
    pub fn insert_or_unknown(&mut self, key: impl Into<String>, value: Option<&str>) {
        let value = value
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .unwrap_or(UNKNOWN);
        self.0.insert(key.into(), value.to_string());
    }

    /// Adds a dimension and returns self for chaining.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Returns the value for a dimension.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Returns true if the dimension is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterates dimensions in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Returns the dimension names in key order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Returns the number of dimensions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no dimensions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Dimensions {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// A single metric data point produced by classification, not yet aggregated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricObservation {
    /// Metric name.
    pub name: MetricName,
    /// Observed value, usually a count.
    pub value: f64,
    /// Dimensions for grouping.
    pub dimensions: Dimensions,
}

impl MetricObservation {
    /// Creates an observation.
    #[must_use]
    pub const fn new(name: MetricName, value: f64, dimensions: Dimensions) -> Self {
        Self {
            name,
            value,
            dimensions,
        }
    }

    /// Returns the series this observation contributes to.
    #[must_use]
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(self.name.clone(), self.dimensions.clone())
    }
}

/// Time bucket width for aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    /// 5-minute buckets.
    FiveMinutes,
    /// 1-hour buckets.
    Hourly,
    /// UTC calendar-day buckets.
    Daily,
}

impl Granularity {
    /// Returns the bucket width in seconds.
    #[must_use]
    pub const fn seconds(&self) -> i64 {
        match self {
            Self::FiveMinutes => 300,
            Self::Hourly => 3_600,
            Self::Daily => 86_400,
        }
    }

    /// Returns the granularity as a string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::FiveMinutes => "five_minutes",
            Self::Hourly => "hourly",
            Self::Daily => "daily",
        }
    }

    /// Returns the start of the bucket containing `timestamp`.
    #[must_use]
    pub fn bucket_start(&self, timestamp: DateTime<Utc>) -> DateTime<Utc> {
        let secs = timestamp.timestamp();
        let start = secs - secs.rem_euclid(self.seconds());
        DateTime::<Utc>::from_timestamp(start, 0).unwrap_or(timestamp)
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Identifies a metric series: a name plus one dimension combination.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    /// Metric name.
    pub name: MetricName,
    /// Dimension combination.
    pub dimensions: Dimensions,
}

impl SeriesKey {
    /// Creates a series key.
    #[must_use]
    pub const fn new(name: MetricName, dimensions: Dimensions) -> Self {
        Self { name, dimensions }
    }
}

/// Identifies one aggregate row: a series in one time bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKey {
    /// The series.
    pub series: SeriesKey,
    /// The bucket width.
    pub granularity: Granularity,
    /// Inclusive bucket start.
    pub bucket_start: DateTime<Utc>,
}

impl BucketKey {
    /// Creates the bucket key for `series` covering `timestamp`.
    #[must_use]
    pub fn for_timestamp(
        series: SeriesKey,
        granularity: Granularity,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            series,
            granularity,
            bucket_start: granularity.bucket_start(timestamp),
        }
    }
}

/// Persisted metric identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricId(String);

impl MetricId {
    /// Wraps an existing identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a fresh identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the identifier is unset.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A persisted, bucketed aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metric {
    /// Identifier, empty until assigned by storage.
    pub id: MetricId,
    /// Metric name.
    pub name: MetricName,
    /// Aggregated value. Always finite once stored.
    pub value: f64,
    /// The source the observations came from.
    pub source: Source,
    /// Scalar dimensions.
    pub dimensions: Dimensions,
    /// Bucket width.
    pub granularity: Granularity,
    /// Bucket start.
    pub recorded_at: DateTime<Utc>,
}

impl Metric {
    /// Creates an unsaved metric for the given bucket.
    #[must_use]
    pub fn new(bucket: &BucketKey, source: Source, value: f64) -> Self {
        Self {
            id: MetricId::new(""),
            name: bucket.series.name.clone(),
            value,
            source,
            dimensions: bucket.series.dimensions.clone(),
            granularity: bucket.granularity,
            recorded_at: bucket.bucket_start,
        }
    }

    /// Returns the series this metric belongs to.
    #[must_use]
    pub fn series_key(&self) -> SeriesKey {
        SeriesKey::new(self.name.clone(), self.dimensions.clone())
    }

    /// Returns the bucket this metric covers.
    #[must_use]
    pub fn bucket_key(&self) -> BucketKey {
        BucketKey {
            series: self.series_key(),
            granularity: self.granularity,
            bucket_start: self.recorded_at,
        }
    }

    /// Checks the metric invariants.
    ///
    /// # Errors
    ///
    /// Returns `RepositoryError::Validation` if the value is not finite.
    pub fn validate(&self) -> RepositoryResult<()> {
        if !self.value.is_finite() {
            return Err(RepositoryError::validation(
                "value",
                format!("metric value must be finite, got {}", self.value),
            ));
        }
        Ok(())
    }
}

/// An additive update to one bucket, guarded by a dedup key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricIncrement {
    /// The bucket to update.
    pub bucket: BucketKey,
    /// Source recorded on a newly created row.
    pub source: Source,
    /// Amount to add.
    pub delta: f64,
    /// Stable key for this contribution; a repeated key is a no-op.
    pub dedup_key: String,
}

/// What happened when an increment was applied.
#[derive(Debug, Clone, PartialEq)]
pub enum IncrementOutcome {
    /// The delta was added. Holds the updated row.
    Applied(Metric),
    /// The dedup key was already recorded for this bucket. Holds the
    /// unchanged row.
    Duplicate(Metric),
}

impl IncrementOutcome {
    /// Returns the row after the operation.
    #[must_use]
    pub const fn metric(&self) -> &Metric {
        match self {
            Self::Applied(m) | Self::Duplicate(m) => m,
        }
    }

    /// Consumes the outcome and returns the row.
    #[must_use]
    pub fn into_metric(self) -> Metric {
        match self {
            Self::Applied(m) | Self::Duplicate(m) => m,
        }
    }

    /// Returns true if the delta was added.
    #[must_use]
    pub const fn is_applied(&self) -> bool {
        matches!(self, Self::Applied(_))
    }
}

//! In-memory [`MetricCache`] with per-entry expiry.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use pulse_core::{Dimensions, Metric, MetricCache, MetricName};

/// Cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// How long an entry stays valid, in seconds.
    pub ttl_secs: u64,
    /// Upper bound on cached entries.
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_entries: 10_000,
        }
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: f64,
    recorded_at: DateTime<Utc>,
    inserted_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
}

impl CacheEntry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Thread-safe metric value cache.
///
/// Each series holds the value of its newest bucket; caching an older bucket
/// does not replace a live entry for a newer one. Entries expire after the
/// configured TTL. When full, expired entries are evicted first, then the
/// oldest.
#[derive(Debug, Default)]
pub struct InMemoryMetricCache {
    entries: RwLock<HashMap<(MetricName, Dimensions), CacheEntry>>,
    config: CacheConfig,
}

impl InMemoryMetricCache {
    /// Creates a cache with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a cache with the given configuration.
    #[must_use]
    pub fn with_config(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Returns the number of entries, expired ones included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn expiry(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        i64::try_from(self.config.ttl_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .and_then(|ttl| now.checked_add_signed(ttl))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn make_room(entries: &mut HashMap<(MetricName, Dimensions), CacheEntry>, max: usize, now: DateTime<Utc>) {
        if entries.len() < max {
            return;
        }
        entries.retain(|_, entry| !entry.is_expired(now));
        while entries.len() >= max {
            let Some(oldest) = entries
                .iter()
                .min_by_key(|(_, entry)| entry.inserted_at)
                .map(|(key, _)| key.clone())
            else {
                break;
            };
            entries.remove(&oldest);
        }
    }
}

impl MetricCache for InMemoryMetricCache {
    fn cache_metric(&self, metric: &Metric) {
        if self.config.max_entries == 0 {
            return;
        }
        let now = Utc::now();
        let entry = CacheEntry {
            value: metric.value,
            recorded_at: metric.recorded_at,
            inserted_at: now,
            expires_at: self.expiry(now),
        };
        let key = (metric.name.clone(), metric.dimensions.clone());

        let mut entries = self.entries.write();
        match entries.get(&key) {
            Some(current)
                if !current.is_expired(now) && current.recorded_at > metric.recorded_at =>
            {
                debug!(
                    metric = %metric.name,
                    bucket = %metric.recorded_at,
                    cached_bucket = %current.recorded_at,
                    "ignoring older bucket for cache"
                );
                return;
            }
            Some(_) => {}
            None => Self::make_room(&mut entries, self.config.max_entries, now),
        }
        entries.insert(key, entry);
    }

    fn get_cached_metric(&self, name: &MetricName, dimensions: &Dimensions) -> Option<f64> {
        let key = (name.clone(), dimensions.clone());
        let entries = self.entries.read();
        let entry = entries.get(&key)?;
        if entry.is_expired(Utc::now()) {
            debug!(metric = %name, "cached metric expired");
            return None;
        }
        Some(entry.value)
    }

    fn clear_metric_cache(&self) {
        self.entries.write().clear();
    }
}

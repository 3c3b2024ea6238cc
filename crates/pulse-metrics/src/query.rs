//! Read-side helpers: trailing statistics and cache-first lookups.

use std::sync::Arc;

use pulse_core::{
    Dimensions, Granularity, MetricCache, MetricName, RepositoryResult, SeriesKey, Storage,
};
use tracing::debug;

/// Mean and spread of a trailing window of values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrailingStats {
    /// Arithmetic mean.
    pub mean: f64,
    /// Sample standard deviation.
    pub std_dev: f64,
    /// Number of values in the window.
    pub samples: usize,
}

impl TrailingStats {
    /// Returns `mean + sigmas * std_dev`.
    #[must_use]
    pub fn upper_bound(&self, sigmas: f64) -> f64 {
        sigmas.mul_add(self.std_dev, self.mean)
    }
}

/// Computes trailing statistics, ignoring non-finite values.
///
/// Returns `None` for an empty window. A single value has zero spread.
#[must_use]
pub fn trailing_stats(values: &[f64]) -> Option<TrailingStats> {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }

    let n = finite.len() as f64;
    let mean = finite.iter().sum::<f64>() / n;
    let std_dev = if finite.len() < 2 {
        0.0
    } else {
        let variance = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        variance.sqrt()
    };

    Some(TrailingStats {
        mean,
        std_dev,
        samples: finite.len(),
    })
}

/// Looks up current metric values, consulting the cache before storage.
pub struct MetricReader {
    storage: Arc<dyn Storage>,
    cache: Option<Arc<dyn MetricCache>>,
    granularity: Granularity,
}

impl std::fmt::Debug for MetricReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricReader")
            .field("cache", &self.cache.is_some())
            .field("granularity", &self.granularity)
            .finish_non_exhaustive()
    }
}

impl MetricReader {
    /// Creates a reader over the five-minute series.
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self {
            storage,
            cache: None,
            granularity: Granularity::FiveMinutes,
        }
    }

    /// Consults `cache` before storage.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<dyn MetricCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Reads a different granularity.
    #[must_use]
    pub const fn with_granularity(mut self, granularity: Granularity) -> Self {
        self.granularity = granularity;
        self
    }

    /// Returns the most recent value of a series.
    ///
    /// A cache miss falls through to storage and the result is cached.
    /// `Ok(None)` means the series has no rows.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn latest_value(
        &self,
        name: &MetricName,
        dimensions: &Dimensions,
    ) -> RepositoryResult<Option<f64>> {
        if let Some(value) = self
            .cache
            .as_ref()
            .and_then(|cache| cache.get_cached_metric(name, dimensions))
        {
            return Ok(Some(value));
        }

        debug!(metric = %name, "metric cache miss");
        let series = SeriesKey::new(name.clone(), dimensions.clone());
        let Some(latest) = self
            .storage
            .metric_history(&series, self.granularity, 1)?
            .into_iter()
            .next()
        else {
            return Ok(None);
        };

        if let Some(cache) = &self.cache {
            cache.cache_metric(&latest);
        }
        Ok(Some(latest.value))
    }

    /// Returns up to `window` values preceding the newest row of a series,
    /// oldest first. The newest row itself is excluded.
    ///
    /// # Errors
    ///
    /// Returns storage errors.
    pub fn trailing_values(&self, series: &SeriesKey, window: usize) -> RepositoryResult<Vec<f64>> {
        let mut values: Vec<f64> = self
            .storage
            .metric_history(series, self.granularity, window + 1)?
            .into_iter()
            .skip(1)
            .map(|m| m.value)
            .collect();
        values.reverse();
        Ok(values)
    }
}

//! Threshold policies keyed by metric-name pattern.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use pulse_core::{AlertSeverity, MetricName};
use pulse_metrics::TrailingStats;

use crate::error::{AlertError, Result};

/// How the threshold for a metric is decided.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ThresholdPolicy {
    /// A fixed threshold.
    Static {
        /// Values strictly above this trigger an alert.
        threshold: f64,
    },
    /// `mean + sigmas * std_dev` over the series' trailing buckets.
    Statistical {
        /// Standard deviations above the trailing mean.
        sigmas: f64,
        /// Number of trailing buckets to read.
        window: usize,
        /// Fewer samples than this means no verdict.
        min_samples: usize,
    },
}

impl ThresholdPolicy {
    /// Creates a static policy.
    #[must_use]
    pub const fn fixed(threshold: f64) -> Self {
        Self::Static { threshold }
    }

    /// Returns the threshold for a statistical policy given trailing stats.
    ///
    /// `None` when there are too few samples, or when called on a static
    /// policy with no stats needed.
    #[must_use]
    pub fn threshold(&self, stats: Option<&TrailingStats>) -> Option<f64> {
        match self {
            Self::Static { threshold } => Some(*threshold),
            Self::Statistical {
                sigmas,
                min_samples,
                ..
            } => stats
                .filter(|s| s.samples >= *min_samples)
                .map(|s| s.upper_bound(*sigmas)),
        }
    }

    /// Returns the trailing window this policy needs, zero for static.
    #[must_use]
    pub const fn window(&self) -> usize {
        match self {
            Self::Static { .. } => 0,
            Self::Statistical { window, .. } => *window,
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            Self::Static { threshold } if !threshold.is_finite() => Err(AlertError::InvalidPolicy {
                reason: format!("static threshold must be finite, got {threshold}"),
            }),
            Self::Statistical { sigmas, .. } if !sigmas.is_finite() || *sigmas < 0.0 => {
                Err(AlertError::InvalidPolicy {
                    reason: format!("sigmas must be a non-negative number, got {sigmas}"),
                })
            }
            Self::Statistical {
                window,
                min_samples,
                ..
            } if *min_samples == 0 || min_samples > window => Err(AlertError::InvalidPolicy {
                reason: format!(
                    "min_samples must be between 1 and window ({window}), got {min_samples}"
                ),
            }),
            _ => Ok(()),
        }
    }
}

/// Associates a name pattern with a policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRule {
    /// Regular expression matched anywhere in the metric name,
    /// case-insensitively.
    pub pattern: String,
    /// The policy applied to matching metrics.
    pub policy: ThresholdPolicy,
}

impl PolicyRule {
    /// Creates a rule.
    #[must_use]
    pub fn new(pattern: impl Into<String>, policy: ThresholdPolicy) -> Self {
        Self {
            pattern: pattern.into(),
            policy,
        }
    }
}

/// Detection settings: ordered rules, a fallback policy and the severity
/// boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Rules checked in order; the first match wins.
    pub rules: Vec<PolicyRule>,
    /// Policy for metrics no rule matches.
    pub default_policy: ThresholdPolicy,
    /// Values at or above `threshold * critical_multiplier` are critical.
    pub critical_multiplier: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            rules: vec![
                PolicyRule::new("cpu", ThresholdPolicy::fixed(80.0)),
                PolicyRule::new("memory", ThresholdPolicy::fixed(75.0)),
            ],
            default_policy: ThresholdPolicy::Statistical {
                sigmas: 3.0,
                window: 12,
                min_samples: 5,
            },
            critical_multiplier: 2.0,
        }
    }
}

#[derive(Debug, Clone)]
struct CompiledRule {
    regex: Regex,
    policy: ThresholdPolicy,
}

/// Compiled, validated policy lookup.
#[derive(Debug, Clone)]
pub struct PolicySet {
    rules: Vec<CompiledRule>,
    default_policy: ThresholdPolicy,
    critical_multiplier: f64,
}

impl PolicySet {
    /// Compiles and validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns `AlertError::InvalidPattern` for a bad regex and
    /// `AlertError::InvalidPolicy` for out-of-range numbers.
    pub fn compile(config: &DetectionConfig) -> Result<Self> {
        if !config.critical_multiplier.is_finite() || config.critical_multiplier <= 1.0 {
            return Err(AlertError::InvalidPolicy {
                reason: format!(
                    "critical_multiplier must be greater than 1, got {}",
                    config.critical_multiplier
                ),
            });
        }
        config.default_policy.validate()?;

        let rules = config
            .rules
            .iter()
            .map(|rule| {
                rule.policy.validate()?;
                let regex = RegexBuilder::new(&rule.pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| AlertError::InvalidPattern {
                        pattern: rule.pattern.clone(),
                        reason: e.to_string(),
                    })?;
                Ok(CompiledRule {
                    regex,
                    policy: rule.policy.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rules,
            default_policy: config.default_policy.clone(),
            critical_multiplier: config.critical_multiplier,
        })
    }

    /// Returns the policy that applies to `name`.
    #[must_use]
    pub fn policy_for(&self, name: &MetricName) -> &ThresholdPolicy {
        self.rules
            .iter()
            .find(|rule| rule.regex.is_match(name.as_str()))
            .map_or(&self.default_policy, |rule| &rule.policy)
    }

    /// Returns the severity for `value` against `threshold`, or `None` when
    /// the value does not exceed it.
    ///
    /// Exceeding is strict: a value equal to the threshold is not an alert.
    /// Critical requires a positive threshold; otherwise the ratio carries no
    /// meaning and the alert is a warning.
    #[must_use]
    pub fn severity(&self, value: f64, threshold: f64) -> Option<AlertSeverity> {
        if !value.is_finite() || !threshold.is_finite() || value <= threshold {
            return None;
        }
        if threshold > 0.0 && value >= threshold * self.critical_multiplier {
            Some(AlertSeverity::Critical)
        } else {
            Some(AlertSeverity::Warning)
        }
    }
}

impl Default for PolicySet {
    fn default() -> Self {
        let config = DetectionConfig::default();
        Self::compile(&config).unwrap_or(Self {
            rules: Vec::new(),
            default_policy: config.default_policy,
            critical_multiplier: config.critical_multiplier,
        })
    }
}

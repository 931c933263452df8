//! Estimator configuration.
//!
//! A [`KdeConfig`] can only be obtained through [`KdeConfigBuilder::build`]
//! (or [`KdeConfig::default`]), so every value that reaches the engine has
//! already been validated.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const DEFAULT_LOW_BANDWIDTH: f64 = 0.01;
const DEFAULT_HIGH_BANDWIDTH: f64 = 100.0;
const DEFAULT_BANDWIDTH_COUNT: usize = 10;
const DEFAULT_EPSILON: f64 = 0.05;
const DEFAULT_DELTA: f64 = 0.05;
const DEFAULT_PRIORITY_CEILING: f64 = 1.0e12;
const DEFAULT_LEAF_SIZE: usize = 20;

/// How candidate bandwidths are spread over `[low, high]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum BandwidthSpacing {
    /// Evenly spaced: `low + i * (high - low) / (count - 1)`.
    #[default]
    Linear,
    /// Evenly spaced in log space: `low * (high / low)^(i / (count - 1))`.
    Geometric,
}

/// Validated configuration for [`DualTreeKde`](crate::DualTreeKde).
///
/// # Examples
///
/// ```
/// use dualtree_kde::KdeConfig;
///
/// let config = KdeConfig::builder()
///     .bandwidth_range(0.1, 2.0)
///     .bandwidth_count(8)
///     .epsilon(0.01)
///     .build()
///     .unwrap();
///
/// assert_eq!(config.bandwidth_count(), 8);
/// assert_eq!(config.bandwidths().len(), 8);
/// ```
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KdeConfig {
    low_bandwidth: f64,
    high_bandwidth: f64,
    bandwidth_count: usize,
    spacing: BandwidthSpacing,
    epsilon: f64,
    delta: f64,
    priority_ceiling: f64,
    leaf_size: usize,
}

impl KdeConfig {
    /// Returns a builder pre-filled with the default settings.
    #[must_use]
    pub fn builder() -> KdeConfigBuilder {
        KdeConfigBuilder::new()
    }

    /// Smallest candidate bandwidth.
    #[must_use]
    pub fn low_bandwidth(&self) -> f64 {
        self.low_bandwidth
    }

    /// Upper end of the candidate range. Unused when only one candidate is
    /// requested.
    #[must_use]
    pub fn high_bandwidth(&self) -> f64 {
        self.high_bandwidth
    }

    /// Number of candidate bandwidths.
    #[must_use]
    pub fn bandwidth_count(&self) -> usize {
        self.bandwidth_count
    }

    /// Spacing of the candidates.
    #[must_use]
    pub fn spacing(&self) -> BandwidthSpacing {
        self.spacing
    }

    /// Per-level relative-error target on the log-likelihood bound.
    #[must_use]
    pub fn epsilon(&self) -> f64 {
        self.epsilon
    }

    /// Per-node-pair relative tolerance for accepting an approximation.
    #[must_use]
    pub fn delta(&self) -> f64 {
        self.delta
    }

    /// Priority at or above which a pair is no longer approximated.
    #[must_use]
    pub fn priority_ceiling(&self) -> f64 {
        self.priority_ceiling
    }

    /// Leaf capacity of the kd-trees built by the point-set entry points.
    #[must_use]
    pub fn leaf_size(&self) -> usize {
        self.leaf_size
    }

    /// Returns the candidate bandwidths in increasing order.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn bandwidths(&self) -> Vec<f64> {
        if self.bandwidth_count == 1 {
            return vec![self.low_bandwidth];
        }

        let steps = (self.bandwidth_count - 1) as f64;
        (0..self.bandwidth_count)
            .map(|i| {
                let t = i as f64 / steps;
                match self.spacing {
                    BandwidthSpacing::Linear => {
                        self.low_bandwidth + (self.high_bandwidth - self.low_bandwidth) * t
                    }
                    BandwidthSpacing::Geometric => {
                        self.low_bandwidth * (self.high_bandwidth / self.low_bandwidth).powf(t)
                    }
                }
            })
            .collect()
    }
}

impl Default for KdeConfig {
    fn default() -> Self {
        Self {
            low_bandwidth: DEFAULT_LOW_BANDWIDTH,
            high_bandwidth: DEFAULT_HIGH_BANDWIDTH,
            bandwidth_count: DEFAULT_BANDWIDTH_COUNT,
            spacing: BandwidthSpacing::Linear,
            epsilon: DEFAULT_EPSILON,
            delta: DEFAULT_DELTA,
            priority_ceiling: DEFAULT_PRIORITY_CEILING,
            leaf_size: DEFAULT_LEAF_SIZE,
        }
    }
}

/// Builder for [`KdeConfig`].
///
/// Setters store raw values; all validation happens in [`build`](Self::build).
///
/// Default settings:
/// - bandwidth range: `[0.01, 100.0]`
/// - bandwidth count: 10, linearly spaced
/// - epsilon: 0.05
/// - delta: 0.05
/// - priority ceiling: `1e12`
/// - leaf size: 20
#[derive(Debug, Clone)]
pub struct KdeConfigBuilder {
    config: KdeConfig,
}

impl KdeConfigBuilder {
    /// Creates a builder with the default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: KdeConfig::default(),
        }
    }

    /// Sets the candidate bandwidth range.
    ///
    /// Both ends must be positive and `high` must exceed `low`; otherwise
    /// [`build`](Self::build) returns [`Error::InvalidBandwidthRange`].
    #[must_use]
    pub fn bandwidth_range(mut self, low: f64, high: f64) -> Self {
        self.config.low_bandwidth = low;
        self.config.high_bandwidth = high;
        self
    }

    /// Sets the number of candidate bandwidths (at least one).
    #[must_use]
    pub fn bandwidth_count(mut self, count: usize) -> Self {
        self.config.bandwidth_count = count;
        self
    }

    /// Sets the spacing of the candidates.
    #[must_use]
    pub fn spacing(mut self, spacing: BandwidthSpacing) -> Self {
        self.config.spacing = spacing;
        self
    }

    /// Sets the per-level relative-error target.
    #[must_use]
    pub fn epsilon(mut self, epsilon: f64) -> Self {
        self.config.epsilon = epsilon;
        self
    }

    /// Sets the per-node-pair approximation tolerance.
    #[must_use]
    pub fn delta(mut self, delta: f64) -> Self {
        self.config.delta = delta;
        self
    }

    /// Sets the priority ceiling.
    ///
    /// Pairs whose bounding volumes are at least this far apart are never
    /// approximated, and re-enqueued pairs are boosted by this amount.
    #[must_use]
    pub fn priority_ceiling(mut self, ceiling: f64) -> Self {
        self.config.priority_ceiling = ceiling;
        self
    }

    /// Sets the kd-tree leaf capacity.
    #[must_use]
    pub fn leaf_size(mut self, leaf_size: usize) -> Self {
        self.config.leaf_size = leaf_size;
        self
    }

    /// Validates the settings and builds the [`KdeConfig`].
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidBandwidthRange` if `low <= 0` or `high <= low`,
    /// whatever the bandwidth count.
    /// Returns `Error::InvalidBandwidthCount` if the count is zero.
    /// Returns `Error::InvalidEpsilon`, `Error::InvalidDelta` or
    /// `Error::InvalidPriorityCeiling` for non-positive or non-finite tolerances.
    /// Returns `Error::InvalidLeafSize` if the leaf size is zero.
    pub fn build(self) -> Result<KdeConfig> {
        let config = self.config;

        if config.bandwidth_count == 0 {
            return Err(Error::InvalidBandwidthCount);
        }

        let (low, high) = (config.low_bandwidth, config.high_bandwidth);
        let valid_range =
            low.is_finite() && low > f64::EPSILON && high.is_finite() && high > low + f64::EPSILON;
        if !valid_range {
            return Err(Error::InvalidBandwidthRange { low, high });
        }

        if !positive_finite(config.epsilon) {
            return Err(Error::InvalidEpsilon(config.epsilon));
        }
        if !positive_finite(config.delta) {
            return Err(Error::InvalidDelta(config.delta));
        }
        if !positive_finite(config.priority_ceiling) {
            return Err(Error::InvalidPriorityCeiling(config.priority_ceiling));
        }
        if config.leaf_size == 0 {
            return Err(Error::InvalidLeafSize);
        }

        Ok(config)
    }
}

impl Default for KdeConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn positive_finite(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

//! The estimator facade and the traversal behind it.
//!
//! - `queue` - Min-priority work queue of node pairs
//! - `traversal` - Step-by-step dual-tree traversal
//! - `base_case` - Exact leaf-pair evaluation

mod base_case;
mod queue;
mod traversal;

pub use traversal::TraversalStats;
pub(crate) use traversal::Outcome;

use traversal::Traversal;

use crate::config::KdeConfig;
use crate::error::{Error, Result};
use crate::kernel::{GaussianKernel, Kernel};
use crate::selector::{KdeResult, select};
use crate::tree::{KdTree, PartitionTree};

/// Multi-bandwidth kernel density estimator.
///
/// Evaluates every candidate bandwidth of its [`KdeConfig`] in a single
/// dual-tree traversal and selects the one with the largest log-likelihood
/// of the query points.
///
/// # Examples
///
/// ```
/// use dualtree_kde::{DualTreeKde, KdeConfig};
///
/// let config = KdeConfig::builder()
///     .bandwidth_range(0.25, 2.0)
///     .bandwidth_count(4)
///     .delta(1e-3)
///     .build()
///     .unwrap();
/// let kde = DualTreeKde::new(config);
///
/// let points: Vec<Vec<f64>> = (0..50).map(|i| vec![f64::from(i) * 0.1]).collect();
/// let result = kde.estimate_self(&points).unwrap();
///
/// assert_eq!(result.densities.len(), 50);
/// assert!(result.densities.iter().all(|&d| d > 0.0));
/// ```
#[derive(Clone, Debug)]
pub struct DualTreeKde<K = GaussianKernel> {
    config: KdeConfig,
    kernel: K,
}

impl DualTreeKde<GaussianKernel> {
    /// Creates an estimator using the unit-width Gaussian kernel.
    #[must_use]
    pub fn new(config: KdeConfig) -> Self {
        Self {
            config,
            kernel: GaussianKernel::default(),
        }
    }
}

impl<K: Kernel> DualTreeKde<K> {
    /// Creates an estimator with a custom kernel.
    #[must_use]
    pub fn with_kernel(config: KdeConfig, kernel: K) -> Self {
        Self { config, kernel }
    }

    /// Returns the estimator configuration.
    #[must_use]
    pub fn config(&self) -> &KdeConfig {
        &self.config
    }

    /// Returns the kernel.
    #[must_use]
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Estimates the density of `query` points against `reference` points.
    ///
    /// Both sets are indexed with a [`KdTree`] using the configured leaf size.
    ///
    /// # Errors
    ///
    /// Returns `Error::ZeroDimensions` or `Error::DimensionMismatch` for
    /// malformed point sets, `Error::TreeDimensionMismatch` if the two sets
    /// live in different spaces, and `Error::NoSolution` if either set is
    /// empty or no bandwidth could be certified.
    pub fn estimate(&self, reference: &[Vec<f64>], query: &[Vec<f64>]) -> Result<KdeResult> {
        let reference_tree = KdTree::build(reference, self.config.leaf_size())?;
        let query_tree = KdTree::build(query, self.config.leaf_size())?;
        self.estimate_trees(&query_tree, &reference_tree)
    }

    /// Estimates the density of `points` against themselves, using one tree
    /// in both roles.
    ///
    /// # Errors
    ///
    /// See [`estimate`](Self::estimate).
    pub fn estimate_self(&self, points: &[Vec<f64>]) -> Result<KdeResult> {
        let tree = KdTree::build(points, self.config.leaf_size())?;
        self.estimate_trees(&tree, &tree)
    }

    /// Estimates densities over prebuilt trees.
    ///
    /// Densities are reported in the original order of the query points, as
    /// recorded by the query tree's permutation.
    ///
    /// # Errors
    ///
    /// Returns `Error::NoSolution` if either tree is empty or no bandwidth
    /// could be certified, `Error::TreeDimensionMismatch` if the trees
    /// disagree on dimension, and `Error::MalformedTree` if either tree is
    /// not a strict binary partition.
    pub fn estimate_trees<T: PartitionTree>(&self, query: &T, reference: &T) -> Result<KdeResult> {
        if query.point_count() == 0 || reference.point_count() == 0 {
            trace_info!(
                query_points = query.point_count(),
                reference_points = reference.point_count(),
                "empty point set, nothing to estimate"
            );
            return Err(Error::NoSolution);
        }
        if query.dimension() != reference.dimension() {
            return Err(Error::TreeDimensionMismatch {
                query: query.dimension(),
                reference: reference.dimension(),
            });
        }

        let outcome = Traversal::new(&self.kernel, &self.config, query, reference)?.run()?;
        select(outcome, &self.kernel, query, reference.point_count())
    }
}

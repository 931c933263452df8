//! Bandwidth selection and density assembly from a finished traversal.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::bounds::Interval;
use crate::engine::{Outcome, TraversalStats};
use crate::error::{Error, Result};
use crate::kernel::Kernel;
use crate::tree::PartitionTree;

/// Per-candidate outcome of an estimate.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BandwidthEstimate {
    /// The candidate bandwidth.
    pub bandwidth: f64,
    /// Tree level whose log-likelihood bound certified this bandwidth, if any.
    pub resolved_level: Option<usize>,
    /// Bound on the normalized log-likelihood of the query set at the
    /// resolved level.
    pub log_likelihood: Option<Interval>,
}

/// The selected bandwidth and the densities it produces.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct KdeResult {
    /// Density estimate at every query point, in input order.
    pub densities: Vec<f64>,
    /// The bandwidth with the largest estimated log-likelihood.
    pub bandwidth: f64,
    /// Index of [`bandwidth`](Self::bandwidth) among the candidates.
    pub bandwidth_index: usize,
    /// Estimated log-likelihood of the query set under the selected bandwidth.
    pub log_likelihood: f64,
    /// Level at which the traversal stopped early, `None` if the work queue
    /// was drained.
    pub converged_level: Option<usize>,
    /// Every candidate, in increasing bandwidth order.
    pub candidates: Vec<BandwidthEstimate>,
    /// Work counters of the traversal.
    pub stats: TraversalStats,
}

/// Picks the resolved bandwidth with the largest log-likelihood midpoint and
/// assembles the densities of `query` under it.
///
/// Ties go to the smaller bandwidth.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn select<K: Kernel, T: PartitionTree>(
    outcome: Outcome,
    kernel: &K,
    query: &T,
    reference_count: usize,
) -> Result<KdeResult> {
    let Outcome {
        bandwidths,
        store,
        stats,
        converged_level,
    } = outcome;

    let normalizer = kernel.normalizer(query.dimension());
    // the level tables hold sum ln(S(q) / R); normalizing shifts every
    // candidate by the same constant
    let offset = query.point_count() as f64 * normalizer.ln();

    let mut best: Option<(usize, f64)> = None;
    let mut candidates = Vec::with_capacity(bandwidths.len());
    for b in 0..bandwidths.len() {
        let resolved_level = bandwidths.resolved_level(b);
        let bound = resolved_level.map(|level| store.level(level, b));
        if let Some(bound) = bound {
            let estimate = bound.midpoint();
            if !estimate.is_nan() && best.is_none_or(|(_, top)| estimate > top) {
                best = Some((b, estimate));
            }
        }
        candidates.push(BandwidthEstimate {
            bandwidth: bandwidths.value(b),
            resolved_level,
            log_likelihood: bound.map(|bound| Interval::new(bound.lower - offset, bound.upper - offset)),
        });
    }

    let Some((index, estimate)) = best else {
        trace_info!("no candidate bandwidth resolved");
        return Err(Error::NoSolution);
    };

    let scale = normalizer * reference_count as f64;
    let mut densities = vec![0.0; query.point_count()];
    for (position, &original) in query.permutation().iter().enumerate() {
        densities[original] = store.point(position, index).midpoint() / scale;
    }

    let log_likelihood = estimate - offset;
    trace_info!(
        bandwidth = bandwidths.value(index),
        log_likelihood,
        "bandwidth selected"
    );

    Ok(KdeResult {
        densities,
        bandwidth: bandwidths.value(index),
        bandwidth_index: index,
        log_likelihood,
        converged_level,
        candidates,
        stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bandwidth::BandwidthSet;
    use crate::bounds::{BoundStore, NodeLayout};
    use crate::kernel::GaussianKernel;
    use crate::tree::KdTree;

    fn outcome(tree: &KdTree, values: &[f64], resolved: &[Option<usize>]) -> Outcome {
        let mut bandwidths = BandwidthSet::new(values.to_vec(), tree.dimension());
        let store = BoundStore::new(
            NodeLayout::new(tree).unwrap(),
            tree.point_count(),
            tree.point_count(),
            &bandwidths,
            1.0,
        );
        for (b, level) in resolved.iter().enumerate() {
            if let Some(level) = level {
                bandwidths.mark_resolved(b, *level);
            }
        }
        Outcome {
            bandwidths,
            store,
            stats: TraversalStats::default(),
            converged_level: None,
        }
    }

    fn pair() -> KdTree {
        KdTree::build(&[vec![0.0], vec![1.0]], 4).unwrap()
    }

    #[test]
    fn test_no_resolved_bandwidth_is_no_solution() {
        let tree = pair();
        let result = select(outcome(&tree, &[1.0, 2.0], &[None, None]), &GaussianKernel::default(), &tree, 2);
        assert!(matches!(result, Err(Error::NoSolution)));
    }

    #[test]
    fn test_unresolved_candidates_are_reported() {
        let tree = pair();
        let result = select(outcome(&tree, &[1.0, 2.0], &[None, Some(0)]), &GaussianKernel::default(), &tree, 2).unwrap();
        assert_eq!(result.bandwidth_index, 1);
        assert!((result.bandwidth - 2.0).abs() < f64::EPSILON);
        assert_eq!(result.candidates.len(), 2);
        assert!(result.candidates[0].resolved_level.is_none());
        assert!(result.candidates[0].log_likelihood.is_none());
        assert_eq!(result.candidates[1].resolved_level, Some(0));
        assert_eq!(result.densities.len(), 2);
    }

    #[test]
    fn test_largest_midpoint_wins() {
        // seeded upper bounds scale with 1/h, so the smaller bandwidth has
        // the larger midpoint
        let tree = pair();
        let result = select(outcome(&tree, &[1.0, 2.0], &[Some(0), Some(0)]), &GaussianKernel::default(), &tree, 2).unwrap();
        assert_eq!(result.bandwidth_index, 0);
        let reported = result.candidates[0].log_likelihood.unwrap().midpoint();
        assert!((reported - result.log_likelihood).abs() < 1e-12);
    }

    #[test]
    fn test_ties_go_to_smaller_bandwidth() {
        let tree = pair();
        let result = select(outcome(&tree, &[1.5, 1.5, 1.5], &[None, Some(0), Some(0)]), &GaussianKernel::default(), &tree, 2).unwrap();
        assert_eq!(result.bandwidth_index, 1);
    }

    #[test]
    fn test_log_likelihood_is_normalized() {
        let tree = pair();
        let kernel = GaussianKernel::default();
        let result = select(outcome(&tree, &[1.0], &[Some(0)]), &kernel, &tree, 2).unwrap();
        // seeded bounds: lower 2 ln(EPS), upper 2 ln(peak)
        let raw = f64::midpoint(2.0 * f64::EPSILON.ln(), 0.0);
        assert!((result.log_likelihood - (raw - 2.0 * kernel.normalizer(1).ln())).abs() < 1e-9);
    }
}

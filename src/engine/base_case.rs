//! Exact evaluation of a (query leaf, reference leaf) pair.

use crate::bandwidth::{ActiveRange, BandwidthSet};
use crate::bounds::{BoundStore, Interval};
use crate::kernel::Kernel;
use crate::tree::{NodeId, PartitionTree, euclidean_distance};

/// Everything a leaf pair evaluation reads, borrowed from the traversal.
pub(crate) struct BaseCase<'a, K, T> {
    pub(crate) kernel: &'a K,
    pub(crate) query: &'a T,
    pub(crate) reference: &'a T,
    pub(crate) bandwidths: &'a BandwidthSet,
}

impl<K: Kernel, T: PartitionTree> BaseCase<'_, K, T> {
    /// Replaces the placeholder mass of `reference_node` in every point of
    /// `query_node` with its exact kernel contributions, then tightens the
    /// query leaf's bound from its points.
    ///
    /// Bandwidths are walked from the largest down. For kernels that decay
    /// with bandwidth, once a contribution is negligible and no larger than
    /// the one before it, the smaller bandwidths are not evaluated and only
    /// widen their upper bound by that contribution.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn evaluate(
        &self,
        store: &mut BoundStore,
        query_node: NodeId,
        reference_node: NodeId,
        range: ActiveRange,
    ) {
        let early_exit = self.kernel.decays_with_bandwidth();
        let peak = self.kernel.peak();
        let mass = self.reference.count(reference_node) as f64;
        let references = self.reference.begin(reference_node)..self.reference.end(reference_node);

        for q in self.query.begin(query_node)..self.query.end(query_node) {
            let query_point = self.query.point(q);

            for r in references.clone() {
                let distance = euclidean_distance(query_point, self.reference.point(r));
                let mut previous = f64::NEG_INFINITY;
                for b in range.indices().rev() {
                    let contribution =
                        self.bandwidths.scale(b) * self.kernel.evaluate(distance * self.bandwidths.inverse(b));
                    // only past the peak do smaller bandwidths contribute less
                    if early_exit && contribution <= f64::EPSILON && contribution <= previous {
                        for skipped in range.low()..=b {
                            store.add_to_point(q, skipped, Interval::new(0.0, contribution));
                        }
                        break;
                    }
                    store.add_to_point(q, b, Interval::exact(contribution));
                    previous = contribution;
                }
            }

            for b in range.indices() {
                let placeholder = mass * self.bandwidths.scale(b) * peak;
                store.add_to_point(q, b, Interval::new(0.0, -placeholder));
            }
        }

        for b in range.indices() {
            store.refresh_node_from_points(query_node, b);
        }
    }
}

//! The multi-bandwidth dual-tree traversal.
//!
//! Node pairs are drained from a priority queue, nearest first. Each popped
//! pair goes through the same steps:
//!
//! 1. **Stop test**: if every bandwidth still active for the pair has a
//!    level log-likelihood bound within `epsilon`, those bandwidths are
//!    resolved at the pair's level and the whole traversal ends.
//! 2. **Winnow**: bandwidths at either end of the active range whose level
//!    bound already meets `epsilon` are resolved and dropped.
//! 3. **Approximate** (pairs below the priority ceiling): the contribution
//!    of the whole reference node is bounded from the node distances. If
//!    the bound is within `delta` for every active bandwidth, it is applied
//!    and the pair is re-queued behind every unboosted pair. Otherwise the
//!    bandwidths that passed at either end keep their approximation and
//!    leave the range.
//! 4. **Revert** (re-queued pairs): the approximation applied earlier is
//!    backed out so the pair can be refined.
//! 5. **Recurse**: leaf pairs are evaluated exactly; other pairs are split
//!    into child pairs.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use super::base_case::BaseCase;
use super::queue::{WorkItem, WorkQueue};
use crate::bandwidth::{ActiveRange, BandwidthSet};
use crate::bounds::{BoundStore, Interval, NodeLayout};
use crate::config::KdeConfig;
use crate::error::Result;
use crate::kernel::Kernel;
use crate::tree::{BoundingVolume, NodeId, PartitionTree, children, validate_shape};

/// Counters describing how much work a traversal did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TraversalStats {
    /// Node pairs popped from the queue.
    pub pairs_visited: u64,
    /// Per-bandwidth node approximations applied.
    pub approximations: u64,
    /// Re-queued pairs whose approximation was backed out.
    pub reverts: u64,
    /// Leaf pairs evaluated exactly.
    pub base_cases: u64,
    /// Pairs expanded into child pairs.
    pub splits: u64,
    /// Largest number of pairs waiting in the queue at once.
    pub peak_queue_len: usize,
}

/// What a single [`Traversal::step`] did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Step {
    /// A pair was processed; more work may remain.
    Continue,
    /// Every active bandwidth of a pair met `epsilon` at this level.
    Converged(usize),
    /// The queue is empty.
    Drained,
}

/// Final state of a finished traversal.
pub(crate) struct Outcome {
    pub(crate) bandwidths: BandwidthSet,
    pub(crate) store: BoundStore,
    pub(crate) stats: TraversalStats,
    pub(crate) converged_level: Option<usize>,
}

pub(crate) struct Traversal<'a, K, T> {
    kernel: &'a K,
    config: &'a KdeConfig,
    query: &'a T,
    reference: &'a T,
    bandwidths: BandwidthSet,
    store: BoundStore,
    queue: WorkQueue,
    stats: TraversalStats,
}

impl<'a, K: Kernel, T: PartitionTree> Traversal<'a, K, T> {
    /// Allocates the bound tables and seeds the queue with the root pair.
    ///
    /// Both trees must hold at least one point.
    pub(crate) fn new(kernel: &'a K, config: &'a KdeConfig, query: &'a T, reference: &'a T) -> Result<Self> {
        let layout = NodeLayout::new(query)?;
        validate_shape(reference)?;

        let bandwidths = BandwidthSet::new(config.bandwidths(), query.dimension());
        let store = BoundStore::new(
            layout,
            query.point_count(),
            reference.point_count(),
            &bandwidths,
            kernel.peak(),
        );

        let mut traversal = Self {
            kernel,
            config,
            query,
            reference,
            bandwidths,
            store,
            queue: WorkQueue::default(),
            stats: TraversalStats::default(),
        };
        let range = ActiveRange::full(traversal.bandwidths.len());
        traversal.push_pair(query.root(), reference.root(), 0, range);
        Ok(traversal)
    }

    /// Drains the queue until global convergence, exhaustion, or every
    /// bandwidth is resolved.
    pub(crate) fn run(mut self) -> Result<Outcome> {
        trace_info!(
            query_points = self.query.point_count(),
            reference_points = self.reference.point_count(),
            query_nodes = self.query.node_count(),
            levels = self.store.levels(),
            bandwidths = self.bandwidths.len(),
            "dual-tree traversal started"
        );

        let mut converged_level = None;
        loop {
            match self.step()? {
                Step::Continue if self.bandwidths.all_resolved() => break,
                Step::Continue => {}
                Step::Converged(level) => {
                    converged_level = Some(level);
                    break;
                }
                Step::Drained => break,
            }
        }

        self.stats.peak_queue_len = self.queue.peak_len();
        trace_info!(
            pairs = self.stats.pairs_visited,
            approximations = self.stats.approximations,
            base_cases = self.stats.base_cases,
            resolved = self.bandwidths.resolved_count(),
            "dual-tree traversal finished"
        );

        Ok(Outcome {
            bandwidths: self.bandwidths,
            store: self.store,
            stats: self.stats,
            converged_level,
        })
    }

    /// Processes the next pair in the queue.
    pub(crate) fn step(&mut self) -> Result<Step> {
        let Some(mut item) = self.queue.pop() else {
            self.resolve_drained();
            trace_debug!("work queue drained");
            return Ok(Step::Drained);
        };
        self.stats.pairs_visited += 1;

        if item.range.is_empty() {
            return Ok(Step::Continue);
        }
        let level = item.level;

        if item.range.indices().all(|b| self.converged(level, b)) {
            for b in item.range.indices() {
                self.bandwidths.mark_resolved(b, level);
            }
            trace_info!(level, "level log-likelihood bound converged");
            return Ok(Step::Converged(level));
        }

        let store = &self.store;
        let bandwidths = &mut self.bandwidths;
        let epsilon = self.config.epsilon();
        item.range.trim_while(
            |b| store.level(level, b).relative_spread() < epsilon,
            |b| {
                bandwidths.mark_resolved(b, level);
            },
        );

        if item.priority < self.config.priority_ceiling() {
            match self.approximate(item) {
                Some(descend) => item = descend,
                None => return Ok(Step::Continue),
            }
        } else {
            self.revert(&mut item);
        }

        if !item.range.is_empty() {
            self.expand(&item)?;
        }
        Ok(Step::Continue)
    }

    fn converged(&self, level: usize, b: usize) -> bool {
        self.store.level(level, b).relative_spread() < self.config.epsilon()
    }

    /// Tries to bound the whole reference node's contribution at once.
    ///
    /// Returns `None` when the pair was approximated for every active
    /// bandwidth and re-queued, otherwise the pair narrowed to the
    /// bandwidths that still need refinement.
    #[allow(clippy::cast_precision_loss)]
    fn approximate(&mut self, mut item: WorkItem) -> Option<WorkItem> {
        let (q, r) = (item.query, item.reference);
        let query_bound = self.query.bound(q);
        let reference_bound = self.reference.bound(r);
        let d_min = query_bound.min_distance(reference_bound);
        let d_max = query_bound.max_distance(reference_bound);
        let mass = self.reference.count(r) as f64;
        let peak = self.kernel.peak();
        let tolerance = self.config.delta();

        let proposals: Vec<(Interval, bool)> = item
            .range
            .indices()
            .map(|b| {
                let inverse = self.bandwidths.inverse(b);
                let scale = mass * self.bandwidths.scale(b);
                let lower = scale * self.kernel.evaluate(d_max * inverse);
                let upper = scale * self.kernel.evaluate(d_min * inverse);
                let denominator = self.store.node(q, b).lower + lower;
                let passes = denominator > 0.0 && (upper - lower) / denominator < tolerance;
                // the upper delta replaces the placeholder mass of the node
                (Interval::new(lower, upper - scale * peak), passes)
            })
            .collect();
        let offset = item.range.low();

        if proposals.iter().all(|&(_, passes)| passes) {
            let mut applied = vec![Interval::ZERO; self.bandwidths.len()];
            for (b, &(delta, _)) in item.range.indices().zip(&proposals) {
                self.store.apply_node_delta(q, b, delta);
                applied[b] = delta;
            }
            self.stats.approximations += proposals.len() as u64;
            item.applied = Some(applied);
            item.priority += self.config.priority_ceiling();
            self.queue.push(item);
            return None;
        }

        let before = item.range;
        item.range.trim_while(|b| proposals[b - offset].1, |_| {});
        for b in before.indices().filter(|&b| !item.range.contains(b)) {
            self.store.apply_node_delta(q, b, proposals[b - offset].0);
            self.stats.approximations += 1;
        }
        Some(item)
    }

    /// Backs out the approximation a re-queued pair applied.
    ///
    /// Bandwidths winnowed away since then keep it: they are resolved.
    fn revert(&mut self, item: &mut WorkItem) {
        if let Some(applied) = item.applied.take() {
            for b in item.range.indices() {
                self.store.apply_node_delta(item.query, b, -applied[b]);
            }
            self.stats.reverts += 1;
        }
    }

    fn expand(&mut self, item: &WorkItem) -> Result<()> {
        let query_children = children(self.query, item.query)?;
        let reference_children = children(self.reference, item.reference)?;
        let (level, range) = (item.level, item.range);

        match (query_children, reference_children) {
            (None, None) => {
                self.stats.base_cases += 1;
                let base_case = BaseCase {
                    kernel: self.kernel,
                    query: self.query,
                    reference: self.reference,
                    bandwidths: &self.bandwidths,
                };
                base_case.evaluate(&mut self.store, item.query, item.reference, range);
                return Ok(());
            }
            (Some((q_left, q_right)), Some((r_left, r_right))) => {
                for (q, r) in [
                    (q_left, r_left),
                    (q_left, r_right),
                    (q_right, r_left),
                    (q_right, r_right),
                ] {
                    self.push_pair(q, r, level + 1, range);
                }
            }
            (Some((q_left, q_right)), None) => {
                self.push_pair(q_left, item.reference, level + 1, range);
                self.push_pair(q_right, item.reference, level + 1, range);
            }
            // the query node stays, so does its level
            (None, Some((r_left, r_right))) => {
                self.push_pair(item.query, r_left, level, range);
                self.push_pair(item.query, r_right, level, range);
            }
        }
        self.stats.splits += 1;
        Ok(())
    }

    fn push_pair(&mut self, query: NodeId, reference: NodeId, level: usize, range: ActiveRange) {
        debug_assert_eq!(self.store.layout().depth(query), level);
        let priority = self
            .query
            .bound(query)
            .min_distance(self.reference.bound(reference));
        self.queue.push(WorkItem::new(query, reference, level, range, priority));
    }

    /// Resolves every bandwidth that some level certifies once the queue is
    /// empty, at the shallowest such level.
    ///
    /// Bandwidths no level certifies stay unresolved.
    fn resolve_drained(&mut self) {
        let levels = self.store.levels();
        for b in 0..self.bandwidths.len() {
            if self.bandwidths.is_resolved(b) {
                continue;
            }
            if let Some(level) = (0..levels).find(|&v| self.converged(v, b)) {
                self.bandwidths.mark_resolved(b, level);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn store(&self) -> &BoundStore {
        &self.store
    }

    #[cfg(test)]
    pub(crate) fn stats(&self) -> TraversalStats {
        self.stats
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.queue.len()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::kernel::GaussianKernel;
    use crate::tree::{KdTree, euclidean_distance};

    pub(crate) fn random_points(rng: &mut fastrand::Rng, n: usize, dim: usize, offset: f64) -> Vec<Vec<f64>> {
        (0..n)
            .map(|_| (0..dim).map(|_| offset + rng.f64() * 2.0).collect())
            .collect()
    }

    /// Unnormalized kernel sums in query-tree order, one row per query point.
    pub(crate) fn brute_sums<K: Kernel>(
        kernel: &K,
        query: &KdTree,
        reference: &KdTree,
        bandwidths: &[f64],
    ) -> Vec<Vec<f64>> {
        let dim = i32::try_from(query.dimension()).unwrap();
        (0..query.point_count())
            .map(|q| {
                bandwidths
                    .iter()
                    .map(|h| {
                        let w = 1.0 / h;
                        (0..reference.point_count())
                            .map(|r| {
                                let d = euclidean_distance(query.point(q), reference.point(r));
                                w.powi(dim) * kernel.evaluate(d * w)
                            })
                            .sum()
                    })
                    .collect()
            })
            .collect()
    }

    fn tol(x: f64) -> f64 {
        1e-9 * (1.0 + x.abs())
    }

    fn check_invariants(store: &BoundStore, truth: &[Vec<f64>], n_bandwidths: usize) {
        let layout = store.layout();
        for b in 0..n_bandwidths {
            for (q, row) in truth.iter().enumerate() {
                let bound = store.point(q, b);
                assert!(bound.lower <= row[b] + tol(row[b]), "lower {} > truth {}", bound.lower, row[b]);
                assert!(bound.upper >= row[b] - tol(row[b]), "upper {} < truth {}", bound.upper, row[b]);
            }

            for node in 0..layout.node_count() {
                let node_bound = store.node(node, b);
                for q in layout.points(node) {
                    let point = store.point(q, b);
                    assert!(node_bound.lower <= point.lower + tol(point.lower));
                    assert!(node_bound.upper >= point.upper - tol(point.upper));
                }
            }

            for v in 1..store.levels() {
                let shallow = store.level(v - 1, b);
                let deep = store.level(v, b);
                assert!(deep.lower >= shallow.lower - tol(shallow.lower));
                assert!(deep.upper <= shallow.upper + tol(shallow.upper));
                assert!(deep.width() <= shallow.width() + tol(shallow.width()));
            }
        }
    }

    fn config(epsilon: f64, delta: f64) -> KdeConfig {
        KdeConfig::builder()
            .bandwidth_range(0.1, 1.2)
            .bandwidth_count(5)
            .epsilon(epsilon)
            .delta(delta)
            .build()
            .unwrap()
    }

    #[test]
    fn test_bounds_sound_at_every_step() {
        let mut rng = fastrand::Rng::with_seed(7);
        let query_points = random_points(&mut rng, 40, 2, 0.0);
        let reference_points = random_points(&mut rng, 50, 2, 0.0);
        let query = KdTree::build(&query_points, 3).unwrap();
        let reference = KdTree::build(&reference_points, 3).unwrap();
        let kernel = GaussianKernel::default();
        let config = config(1e-6, 0.2);
        let truth = brute_sums(&kernel, &query, &reference, &config.bandwidths());

        let mut traversal = Traversal::new(&kernel, &config, &query, &reference).unwrap();
        check_invariants(traversal.store(), &truth, 5);
        let mut steps = 0;
        while traversal.step().unwrap() == Step::Continue {
            check_invariants(traversal.store(), &truth, 5);
            steps += 1;
        }
        check_invariants(traversal.store(), &truth, 5);
        assert!(steps > 10);
    }

    #[test]
    fn test_separated_clusters_are_approximated() {
        let mut rng = fastrand::Rng::with_seed(11);
        let mut query_points = random_points(&mut rng, 30, 2, 0.0);
        query_points.extend(random_points(&mut rng, 30, 2, 40.0));
        let reference_points = query_points.clone();
        let query = KdTree::build(&query_points, 4).unwrap();
        let reference = KdTree::build(&reference_points, 4).unwrap();
        let kernel = GaussianKernel::default();
        let config = config(1e-6, 0.05);
        let truth = brute_sums(&kernel, &query, &reference, &config.bandwidths());

        let mut traversal = Traversal::new(&kernel, &config, &query, &reference).unwrap();
        while traversal.step().unwrap() == Step::Continue {}
        check_invariants(traversal.store(), &truth, 5);

        let stats = traversal.stats();
        assert!(stats.approximations > 0);
        assert!(stats.base_cases > 0);
        assert!(stats.splits > 0);
        assert_eq!(traversal.pending(), 0);
    }

    #[test]
    fn test_exact_traversal_certifies_every_bandwidth() {
        let mut rng = fastrand::Rng::with_seed(3);
        let points = random_points(&mut rng, 25, 3, 0.0);
        let tree = KdTree::build(&points, 5).unwrap();
        let kernel = GaussianKernel::default();
        let config = config(1e-6, 1e-12);

        let outcome = Traversal::new(&kernel, &config, &tree, &tree)
            .unwrap()
            .run()
            .unwrap();
        for b in 0..5 {
            let level = outcome.bandwidths.resolved_level(b).unwrap();
            assert!(outcome.store.level(level, b).relative_spread() < 1e-6);
        }
        assert!(outcome.stats.base_cases > 0);
    }

    #[test]
    fn test_drained_traversal_only_resolves_certified_levels() {
        let mut rng = fastrand::Rng::with_seed(17);
        let points: Vec<Vec<f64>> = (0..400).map(|_| vec![rng.f64(), rng.f64()]).collect();
        let tree = KdTree::build(&points, 20).unwrap();
        let kernel = GaussianKernel::default();
        let config = KdeConfig::builder()
            .bandwidth_range(0.05, 1.0)
            .bandwidth_count(6)
            .build()
            .unwrap();

        let outcome = Traversal::new(&kernel, &config, &tree, &tree)
            .unwrap()
            .run()
            .unwrap();
        for b in 0..6 {
            if let Some(level) = outcome.bandwidths.resolved_level(b) {
                let spread = outcome.store.level(level, b).relative_spread();
                assert!(spread < config.epsilon(), "bandwidth {b} resolved with spread {spread}");
            }
        }
    }

    #[test]
    fn test_drain_without_certified_level_has_no_solution() {
        let mut rng = fastrand::Rng::with_seed(19);
        let points = random_points(&mut rng, 30, 2, 0.0);
        let tree = KdTree::build(&points, 4).unwrap();
        let kernel = GaussianKernel::default();
        let config = config(0.05, 0.05);

        let mut traversal = Traversal::new(&kernel, &config, &tree, &tree).unwrap();
        // nothing visited: every level still holds the seeded bounds
        traversal.queue = WorkQueue::default();
        assert_eq!(traversal.step().unwrap(), Step::Drained);
        for b in 0..5 {
            assert!(!traversal.bandwidths.is_resolved(b));
        }

        let outcome = traversal.run().unwrap();
        assert!(outcome.converged_level.is_none());
        let result = crate::selector::select(outcome, &kernel, &tree, tree.point_count());
        assert!(matches!(result, Err(crate::error::Error::NoSolution)));
    }

    #[test]
    fn test_loose_epsilon_converges_early() {
        let mut rng = fastrand::Rng::with_seed(5);
        // spread out so every per-point log-density is well away from zero
        let points: Vec<Vec<f64>> = random_points(&mut rng, 64, 2, 0.0)
            .into_iter()
            .map(|p| p.into_iter().map(|x| 5.0 * x).collect())
            .collect();
        let tree = KdTree::build(&points, 2).unwrap();
        let kernel = GaussianKernel::default();
        let loose = KdeConfig::builder()
            .bandwidth_range(0.5, 1.0)
            .bandwidth_count(2)
            .epsilon(0.9)
            .delta(0.5)
            .build()
            .unwrap();

        let outcome = Traversal::new(&kernel, &loose, &tree, &tree)
            .unwrap()
            .run()
            .unwrap();
        assert!(outcome.bandwidths.resolved_count() > 0);
        // every resolved level must satisfy the target
        for b in 0..2 {
            if let Some(level) = outcome.bandwidths.resolved_level(b) {
                assert!(outcome.store.level(level, b).relative_spread() < 0.9);
            }
        }
    }
}

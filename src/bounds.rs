//! Dense lower/upper bound tables of the multi-bandwidth traversal.
//!
//! Three tables are kept, one column per candidate bandwidth:
//!
//! - per query point: bounds on the unnormalized kernel sum `S(q)`
//! - per query-tree node: bounds valid for every point of the node
//! - per query-tree level: bounds on `sum_q ln(S(q) / R)`, tallied over the
//!   nodes of that level
//!
//! The store owns no traversal logic. Its job is to keep the three tables
//! consistent: every change to a node bound is mirrored into the level
//! tables through a log-sum update, and a node delta reaches the node's
//! points and all its descendants. Internal nodes enter the level tally as
//! `|n| * ln(bound / R)`; leaves enter it with the sum over their points,
//! so a leaf whose points are known exactly contributes an exact share.

use core::ops::{Add, Neg, Range, RangeInclusive};

use nalgebra::DMatrix;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::bandwidth::BandwidthSet;
use crate::error::{Error, Result};
use crate::tree::{NodeId, PartitionTree, children, validate_shape};

/// A closed interval `[lower, upper]`.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Interval {
    /// Lower end.
    pub lower: f64,
    /// Upper end.
    pub upper: f64,
}

impl Interval {
    /// The empty delta `[0, 0]`.
    pub const ZERO: Self = Self {
        lower: 0.0,
        upper: 0.0,
    };

    /// Creates an interval from its ends.
    #[must_use]
    pub fn new(lower: f64, upper: f64) -> Self {
        Self { lower, upper }
    }

    /// The degenerate interval `[value, value]`.
    #[must_use]
    pub fn exact(value: f64) -> Self {
        Self {
            lower: value,
            upper: value,
        }
    }

    /// Midpoint of the interval.
    #[must_use]
    pub fn midpoint(self) -> f64 {
        f64::midpoint(self.lower, self.upper)
    }

    /// Width `upper - lower`.
    #[must_use]
    pub fn width(self) -> f64 {
        self.upper - self.lower
    }

    /// Width relative to the magnitude of the lower end, `|u - l| / |l|`.
    ///
    /// Infinite when the lower end is zero.
    #[must_use]
    pub fn relative_spread(self) -> f64 {
        let denominator = self.lower.abs();
        if denominator == 0.0 {
            return f64::INFINITY;
        }
        (self.upper - self.lower).abs() / denominator
    }
}

impl Add for Interval {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            lower: self.lower + rhs.lower,
            upper: self.upper + rhs.upper,
        }
    }
}

impl Neg for Interval {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            lower: -self.lower,
            upper: -self.upper,
        }
    }
}

#[derive(Clone, Debug)]
struct NodeInfo {
    points: Range<usize>,
    depth: usize,
    leaf: bool,
    /// Deepest level the node is tallied in: its own depth for internal
    /// nodes, the last level of the tree for leaves.
    last_level: usize,
    /// Positions of the node's subtree in `NodeLayout::preorder`.
    subtree: Range<usize>,
}

/// Depth, point range and subtree of every query-tree node, flattened once
/// per estimate so the bound tables can be indexed by node id.
#[derive(Clone, Debug)]
pub(crate) struct NodeLayout {
    nodes: Vec<NodeInfo>,
    preorder: Vec<NodeId>,
    levels: usize,
}

impl NodeLayout {
    /// Flattens `tree`, checking that it is a strict binary partition.
    pub(crate) fn new<T: PartitionTree>(tree: &T) -> Result<Self> {
        validate_shape(tree)?;

        let levels = tree.levels();
        let placeholder = NodeInfo {
            points: 0..0,
            depth: 0,
            leaf: true,
            last_level: 0,
            subtree: 0..0,
        };
        let mut nodes = vec![placeholder; tree.node_count()];
        let mut preorder = Vec::with_capacity(tree.node_count());

        // (node, depth, children already expanded)
        let mut stack = vec![(tree.root(), 0usize, false)];
        while let Some((node, depth, expanded)) = stack.pop() {
            if expanded {
                nodes[node].subtree.end = preorder.len();
                continue;
            }

            let kids = children(tree, node)?;
            nodes[node] = NodeInfo {
                points: tree.begin(node)..tree.end(node),
                depth,
                leaf: kids.is_none(),
                last_level: if kids.is_some() { depth } else { levels - 1 },
                subtree: preorder.len()..preorder.len(),
            };
            preorder.push(node);

            stack.push((node, depth, true));
            if let Some((left, right)) = kids {
                stack.push((right, depth + 1, false));
                stack.push((left, depth + 1, false));
            }
        }

        if preorder.is_empty() {
            return Err(Error::MalformedTree { node: tree.root() });
        }

        Ok(Self {
            nodes,
            preorder,
            levels,
        })
    }

    pub(crate) fn levels(&self) -> usize {
        self.levels
    }

    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub(crate) fn points(&self, node: NodeId) -> Range<usize> {
        self.nodes[node].points.clone()
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn weight(&self, node: NodeId) -> f64 {
        self.nodes[node].points.len() as f64
    }

    pub(crate) fn depth(&self, node: NodeId) -> usize {
        self.nodes[node].depth
    }

    pub(crate) fn is_leaf(&self, node: NodeId) -> bool {
        self.nodes[node].leaf
    }

    /// Levels whose tally includes `node`.
    pub(crate) fn tallied_levels(&self, node: NodeId) -> RangeInclusive<usize> {
        self.nodes[node].depth..=self.nodes[node].last_level
    }

    /// `node` followed by all of its descendants.
    #[cfg(test)]
    pub(crate) fn subtree(&self, node: NodeId) -> &[NodeId] {
        &self.preorder[self.nodes[node].subtree.clone()]
    }
}

/// Lower/upper bound tables for one estimate.
#[derive(Clone, Debug)]
pub(crate) struct BoundStore {
    layout: NodeLayout,
    reference_count: f64,
    point_lower: DMatrix<f64>,
    point_upper: DMatrix<f64>,
    node_lower: DMatrix<f64>,
    node_upper: DMatrix<f64>,
    level_lower: DMatrix<f64>,
    level_upper: DMatrix<f64>,
    /// Each node's current share of the levels it is tallied in.
    share_lower: DMatrix<f64>,
    share_upper: DMatrix<f64>,
}

impl BoundStore {
    /// Allocates the tables, seeded with the bounds of an unvisited
    /// reference set.
    ///
    /// Every reference point may contribute at most `scale * peak` to a
    /// query point, so upper bounds start at `R * scale * peak` and lower
    /// bounds at zero; the level tables hold the matching log-likelihood
    /// of the query set.
    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn new(
        layout: NodeLayout,
        query_count: usize,
        reference_count: usize,
        bandwidths: &BandwidthSet,
        peak: f64,
    ) -> Self {
        let reference_count = reference_count as f64;
        let n_bandwidths = bandwidths.len();
        let ceiling: Vec<f64> = (0..n_bandwidths)
            .map(|b| reference_count * bandwidths.scale(b) * peak)
            .collect();

        let mut store = Self {
            reference_count,
            point_lower: DMatrix::zeros(query_count, n_bandwidths),
            point_upper: DMatrix::from_fn(query_count, n_bandwidths, |_, b| ceiling[b]),
            node_lower: DMatrix::zeros(layout.node_count(), n_bandwidths),
            node_upper: DMatrix::from_fn(layout.node_count(), n_bandwidths, |_, b| ceiling[b]),
            level_lower: DMatrix::zeros(layout.levels(), n_bandwidths),
            level_upper: DMatrix::zeros(layout.levels(), n_bandwidths),
            share_lower: DMatrix::zeros(layout.node_count(), n_bandwidths),
            share_upper: DMatrix::zeros(layout.node_count(), n_bandwidths),
            layout,
        };

        let query_weight = query_count as f64;
        let floor = store.log_mass(0.0);
        for b in 0..n_bandwidths {
            let top = store.log_mass(ceiling[b]);
            for v in 0..store.layout.levels() {
                store.level_lower[(v, b)] = query_weight * floor;
                store.level_upper[(v, b)] = query_weight * top;
            }
            for node in 0..store.layout.node_count() {
                let weight = store.layout.weight(node);
                store.share_lower[(node, b)] = weight * floor;
                store.share_upper[(node, b)] = weight * top;
            }
        }
        store
    }

    pub(crate) fn layout(&self) -> &NodeLayout {
        &self.layout
    }

    pub(crate) fn levels(&self) -> usize {
        self.layout.levels()
    }

    pub(crate) fn point(&self, q: usize, b: usize) -> Interval {
        Interval::new(self.point_lower[(q, b)], self.point_upper[(q, b)])
    }

    pub(crate) fn node(&self, node: NodeId, b: usize) -> Interval {
        Interval::new(self.node_lower[(node, b)], self.node_upper[(node, b)])
    }

    pub(crate) fn level(&self, level: usize, b: usize) -> Interval {
        Interval::new(self.level_lower[(level, b)], self.level_upper[(level, b)])
    }

    /// Adds `delta` to a single point's bounds.
    pub(crate) fn add_to_point(&mut self, q: usize, b: usize, delta: Interval) {
        self.point_lower[(q, b)] += delta.lower;
        self.point_upper[(q, b)] += delta.upper;
    }

    /// Adds `delta` to every point of `node`, to `node` itself and to all of
    /// its descendants, retallying the affected levels.
    ///
    /// Applying `-delta` afterwards restores all three tables.
    pub(crate) fn apply_node_delta(&mut self, node: NodeId, b: usize, delta: Interval) {
        for q in self.layout.points(node) {
            self.add_to_point(q, b, delta);
        }
        let subtree = self.layout.nodes[node].subtree.clone();
        for position in subtree {
            let member = self.layout.preorder[position];
            let updated = self.node(member, b) + delta;
            self.set_node(member, b, updated);
        }
    }

    /// Overwrites the bound of `node` with the min/max over its points.
    pub(crate) fn refresh_node_from_points(&mut self, node: NodeId, b: usize) {
        let (lower, upper) = self.layout.points(node).fold(
            (f64::INFINITY, f64::NEG_INFINITY),
            |(lower, upper), q| {
                (
                    lower.min(self.point_lower[(q, b)]),
                    upper.max(self.point_upper[(q, b)]),
                )
            },
        );
        if lower <= upper {
            self.set_node(node, b, Interval::new(lower, upper));
        }
    }

    /// Replaces a node bound and retallies the node's share of the levels.
    fn set_node(&mut self, node: NodeId, b: usize, value: Interval) {
        self.node_lower[(node, b)] = value.lower;
        self.node_upper[(node, b)] = value.upper;
        self.retally(node, b);
    }

    /// Moves the node's share of every level it is tallied in from the
    /// cached value to one recomputed from the current bounds.
    fn retally(&mut self, node: NodeId, b: usize) {
        let share = self.share(node, b);
        let lower_shift = share.lower - self.share_lower[(node, b)];
        let upper_shift = share.upper - self.share_upper[(node, b)];
        for v in self.layout.tallied_levels(node) {
            self.level_lower[(v, b)] += lower_shift;
            self.level_upper[(v, b)] += upper_shift;
        }
        self.share_lower[(node, b)] = share.lower;
        self.share_upper[(node, b)] = share.upper;
    }

    /// `sum ln(bound / R)` over the node's points: per point for leaves,
    /// from the node bound otherwise.
    fn share(&self, node: NodeId, b: usize) -> Interval {
        if self.layout.is_leaf(node) {
            return self.layout.points(node).fold(Interval::ZERO, |total, q| {
                total
                    + Interval::new(
                        self.log_mass(self.point_lower[(q, b)]),
                        self.log_mass(self.point_upper[(q, b)]),
                    )
            });
        }
        let weight = self.layout.weight(node);
        Interval::new(
            weight * self.log_mass(self.node_lower[(node, b)]),
            weight * self.log_mass(self.node_upper[(node, b)]),
        )
    }

    /// `ln(value / R)`, clamped at `ln(EPSILON)` for negligible mass.
    fn log_mass(&self, value: f64) -> f64 {
        let ratio = value / self.reference_count;
        if ratio > f64::EPSILON {
            ratio.ln()
        } else {
            f64::EPSILON.ln()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::KdTree;

    fn store_for(points: &[Vec<f64>], leaf_size: usize, reference_count: usize) -> BoundStore {
        let tree = KdTree::build(points, leaf_size).unwrap();
        let layout = NodeLayout::new(&tree).unwrap();
        let bandwidths = BandwidthSet::new(vec![0.5, 1.0], 2);
        BoundStore::new(layout, points.len(), reference_count, &bandwidths, 1.0)
    }

    fn line(n: usize) -> Vec<Vec<f64>> {
        (0..n).map(|i| vec![i as f64, 0.0]).collect()
    }

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() <= 1e-9 * (1.0 + a.abs().max(b.abs())), "{a} != {b}");
    }

    #[test]
    fn test_interval_helpers() {
        let i = Interval::new(-2.0, -1.0);
        assert!((i.midpoint() + 1.5).abs() < f64::EPSILON);
        assert!((i.width() - 1.0).abs() < f64::EPSILON);
        assert!((i.relative_spread() - 0.5).abs() < f64::EPSILON);
        assert!(Interval::new(0.0, 1.0).relative_spread().is_infinite());
        assert_eq!(i + (-i), Interval::ZERO);
    }

    #[test]
    fn test_layout_subtrees_and_levels() {
        let tree = KdTree::build(&line(5), 1).unwrap();
        let layout = NodeLayout::new(&tree).unwrap();
        let root = tree.root();
        assert_eq!(layout.subtree(root).len(), tree.node_count());
        assert_eq!(layout.depth(root), 0);
        assert_eq!(layout.tallied_levels(root), 0..=0);
        for node in 0..tree.node_count() {
            if tree.is_leaf(node) {
                assert_eq!(*layout.tallied_levels(node).end(), tree.levels() - 1);
            }
        }
    }

    #[test]
    fn test_seeded_levels_match_node_tallies() {
        let store = store_for(&line(6), 1, 10);
        let reference: f64 = 10.0;
        let expected_upper = 6.0 * (reference * 4.0 / reference).ln();
        let expected_lower = 6.0 * f64::EPSILON.ln();
        for v in 0..store.levels() {
            assert_close(store.level(v, 0).upper, expected_upper);
            assert_close(store.level(v, 0).lower, expected_lower);
        }
        assert_close(store.point(3, 1).upper, 10.0);
        assert_close(store.node(0, 0).upper, 40.0);
    }

    #[test]
    fn test_apply_then_revert_restores_tables() {
        let mut store = store_for(&line(7), 2, 12);
        let before = store.clone();
        let delta = Interval::new(1.25, -3.5);

        store.apply_node_delta(1, 0, delta);
        assert!(store.point(store.layout().points(1).start, 0).lower > 0.0);
        store.apply_node_delta(1, 0, -delta);

        for q in 0..7 {
            assert_close(store.point(q, 0).lower, before.point(q, 0).lower);
            assert_close(store.point(q, 0).upper, before.point(q, 0).upper);
        }
        for n in 0..store.layout().node_count() {
            assert_close(store.node(n, 0).lower, before.node(n, 0).lower);
            assert_close(store.node(n, 0).upper, before.node(n, 0).upper);
        }
        for v in 0..store.levels() {
            assert_close(store.level(v, 0).lower, before.level(v, 0).lower);
            assert_close(store.level(v, 0).upper, before.level(v, 0).upper);
        }
    }

    #[test]
    fn test_delta_reaches_descendants_and_deeper_levels() {
        let mut store = store_for(&line(8), 1, 8);
        let root = 0;
        store.apply_node_delta(root, 1, Interval::new(2.0, -1.0));

        for &node in store.layout().subtree(root) {
            assert_close(store.node(node, 1).lower, 2.0);
            assert_close(store.node(node, 1).upper, 8.0 - 1.0);
        }
        // each level is a full partition, so all levels see the same tally
        let top = store.level(0, 1);
        for v in 1..store.levels() {
            assert_close(store.level(v, 1).lower, top.lower);
            assert_close(store.level(v, 1).upper, top.upper);
        }
        // the other bandwidth is untouched
        assert_close(store.node(root, 0).lower, 0.0);
    }

    #[test]
    fn test_refresh_tightens_leaf() {
        let mut store = store_for(&line(4), 4, 4);
        store.add_to_point(0, 0, Interval::new(1.0, -2.0));
        store.add_to_point(1, 0, Interval::new(3.0, -5.0));
        store.add_to_point(2, 0, Interval::new(2.0, -4.0));
        store.add_to_point(3, 0, Interval::new(4.0, -3.0));
        let level_before = store.level(0, 0);

        store.refresh_node_from_points(0, 0);

        assert_close(store.node(0, 0).lower, 1.0);
        assert_close(store.node(0, 0).upper, 16.0 - 2.0);
        let level_after = store.level(0, 0);
        assert!(level_after.lower > level_before.lower);
        assert!(level_after.upper < level_before.upper);
        // a leaf is tallied point by point, not by its min/max
        let expected_lower: f64 = [1.0f64, 3.0, 2.0, 4.0].iter().map(|x| (x / 4.0).ln()).sum();
        let expected_upper: f64 = [14.0f64, 11.0, 12.0, 13.0].iter().map(|x| (x / 4.0).ln()).sum();
        assert_close(level_after.lower, expected_lower);
        assert_close(level_after.upper, expected_upper);
    }

    #[test]
    fn test_exact_leaf_points_give_exact_levels() {
        let mut store = store_for(&line(6), 3, 6);
        let tree_levels = store.levels();
        let sums = [2.0, 3.0, 5.0, 7.0, 11.0, 13.0];
        for (q, &sum) in sums.iter().enumerate() {
            let seeded = store.point(q, 0);
            store.add_to_point(q, 0, Interval::new(sum - seeded.lower, sum - seeded.upper));
        }
        for node in 0..store.layout().node_count() {
            if store.layout().is_leaf(node) {
                store.refresh_node_from_points(node, 0);
            }
        }

        let truth: f64 = sums.iter().map(|s| (s / 6.0).ln()).sum();
        let deepest = store.level(tree_levels - 1, 0);
        assert_close(deepest.lower, truth);
        assert_close(deepest.upper, truth);
        assert!(deepest.relative_spread() < 1e-12);
    }
}

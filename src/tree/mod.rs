//! Binary space-partitioning trees consumed by the dual-tree traversal.
//!
//! The traversal only talks to trees through [`PartitionTree`], so any
//! binary partition with dense node ids and contiguous point ranges can be
//! plugged in. [`KdTree`] is the implementation used by the point-set entry
//! points of [`DualTreeKde`](crate::DualTreeKde).
//!
//! - [`rect`] - Axis-aligned bounding boxes
//! - [`kd`] - Median-split kd-tree

mod kd;
mod rect;

pub use kd::KdTree;
pub use rect::HRect;

use crate::error::{Error, Result};

/// Dense index of a node inside its tree's arena.
pub type NodeId = usize;

/// A bounding volume that supports distance queries against another volume
/// of the same kind.
pub trait BoundingVolume {
    /// Smallest Euclidean distance between any two points of the volumes.
    fn min_distance(&self, other: &Self) -> f64;

    /// Largest Euclidean distance between any two points of the volumes.
    fn max_distance(&self, other: &Self) -> f64;
}

/// A binary space-partitioning tree over a permuted point set.
///
/// Every node covers the contiguous range `begin(node)..end(node)` of the
/// permuted points. An internal node has exactly two children whose ranges
/// split its own; a leaf has none. Node ids are dense in `0..node_count()`
/// and are used directly as rows of the engine's node bound tables.
pub trait PartitionTree {
    /// Bounding volume attached to every node.
    type Bound: BoundingVolume;

    /// Id of the root node.
    fn root(&self) -> NodeId;

    /// Total number of nodes in the tree.
    fn node_count(&self) -> usize;

    /// Number of levels (the depth of the deepest node plus one).
    fn levels(&self) -> usize;

    /// Dimension of the points.
    fn dimension(&self) -> usize;

    /// First permuted point index covered by `node`.
    fn begin(&self, node: NodeId) -> usize;

    /// Number of points covered by `node`.
    fn count(&self, node: NodeId) -> usize;

    /// One past the last permuted point index covered by `node`.
    fn end(&self, node: NodeId) -> usize {
        self.begin(node) + self.count(node)
    }

    /// Left child of `node`, if any.
    fn left(&self, node: NodeId) -> Option<NodeId>;

    /// Right child of `node`, if any.
    fn right(&self, node: NodeId) -> Option<NodeId>;

    /// Whether `node` has no children.
    fn is_leaf(&self, node: NodeId) -> bool {
        self.left(node).is_none() && self.right(node).is_none()
    }

    /// Bounding volume of `node`.
    fn bound(&self, node: NodeId) -> &Self::Bound;

    /// Coordinates of the point at permuted position `index`.
    fn point(&self, index: usize) -> &[f64];

    /// Maps a permuted position to the point's index in the original input.
    fn permutation(&self) -> &[usize];

    /// Total number of points in the tree.
    fn point_count(&self) -> usize {
        self.count(self.root())
    }
}

/// Returns both children of `node`, `None` for a leaf.
///
/// # Errors
///
/// Returns `Error::MalformedTree` if the node has exactly one child.
pub(crate) fn children<T: PartitionTree>(tree: &T, node: NodeId) -> Result<Option<(NodeId, NodeId)>> {
    match (tree.left(node), tree.right(node)) {
        (Some(left), Some(right)) => Ok(Some((left, right))),
        (None, None) => Ok(None),
        _ => Err(Error::MalformedTree { node }),
    }
}

/// Checks that `tree` is a strict binary partition with consistent metadata.
///
/// The root must cover every permuted point and the permutation must map
/// each point to a distinct input index. Every reachable node must have
/// a dense id, a depth below `levels()`, zero or two children, and children
/// whose ranges split its own range.
///
/// # Errors
///
/// Returns `Error::MalformedTree` naming the first offending node.
pub fn validate_shape<T: PartitionTree>(tree: &T) -> Result<()> {
    let node_count = tree.node_count();
    let levels = tree.levels();
    let root = tree.root();
    if root >= node_count || tree.begin(root) != 0 || tree.end(root) != tree.permutation().len() {
        return Err(Error::MalformedTree { node: root });
    }

    let permutation = tree.permutation();
    let mut placed = vec![false; permutation.len()];
    for &original in permutation {
        if original >= placed.len() || placed[original] {
            return Err(Error::MalformedTree { node: root });
        }
        placed[original] = true;
    }

    let mut seen = vec![false; node_count];
    let mut stack = vec![(root, 0usize)];

    while let Some((node, depth)) = stack.pop() {
        if node >= node_count || seen[node] || depth >= levels {
            return Err(Error::MalformedTree { node });
        }
        seen[node] = true;

        if let Some((left, right)) = children(tree, node)? {
            if left >= node_count || right >= node_count {
                return Err(Error::MalformedTree { node });
            }
            let splits_range = tree.begin(left) == tree.begin(node)
                && tree.end(left) == tree.begin(right)
                && tree.end(right) == tree.end(node);
            if !splits_range {
                return Err(Error::MalformedTree { node });
            }
            stack.push((right, depth + 1));
            stack.push((left, depth + 1));
        }
    }

    Ok(())
}

/// Euclidean distance between two points of equal dimension.
#[inline]
pub(crate) fn euclidean_distance(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance() {
        assert!((euclidean_distance(&[0.0, 0.0], &[3.0, 4.0]) - 5.0).abs() < 1e-15);
        assert!(euclidean_distance(&[1.0], &[1.0]).abs() < f64::EPSILON);
    }

    #[test]
    fn test_children_of_built_tree() {
        let points: Vec<Vec<f64>> = (0..8).map(|i| vec![f64::from(i)]).collect();
        let tree = KdTree::build(&points, 1).unwrap();
        let root = tree.root();
        let (left, right) = children(&tree, root).unwrap().unwrap();
        assert_eq!(tree.count(left) + tree.count(right), 8);
        assert!(validate_shape(&tree).is_ok());
    }
}

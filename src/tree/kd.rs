use super::{HRect, NodeId, PartitionTree};
use crate::error::{Error, Result};

/// A node in the kd-tree (arena-allocated).
#[derive(Debug, Clone)]
struct KdNode {
    bound: HRect,
    begin: usize,
    count: usize,
    children: Option<(NodeId, NodeId)>,
}

/// A kd-tree over a permuted copy of its input points.
///
/// Nodes are split at the median of their widest dimension until they hold
/// at most `leaf_size` points, so every internal node has exactly two
/// non-empty children. Node ids are assigned in pre-order (the root is 0)
/// and never change.
///
/// # Examples
///
/// ```
/// use dualtree_kde::tree::{KdTree, PartitionTree};
///
/// let points = vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
/// let tree = KdTree::build(&points, 1).unwrap();
///
/// assert_eq!(tree.point_count(), 4);
/// assert_eq!(tree.node_count(), 7);
/// assert_eq!(tree.levels(), 3);
/// ```
#[derive(Debug, Clone)]
pub struct KdTree {
    nodes: Vec<KdNode>,
    /// Permuted coordinates, `dimension` values per point.
    data: Vec<f64>,
    dimension: usize,
    permutation: Vec<usize>,
    levels: usize,
}

impl KdTree {
    /// Builds a tree over `points` with leaves of at most `leaf_size` points.
    ///
    /// An empty point set yields a single empty leaf of dimension zero.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidLeafSize` if `leaf_size` is zero.
    /// Returns `Error::ZeroDimensions` if the points have no coordinates.
    /// Returns `Error::DimensionMismatch` if the points have inconsistent dimensions.
    pub fn build(points: &[Vec<f64>], leaf_size: usize) -> Result<Self> {
        if leaf_size == 0 {
            return Err(Error::InvalidLeafSize);
        }

        let dimension = points.first().map_or(0, Vec::len);
        if !points.is_empty() && dimension == 0 {
            return Err(Error::ZeroDimensions);
        }
        for (i, point) in points.iter().enumerate() {
            if point.len() != dimension {
                return Err(Error::DimensionMismatch {
                    expected: dimension,
                    got: point.len(),
                    point_index: i,
                });
            }
        }

        let mut order: Vec<usize> = (0..points.len()).collect();
        let mut builder = Builder {
            points,
            dimension,
            leaf_size,
            nodes: Vec::with_capacity(2 * points.len() / leaf_size + 1),
            levels: 0,
        };
        builder.build_node(&mut order, 0, 0);

        let data = order
            .iter()
            .flat_map(|&i| points[i].iter().copied())
            .collect();

        Ok(Self {
            nodes: builder.nodes,
            data,
            dimension,
            permutation: order,
            levels: builder.levels,
        })
    }
}

struct Builder<'a> {
    points: &'a [Vec<f64>],
    dimension: usize,
    leaf_size: usize,
    nodes: Vec<KdNode>,
    levels: usize,
}

impl Builder<'_> {
    fn build_node(&mut self, order: &mut [usize], begin: usize, depth: usize) -> NodeId {
        let points = self.points;
        let count = order.len();
        let bound = HRect::from_points(order.iter().map(|&i| points[i].as_slice()), self.dimension);
        let (axis, _) = bound.widest_dimension();

        let node = self.nodes.len();
        self.nodes.push(KdNode {
            bound,
            begin,
            count,
            children: None,
        });
        self.levels = self.levels.max(depth + 1);

        if count <= self.leaf_size {
            return node;
        }

        let mid = count / 2;
        order.select_nth_unstable_by(mid, |&a, &b| points[a][axis].total_cmp(&points[b][axis]));
        let (left_order, right_order) = order.split_at_mut(mid);

        let left = self.build_node(left_order, begin, depth + 1);
        let right = self.build_node(right_order, begin + mid, depth + 1);
        self.nodes[node].children = Some((left, right));

        node
    }
}

impl PartitionTree for KdTree {
    type Bound = HRect;

    fn root(&self) -> NodeId {
        0
    }

    fn node_count(&self) -> usize {
        self.nodes.len()
    }

    fn levels(&self) -> usize {
        self.levels
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn begin(&self, node: NodeId) -> usize {
        self.nodes[node].begin
    }

    fn count(&self, node: NodeId) -> usize {
        self.nodes[node].count
    }

    fn left(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node].children.map(|(left, _)| left)
    }

    fn right(&self, node: NodeId) -> Option<NodeId> {
        self.nodes[node].children.map(|(_, right)| right)
    }

    fn bound(&self, node: NodeId) -> &HRect {
        &self.nodes[node].bound
    }

    fn point(&self, index: usize) -> &[f64] {
        &self.data[index * self.dimension..(index + 1) * self.dimension]
    }

    fn permutation(&self) -> &[usize] {
        &self.permutation
    }
}

/// Errors returned by configuration, tree construction and estimation.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Returned when the bandwidth range is not strictly positive and increasing.
    #[error("invalid bandwidth range: low ({low}) must be positive and less than high ({high})")]
    InvalidBandwidthRange {
        /// The lower end of the range.
        low: f64,
        /// The upper end of the range.
        high: f64,
    },

    /// Returned when zero candidate bandwidths are requested.
    #[error("invalid bandwidth count: at least one candidate bandwidth is required")]
    InvalidBandwidthCount,

    /// Returned when the per-level accuracy target is not a positive finite number.
    #[error("invalid epsilon: {0} must be positive and finite")]
    InvalidEpsilon(f64),

    /// Returned when the per-node-pair tolerance is not a positive finite number.
    #[error("invalid delta: {0} must be positive and finite")]
    InvalidDelta(f64),

    /// Returned when the approximation priority ceiling is not a positive finite number.
    #[error("invalid priority ceiling: {0} must be positive and finite")]
    InvalidPriorityCeiling(f64),

    /// Returned when a tree is requested with leaves that can hold no points.
    #[error("invalid leaf size: leaves must hold at least one point")]
    InvalidLeafSize,

    /// Returned when a kernel width is not a positive finite number.
    #[error("invalid kernel parameter: {0} must be positive and finite")]
    InvalidKernelParameter(f64),

    /// Returned when points have zero coordinates.
    #[error("points must have at least one dimension")]
    ZeroDimensions,

    /// Returned when a point set has inconsistent dimensions.
    #[error(
        "dimension mismatch: expected {expected} dimensions but point {point_index} has {got}"
    )]
    DimensionMismatch {
        /// The expected number of dimensions.
        expected: usize,
        /// The actual number of dimensions of the offending point.
        got: usize,
        /// The index of the offending point.
        point_index: usize,
    },

    /// Returned when the query and reference trees live in different spaces.
    #[error("tree dimension mismatch: query tree has {query} dimensions, reference tree has {reference}")]
    TreeDimensionMismatch {
        /// Dimension of the query tree.
        query: usize,
        /// Dimension of the reference tree.
        reference: usize,
    },

    /// Returned when a tree is not a strict binary partition.
    #[error("malformed tree: node {node} breaks the binary partition")]
    MalformedTree {
        /// The offending node.
        node: usize,
    },

    /// Returned when either point set is empty or the traversal finished
    /// without resolving any bandwidth.
    #[error("no bandwidth resolved: the estimate has no usable solution")]
    NoSolution,
}

/// A `Result` alias using this crate's [`Error`].
pub type Result<T> = core::result::Result<T, Error>;

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![deny(unreachable_pub)]
#![deny(clippy::correctness)]
#![deny(clippy::suspicious)]
#![deny(clippy::style)]
#![deny(clippy::complexity)]
#![deny(clippy::perf)]
#![deny(clippy::pedantic)]
#![deny(clippy::std_instead_of_core)]

//! Multi-bandwidth kernel density estimation over a pair of space-partitioning
//! trees. One traversal evaluates every candidate bandwidth at once, prunes
//! node pairs whose contribution is provably within tolerance, and certifies
//! a relative-error bound on the log-likelihood of the query set for each
//! bandwidth before picking the most likely one.
//!
//! # Getting Started
//!
//! ```
//! use dualtree_kde::prelude::*;
//!
//! let reference = vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0], vec![1.0, 1.0]];
//! let query = vec![vec![0.5, 0.5]];
//!
//! let config = KdeConfig::builder()
//!     .bandwidth_range(0.5, 1.5)
//!     .bandwidth_count(3)
//!     .build()?;
//! let result = DualTreeKde::new(config).estimate(&reference, &query)?;
//!
//! println!("h = {}, density = {:.4}", result.bandwidth, result.densities[0]);
//! # Ok::<(), Error>(())
//! ```
//!
//! # Core Concepts
//!
//! | Type | Role |
//! |------|------|
//! | [`DualTreeKde`] | Run an estimate over point sets or prebuilt trees. |
//! | [`KdeConfig`] | Candidate bandwidths, accuracy targets and tree leaf size. |
//! | [`Kernel`](kernel::Kernel) | Smoothing kernel: [`GaussianKernel`](kernel::GaussianKernel), [`EpanechnikovKernel`](kernel::EpanechnikovKernel), or your own. |
//! | [`PartitionTree`](tree::PartitionTree) | Binary space partition the traversal walks, e.g. [`KdTree`](tree::KdTree). |
//! | [`KdeResult`] | Selected bandwidth, densities in input order, per-candidate bounds. |
//!
//! # Accuracy
//!
//! `epsilon` is the relative-error target on the per-level log-likelihood
//! bound; a bandwidth is resolved at the shallowest tree level meeting it.
//! `delta` is the finer per-node-pair tolerance deciding whether a whole
//! reference node may be summarized by distance bounds instead of visited.
//!
//! # Feature Flags
//!
//! | Flag | What it enables | Default |
//! |------|----------------|---------|
//! | `serde` | `Serialize`/`Deserialize` on the configuration and result types | off |
//! | `tracing` | Structured log events via [`tracing`](https://docs.rs/tracing) at traversal milestones | off |

/// Emit a `tracing::info!` event when the `tracing` feature is enabled.
/// No-op otherwise.
#[cfg(feature = "tracing")]
macro_rules! trace_info {
    ($($arg:tt)*) => { tracing::info!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_info {
    ($($arg:tt)*) => {};
}

/// Emit a `tracing::debug!` event when the `tracing` feature is enabled.
/// No-op otherwise.
#[cfg(feature = "tracing")]
macro_rules! trace_debug {
    ($($arg:tt)*) => { tracing::debug!($($arg)*) };
}

#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug {
    ($($arg:tt)*) => {};
}

mod bandwidth;
mod bounds;
mod config;
mod engine;
mod error;
pub mod kernel;
mod selector;
pub mod tree;

pub use bounds::Interval;
pub use config::{BandwidthSpacing, KdeConfig, KdeConfigBuilder};
pub use engine::{DualTreeKde, TraversalStats};
pub use error::{Error, Result};
pub use selector::{BandwidthEstimate, KdeResult};

/// Convenient wildcard import for the most common types.
///
/// ```
/// use dualtree_kde::prelude::*;
/// ```
pub mod prelude {
    pub use crate::bounds::Interval;
    pub use crate::config::{BandwidthSpacing, KdeConfig, KdeConfigBuilder};
    pub use crate::engine::{DualTreeKde, TraversalStats};
    pub use crate::error::{Error, Result};
    pub use crate::kernel::{EpanechnikovKernel, GaussianKernel, Kernel};
    pub use crate::selector::{BandwidthEstimate, KdeResult};
    pub use crate::tree::{BoundingVolume, HRect, KdTree, NodeId, PartitionTree};
}

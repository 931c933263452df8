//! Radially symmetric kernels for density estimation.
//!
//! A kernel is evaluated on a *scaled* distance `d / h`; the bandwidth scale
//! `h^-dim` and the normalizing constant are applied by the engine.

use core::f64::consts::PI;

use crate::error::{Error, Result};

/// A radially symmetric smoothing kernel.
///
/// Implementations must be non-increasing in the scaled distance: the
/// engine bounds the contribution of a whole node pair by evaluating the
/// kernel at the pair's maximum and minimum distance.
///
/// # Implementing a custom kernel
///
/// ```
/// use dualtree_kde::kernel::Kernel;
///
/// struct Uniform;
///
/// impl Kernel for Uniform {
///     fn evaluate(&self, scaled_distance: f64) -> f64 {
///         if scaled_distance <= 1.0 { 1.0 } else { 0.0 }
///     }
///
///     fn normalizer(&self, dimension: usize) -> f64 {
///         // volume of the unit ball
///         dualtree_kde::kernel::unit_ball_volume(dimension)
///     }
///
///     fn decays_with_bandwidth(&self) -> bool {
///         true
///     }
/// }
/// ```
pub trait Kernel {
    /// Evaluates the unnormalized kernel at a non-negative scaled distance.
    fn evaluate(&self, scaled_distance: f64) -> f64;

    /// Returns the integral of the kernel over `dimension`-dimensional space.
    fn normalizer(&self, dimension: usize) -> f64;

    /// Returns the maximum value of the kernel.
    fn peak(&self) -> f64 {
        self.evaluate(0.0)
    }

    /// Whether a point's contribution `h^-dim * K(d / h)` is unimodal in the
    /// bandwidth `h`, so that once it falls below machine epsilon while `h`
    /// shrinks it keeps falling.
    ///
    /// The leaf-pair evaluator walks bandwidths from largest to smallest and
    /// stops at a negligible, falling contribution only when this returns
    /// `true`. Kernels with oscillating tails must return `false`, otherwise
    /// contributions at smaller bandwidths would be dropped from the lower
    /// bounds and under-estimated in the upper bounds.
    fn decays_with_bandwidth(&self) -> bool;
}

/// The Gaussian kernel `K(x) = exp(-x^2 / (2 w^2))`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GaussianKernel {
    width: f64,
}

impl GaussianKernel {
    /// Creates a Gaussian kernel with the given width (standard deviation in
    /// scaled units).
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKernelParameter` if `width` is not positive and finite.
    pub fn new(width: f64) -> Result<Self> {
        if !width.is_finite() || width <= 0.0 {
            return Err(Error::InvalidKernelParameter(width));
        }
        Ok(Self { width })
    }

    /// Returns the kernel width.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.width
    }
}

impl Default for GaussianKernel {
    fn default() -> Self {
        Self { width: 1.0 }
    }
}

impl Kernel for GaussianKernel {
    fn evaluate(&self, scaled_distance: f64) -> f64 {
        let z = scaled_distance / self.width;
        (-0.5 * z * z).exp()
    }

    #[allow(clippy::cast_precision_loss)]
    fn normalizer(&self, dimension: usize) -> f64 {
        let d = dimension as f64;
        (2.0 * PI).powf(0.5 * d) * self.width.powf(d)
    }

    fn decays_with_bandwidth(&self) -> bool {
        true
    }
}

/// The Epanechnikov kernel `K(x) = max(0, 1 - x^2 / w^2)`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EpanechnikovKernel {
    width: f64,
}

impl EpanechnikovKernel {
    /// Creates an Epanechnikov kernel whose support has radius `width`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidKernelParameter` if `width` is not positive and finite.
    pub fn new(width: f64) -> Result<Self> {
        if !width.is_finite() || width <= 0.0 {
            return Err(Error::InvalidKernelParameter(width));
        }
        Ok(Self { width })
    }

    /// Returns the support radius.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.width
    }
}

impl Default for EpanechnikovKernel {
    fn default() -> Self {
        Self { width: 1.0 }
    }
}

impl Kernel for EpanechnikovKernel {
    fn evaluate(&self, scaled_distance: f64) -> f64 {
        let z = scaled_distance / self.width;
        (1.0 - z * z).max(0.0)
    }

    #[allow(clippy::cast_precision_loss)]
    fn normalizer(&self, dimension: usize) -> f64 {
        let d = dimension as f64;
        // integral of (1 - |x|^2) over the unit ball is V_d * 2 / (d + 2)
        unit_ball_volume(dimension) * 2.0 / (d + 2.0) * self.width.powf(d)
    }

    fn decays_with_bandwidth(&self) -> bool {
        true
    }
}

/// Volume of the unit ball in `dimension` dimensions.
///
/// Uses the recurrence `V_d = V_{d-2} * 2π / d` with `V_0 = 1` and `V_1 = 2`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn unit_ball_volume(dimension: usize) -> f64 {
    let (mut volume, mut d) = if dimension % 2 == 0 {
        (1.0, 0)
    } else {
        (2.0, 1)
    };
    while d < dimension {
        d += 2;
        volume *= 2.0 * PI / d as f64;
    }
    volume
}

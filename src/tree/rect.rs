use super::BoundingVolume;

/// An axis-aligned hyper-rectangle `[lo, hi]`.
#[derive(Clone, Debug, PartialEq)]
pub struct HRect {
    lo: Vec<f64>,
    hi: Vec<f64>,
}

impl HRect {
    /// Creates a rectangle from its corner coordinates.
    ///
    /// # Panics
    ///
    /// Panics if `lo` and `hi` have different lengths.
    #[must_use]
    pub fn new(lo: Vec<f64>, hi: Vec<f64>) -> Self {
        assert_eq!(lo.len(), hi.len(), "corner dimensions must agree");
        Self { lo, hi }
    }

    /// Smallest rectangle containing every point yielded by `points`.
    ///
    /// An empty iterator yields the degenerate box at the origin.
    pub(crate) fn from_points<'a>(points: impl IntoIterator<Item = &'a [f64]>, dimension: usize) -> Self {
        let mut lo = vec![f64::INFINITY; dimension];
        let mut hi = vec![f64::NEG_INFINITY; dimension];
        let mut any = false;

        for point in points {
            any = true;
            for (d, &x) in point.iter().enumerate() {
                lo[d] = lo[d].min(x);
                hi[d] = hi[d].max(x);
            }
        }

        if !any {
            lo.fill(0.0);
            hi.fill(0.0);
        }
        Self { lo, hi }
    }

    /// Lower corner.
    #[must_use]
    pub fn lo(&self) -> &[f64] {
        &self.lo
    }

    /// Upper corner.
    #[must_use]
    pub fn hi(&self) -> &[f64] {
        &self.hi
    }

    /// Whether `point` lies inside the rectangle (boundary included).
    #[must_use]
    pub fn contains(&self, point: &[f64]) -> bool {
        point
            .iter()
            .zip(self.lo.iter().zip(&self.hi))
            .all(|(&x, (&lo, &hi))| lo <= x && x <= hi)
    }

    /// Dimension with the largest extent, and that extent.
    ///
    /// Ties go to the lowest dimension.
    pub(crate) fn widest_dimension(&self) -> (usize, f64) {
        let mut best = (0, f64::NEG_INFINITY);
        for (d, (lo, hi)) in self.lo.iter().zip(&self.hi).enumerate() {
            let width = hi - lo;
            if width > best.1 {
                best = (d, width);
            }
        }
        best
    }
}

impl BoundingVolume for HRect {
    fn min_distance(&self, other: &Self) -> f64 {
        self.lo
            .iter()
            .zip(&self.hi)
            .zip(other.lo.iter().zip(&other.hi))
            .map(|((&a_lo, &a_hi), (&b_lo, &b_hi))| {
                let gap = (b_lo - a_hi).max(a_lo - b_hi).max(0.0);
                gap * gap
            })
            .sum::<f64>()
            .sqrt()
    }

    fn max_distance(&self, other: &Self) -> f64 {
        self.lo
            .iter()
            .zip(&self.hi)
            .zip(other.lo.iter().zip(&other.hi))
            .map(|((&a_lo, &a_hi), (&b_lo, &b_hi))| {
                let span = (b_hi - a_lo).abs().max((a_hi - b_lo).abs());
                span * span
            })
            .sum::<f64>()
            .sqrt()
    }
}

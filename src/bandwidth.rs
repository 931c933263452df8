//! Candidate bandwidths and the active-range bookkeeping of the traversal.

use core::ops::Range;

/// The ordered candidate bandwidths of one estimate, with their per-run
/// resolution state.
///
/// Besides the value `h` and its reciprocal `w = 1/h`, each candidate carries
/// its contribution scale `w^dim`, the factor applied to every kernel
/// evaluation.
#[derive(Clone, Debug)]
pub(crate) struct BandwidthSet {
    values: Vec<f64>,
    inverses: Vec<f64>,
    scales: Vec<f64>,
    resolved: Vec<Option<usize>>,
}

impl BandwidthSet {
    /// Builds the set from increasing bandwidth values.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub(crate) fn new(values: Vec<f64>, dimension: usize) -> Self {
        let inverses: Vec<f64> = values.iter().map(|h| 1.0 / h).collect();
        let scales = inverses.iter().map(|w| w.powi(dimension as i32)).collect();
        let resolved = vec![None; values.len()];
        Self {
            values,
            inverses,
            scales,
            resolved,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.values.len()
    }

    pub(crate) fn value(&self, index: usize) -> f64 {
        self.values[index]
    }

    pub(crate) fn inverse(&self, index: usize) -> f64 {
        self.inverses[index]
    }

    pub(crate) fn scale(&self, index: usize) -> f64 {
        self.scales[index]
    }

    /// Level at which the bandwidth met its accuracy target, if it has.
    pub(crate) fn resolved_level(&self, index: usize) -> Option<usize> {
        self.resolved[index]
    }

    pub(crate) fn is_resolved(&self, index: usize) -> bool {
        self.resolved[index].is_some()
    }

    /// Records that `index` met its accuracy target at `level`.
    ///
    /// The first call wins; returns whether this call changed anything.
    pub(crate) fn mark_resolved(&mut self, index: usize, level: usize) -> bool {
        if self.resolved[index].is_some() {
            return false;
        }
        self.resolved[index] = Some(level);
        trace_debug!(bandwidth = self.values[index], level, "bandwidth resolved");
        true
    }

    #[cfg(any(test, feature = "tracing"))]
    pub(crate) fn resolved_count(&self) -> usize {
        self.resolved.iter().filter(|r| r.is_some()).count()
    }

    pub(crate) fn all_resolved(&self) -> bool {
        self.resolved.iter().all(Option::is_some)
    }
}

/// The half-open range `low..high` of bandwidth indices still under
/// consideration for a node pair.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ActiveRange {
    low: usize,
    high: usize,
}

impl ActiveRange {
    /// The range covering every one of `count` bandwidths.
    pub(crate) fn full(count: usize) -> Self {
        Self { low: 0, high: count }
    }

    #[cfg(test)]
    pub(crate) fn new(low: usize, high: usize) -> Self {
        debug_assert!(low <= high);
        Self { low, high }
    }

    pub(crate) fn low(self) -> usize {
        self.low
    }

    pub(crate) fn is_empty(self) -> bool {
        self.low >= self.high
    }

    #[cfg(test)]
    pub(crate) fn len(self) -> usize {
        self.high.saturating_sub(self.low)
    }

    pub(crate) fn contains(self, index: usize) -> bool {
        self.low <= index && index < self.high
    }

    pub(crate) fn indices(self) -> Range<usize> {
        self.low..self.high
    }

    /// Shrinks the range from both ends while `done` holds for the boundary
    /// index, calling `retire` for every index dropped.
    ///
    /// The low end is advanced first; the high end then regresses over what
    /// is left, so the range can shrink to empty but never cross.
    pub(crate) fn trim_while(
        &mut self,
        mut done: impl FnMut(usize) -> bool,
        mut retire: impl FnMut(usize),
    ) {
        while self.low < self.high && done(self.low) {
            retire(self.low);
            self.low += 1;
        }
        while self.low < self.high && done(self.high - 1) {
            retire(self.high - 1);
            self.high -= 1;
        }
    }
}

//! Priority-ordered work queue of pending node pairs.

use core::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::bandwidth::ActiveRange;
use crate::bounds::Interval;
use crate::tree::NodeId;

/// A pending (query node, reference node) pair.
#[derive(Clone, Debug)]
pub(crate) struct WorkItem {
    pub(crate) query: NodeId,
    pub(crate) reference: NodeId,
    /// Depth of the query node; also the row of the level tables it feeds.
    pub(crate) level: usize,
    /// Bandwidths still unresolved for this pair.
    pub(crate) range: ActiveRange,
    /// Minimum distance between the two bounding volumes, boosted by the
    /// priority ceiling once the pair has been approximated.
    pub(crate) priority: f64,
    /// Deltas currently applied on behalf of this pair, indexed by bandwidth.
    pub(crate) applied: Option<Vec<Interval>>,
}

impl WorkItem {
    pub(crate) fn new(
        query: NodeId,
        reference: NodeId,
        level: usize,
        range: ActiveRange,
        priority: f64,
    ) -> Self {
        Self {
            query,
            reference,
            level,
            range,
            priority,
            applied: None,
        }
    }
}

struct Entry {
    priority: f64,
    sequence: u64,
    item: WorkItem,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    // BinaryHeap is a max-heap: the smallest priority, then the oldest
    // entry, must compare greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Min-priority queue with first-in-first-out tie breaking.
#[derive(Default)]
pub(crate) struct WorkQueue {
    heap: BinaryHeap<Entry>,
    next_sequence: u64,
    peak_len: usize,
}

impl WorkQueue {
    pub(crate) fn push(&mut self, item: WorkItem) {
        let entry = Entry {
            priority: item.priority,
            sequence: self.next_sequence,
            item,
        };
        self.next_sequence += 1;
        self.heap.push(entry);
        self.peak_len = self.peak_len.max(self.heap.len());
    }

    pub(crate) fn pop(&mut self) -> Option<WorkItem> {
        self.heap.pop().map(|entry| entry.item)
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.heap.len()
    }

    /// Largest number of items held at once.
    pub(crate) fn peak_len(&self) -> usize {
        self.peak_len
    }
}

//! Contiguous batch partitioning for in-memory inputs
//!
//! Dispatching whole batches instead of single items amortizes the relay
//! hand-off across roughly `2 × workers` batches, while still leaving enough
//! batches for a worker that finishes early to pick up more work.

use std::iter::FusedIterator;
use std::ops::Range;

/// Partition of `len` elements into consecutive batches of `batch_size`
///
/// The final batch holds whatever tail remains (between 1 and `batch_size`
/// elements). An empty input has no batches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchPlan {
    len: usize,
    batch_size: usize,
}

impl BatchPlan {
    /// Default heuristic: `max(1, len / (2 × workers))`
    ///
    /// # Panics
    /// If `workers` is zero.
    pub fn new(len: usize, workers: usize) -> Self {
        assert!(workers > 0, "batch plan requires at least one worker");
        let batch_size = (len / workers.saturating_mul(2)).max(1);
        Self { len, batch_size }
    }

    /// Explicit batch size, for callers tuning the heuristic
    ///
    /// # Panics
    /// If `batch_size` is zero.
    pub fn with_batch_size(len: usize, batch_size: usize) -> Self {
        assert!(batch_size > 0, "batch size must be at least 1");
        Self { len, batch_size }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn batch_count(&self) -> usize {
        self.len.div_ceil(self.batch_size)
    }

    /// Index ranges of every batch, in partition order
    pub fn ranges(&self) -> BatchRanges {
        BatchRanges {
            next: 0,
            len: self.len,
            batch_size: self.batch_size,
        }
    }

    /// Borrowed slice view of every batch
    ///
    /// # Panics
    /// If `items` is not the length this plan was built for.
    pub fn slices<'a, T>(&self, items: &'a [T]) -> std::slice::Chunks<'a, T> {
        assert_eq!(items.len(), self.len, "batch plan does not match input length");
        items.chunks(self.batch_size)
    }

    /// Move `items` into owned batches, one allocation per batch, produced lazily
    pub(crate) fn split<T>(&self, items: Vec<T>) -> OwnedBatches<T> {
        assert_eq!(items.len(), self.len, "batch plan does not match input length");
        OwnedBatches {
            items: items.into_iter(),
            ranges: self.ranges(),
        }
    }
}

/// Iterator over the index ranges of a [`BatchPlan`]
#[derive(Debug, Clone)]
pub struct BatchRanges {
    next: usize,
    len: usize,
    batch_size: usize,
}

impl Iterator for BatchRanges {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.len {
            return None;
        }
        let start = self.next;
        let end = start.saturating_add(self.batch_size).min(self.len);
        self.next = end;
        Some(start..end)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.len - self.next).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for BatchRanges {}
impl FusedIterator for BatchRanges {}

/// An owned, contiguous run of input elements claimed by a single worker
#[derive(Debug)]
pub(crate) struct Batch<T> {
    pub(crate) start: usize,
    pub(crate) items: Vec<T>,
}

pub(crate) struct OwnedBatches<T> {
    items: std::vec::IntoIter<T>,
    ranges: BatchRanges,
}

impl<T> Iterator for OwnedBatches<T> {
    type Item = Batch<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let range = self.ranges.next()?;
        let items = self.items.by_ref().take(range.len()).collect();
        Some(Batch {
            start: range.start,
            items,
        })
    }
}

use std::ops::RangeInclusive;

use alloy::primitives::BlockNumber;

/// Consecutive, inclusive block ranges of at most `batch_size` blocks, oldest first.
#[derive(Debug, Clone)]
pub(crate) struct BackfillRanges {
    next_start: BlockNumber,
    end: BlockNumber,
    batch_size: u64,
    exhausted: bool,
}

impl BackfillRanges {
    /// Ranges covering `start..=end`. Empty if `start > end`.
    ///
    /// A `batch_size` of 0 is treated as 1.
    pub(crate) fn new(start: BlockNumber, end: BlockNumber, batch_size: u64) -> Self {
        Self { next_start: start, end, batch_size: batch_size.max(1), exhausted: start > end }
    }

    /// Number of ranges left to yield.
    pub(crate) fn remaining(&self) -> u64 {
        if self.exhausted { 0 } else { (self.end - self.next_start) / self.batch_size + 1 }
    }
}

impl Iterator for BackfillRanges {
    type Item = RangeInclusive<BlockNumber>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.exhausted {
            return None;
        }

        let start = self.next_start;
        let end = start.saturating_add(self.batch_size - 1).min(self.end);
        if end == self.end {
            self.exhausted = true;
        } else {
            self.next_start = end + 1;
        }

        Some(start..=end)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = usize::try_from(self.remaining()).unwrap_or(usize::MAX);
        (remaining, Some(remaining))
    }
}

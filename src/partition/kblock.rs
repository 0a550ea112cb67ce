//! Static 1-D partitions of the contraction dimension.

use std::ops::Range;

/// Half-open range `[start, end)` of contraction blocks owned by one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub start: usize,
    pub end: usize,
}

impl BlockRange {
    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    pub fn iter(&self) -> Range<usize> {
        self.start..self.end
    }
}

/// Contiguous chunk length `ceil(total / threads)`.
pub fn chunk_size(total: usize, threads: usize) -> usize {
    total.div_ceil(threads.max(1))
}

/// Divide `total_blocks` into one contiguous chunk per worker.
///
/// Worker `t` owns `[t * chunk, min((t + 1) * chunk, total))`. Empty chunks
/// are dropped, so fewer than `threads` ranges come back when there are
/// fewer blocks than workers (or when the ceiling leaves trailing workers
/// with nothing). No rebalancing happens afterwards.
pub fn k_block_ranges(total_blocks: usize, threads: usize) -> Vec<BlockRange> {
    let threads = threads.max(1);
    let chunk = chunk_size(total_blocks, threads);

    (0..threads)
        .map(|t| BlockRange {
            start: t * chunk,
            end: ((t + 1) * chunk).min(total_blocks),
        })
        .filter(|range| !range.is_empty())
        .collect()
}

/// Split `[0, k)` into per-worker slices for LUT preprocessing.
///
/// Slice length is `max(ceil(k / threads), min_slice)` rounded up to a
/// multiple of `align`; the final slice absorbs whatever is left, so the
/// slices always cover `k` exactly.
pub fn k_slices(k: usize, threads: usize, min_slice: usize, align: usize) -> Vec<Range<usize>> {
    let align = align.max(1);
    let slice = chunk_size(k, threads).max(min_slice).max(1);
    let slice = slice.div_ceil(align) * align;

    (0..k)
        .step_by(slice)
        .map(|start| start..(start + slice).min(k))
        .collect()
}

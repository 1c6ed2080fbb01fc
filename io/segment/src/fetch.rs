//! Grouping of missing blocks into backend calls.

use std::ops::Range;

/// Split sorted, distinct block indices into runs of adjacent indices holding
/// at most `batch_size` entries each. Returns ranges into `indices`.
///
/// Each run is satisfied by exactly one backend call.
pub fn coalesce(indices: &[u64], batch_size: usize) -> Vec<Range<usize>> {
    let batch_size = batch_size.max(1);
    let mut runs = Vec::new();
    if indices.is_empty() {
        return runs;
    }

    let mut start = 0;
    for (i, pair) in indices.windows(2).enumerate() {
        let next = i + 1;
        if pair[1] != pair[0] + 1 || next - start == batch_size {
            runs.push(start..next);
            start = next;
        }
    }
    runs.push(start..indices.len());
    runs
}

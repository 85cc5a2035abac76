//! Row partitioning across tree leaves.
//!
//! A single index buffer holds every (used) row, grouped contiguously by
//! leaf; `leaf_begin`/`leaf_count` delimit each leaf's range. Splitting a
//! leaf partitions its range in place: rows going left keep the prefix, rows
//! going right become the new leaf's suffix.
//!
//! The split is a blocked two-phase scheme: blocks of the parent range are
//! partitioned independently into scratch buffers, then written back lefts
//! first, rights second, in block order. Concatenating stable per-block
//! partitions in order *is* the stable partition of the whole range, so the
//! result is byte-identical for any thread count.

use rayon::prelude::*;

use crate::data::bin_data::BinData;

/// Rows per parallel block in [`DataPartition::split`].
const SPLIT_BLOCK: usize = 1024;

/// Partition of row indices among tree leaves.
#[derive(Clone, Debug)]
pub struct DataPartition {
    num_data: usize,
    /// Row indices grouped by leaf.
    indices: Vec<u32>,
    leaf_begin: Vec<usize>,
    leaf_count: Vec<usize>,
    /// Bagging subset; `None` means every row is used.
    used_indices: Option<Vec<u32>>,
}

impl DataPartition {
    /// Create a partition over `num_data` rows and up to `num_leaves` leaves.
    pub fn new(num_data: usize, num_leaves: usize) -> Self {
        Self {
            num_data,
            indices: vec![0; num_data],
            leaf_begin: vec![0; num_leaves],
            leaf_count: vec![0; num_leaves],
            used_indices: None,
        }
    }

    /// Restrict the next `init` to a bagging subset, given in increasing row
    /// order. Pass an empty slice to clear the restriction.
    pub fn set_used_indices(&mut self, rows: &[u32]) {
        if rows.is_empty() {
            self.used_indices = None;
        } else {
            debug_assert!(rows.windows(2).all(|w| w[0] < w[1]));
            self.used_indices = Some(rows.to_vec());
        }
    }

    /// Reset to a single root leaf holding all used rows in original order.
    pub fn init(&mut self) {
        self.leaf_begin.fill(0);
        self.leaf_count.fill(0);
        match &self.used_indices {
            None => {
                self.indices
                    .par_iter_mut()
                    .enumerate()
                    .for_each(|(i, idx)| *idx = i as u32);
                self.leaf_count[0] = self.num_data;
            }
            Some(used) => {
                self.indices[..used.len()].copy_from_slice(used);
                self.leaf_count[0] = used.len();
            }
        }
    }

    /// Number of rows currently in a leaf.
    #[inline]
    pub fn leaf_count(&self, leaf: usize) -> usize {
        self.leaf_count[leaf]
    }

    /// Start of a leaf's range in the index buffer.
    #[inline]
    pub fn leaf_begin(&self, leaf: usize) -> usize {
        self.leaf_begin[leaf]
    }

    /// Rows currently in a leaf, in partition order.
    #[inline]
    pub fn leaf_indices(&self, leaf: usize) -> &[u32] {
        let begin = self.leaf_begin[leaf];
        &self.indices[begin..begin + self.leaf_count[leaf]]
    }

    /// The whole index buffer.
    #[inline]
    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    /// Split `leaf` on `column`: rows with `bin <= threshold` stay in `leaf`
    /// (prefix), the rest move to `right_leaf` (suffix). Relative row order
    /// is preserved on both sides.
    pub fn split(&mut self, leaf: usize, column: &BinData, threshold: u32, right_leaf: usize) {
        let begin = self.leaf_begin[leaf];
        let count = self.leaf_count[leaf];

        let parts: Vec<(Vec<u32>, Vec<u32>)> = self.indices[begin..begin + count]
            .par_chunks(SPLIT_BLOCK)
            .map(|block| {
                let mut left = Vec::with_capacity(block.len());
                let mut right = Vec::new();
                for &row in block {
                    if column.bin(row) <= threshold {
                        left.push(row);
                    } else {
                        right.push(row);
                    }
                }
                (left, right)
            })
            .collect();

        let mut write = begin;
        for (left, _) in &parts {
            self.indices[write..write + left.len()].copy_from_slice(left);
            write += left.len();
        }
        let left_count = write - begin;
        for (_, right) in &parts {
            self.indices[write..write + right.len()].copy_from_slice(right);
            write += right.len();
        }

        self.leaf_count[leaf] = left_count;
        self.leaf_begin[right_leaf] = begin + left_count;
        self.leaf_count[right_leaf] = count - left_count;
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dense::DenseBin;

    fn dense_column(bins: &[u32]) -> BinData {
        let pairs: Vec<(u32, u32)> = bins.iter().enumerate().map(|(r, &b)| (r as u32, b)).collect();
        BinData::Dense(DenseBin::from_pairs(bins.len(), 8, 0, &pairs))
    }

    #[test]
    fn init_covers_all_rows() {
        let mut partition = DataPartition::new(10, 4);
        partition.init();
        assert_eq!(partition.leaf_count(0), 10);
        assert_eq!(partition.leaf_indices(0), (0..10).collect::<Vec<u32>>().as_slice());
    }

    #[test]
    fn split_preserves_order_on_both_sides() {
        let column = dense_column(&[0, 3, 1, 2, 0, 3, 1, 2]);
        let mut partition = DataPartition::new(8, 4);
        partition.init();

        partition.split(0, &column, 1, 1);

        assert_eq!(partition.leaf_indices(0), &[0, 2, 4, 6]);
        assert_eq!(partition.leaf_indices(1), &[1, 3, 5, 7]);
        assert_eq!(partition.leaf_count(0) + partition.leaf_count(1), 8);
    }

    #[test]
    fn nested_splits_stay_disjoint_and_complete() {
        let col_a = dense_column(&[0, 0, 0, 0, 1, 1, 1, 1]);
        let col_b = dense_column(&[0, 1, 0, 1, 0, 1, 0, 1]);
        let mut partition = DataPartition::new(8, 4);
        partition.init();

        partition.split(0, &col_a, 0, 1);
        partition.split(0, &col_b, 0, 2);

        assert_eq!(partition.leaf_indices(0), &[0, 2]);
        assert_eq!(partition.leaf_indices(2), &[1, 3]);
        assert_eq!(partition.leaf_indices(1), &[4, 5, 6, 7]);

        let total: usize = (0..3).map(|l| partition.leaf_count(l)).sum();
        assert_eq!(total, 8);
        let mut seen: Vec<u32> = (0..3).flat_map(|l| partition.leaf_indices(l).to_vec()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<u32>>());
    }

    #[test]
    fn bagging_subset_initializes_leaf_zero() {
        let mut partition = DataPartition::new(10, 4);
        partition.set_used_indices(&[1, 3, 5, 7, 9]);
        partition.init();
        assert_eq!(partition.leaf_count(0), 5);
        assert_eq!(partition.leaf_indices(0), &[1, 3, 5, 7, 9]);
    }

    #[test]
    fn split_exceeding_one_block_is_stable() {
        // More rows than one parallel block to exercise the write-back path.
        let n = 5000u32;
        let bins: Vec<u32> = (0..n).map(|i| i % 4).collect();
        let column = dense_column(&bins);
        let mut partition = DataPartition::new(n as usize, 4);
        partition.init();

        partition.split(0, &column, 1, 1);

        let left = partition.leaf_indices(0);
        let right = partition.leaf_indices(1);
        assert!(left.windows(2).all(|w| w[0] < w[1]));
        assert!(right.windows(2).all(|w| w[0] < w[1]));
        assert!(left.iter().all(|&r| r % 4 <= 1));
        assert!(right.iter().all(|&r| r % 4 > 1));
        assert_eq!(left.len() + right.len(), n as usize);
    }
}

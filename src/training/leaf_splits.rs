//! Aggregate state of a leaf under consideration for splitting.

use rayon::prelude::*;

use super::partition::DataPartition;
use super::split::SplitInfo;

/// Rows per partial sum in the parallel reductions. Fixed blocks combined in
/// order keep the floating-point result identical for any thread count.
const SUM_BLOCK: usize = 2048;

/// Gradient totals, row count and per-feature best splits of one leaf.
///
/// The learner keeps two of these, one for the smaller and one for the larger
/// child of the last split, and re-initializes them as the tree grows.
#[derive(Clone, Debug)]
pub struct LeafSplits {
    leaf_index: Option<usize>,
    num_data_in_leaf: usize,
    sum_gradients: f64,
    sum_hessians: f64,
    best_split_per_feature: Vec<SplitInfo>,
}

impl LeafSplits {
    /// Create inactive state with one best-split scratch per feature.
    pub fn new(num_features: usize) -> Self {
        Self {
            leaf_index: None,
            num_data_in_leaf: 0,
            sum_gradients: 0.0,
            sum_hessians: 0.0,
            best_split_per_feature: vec![SplitInfo::default(); num_features],
        }
    }

    /// Root initialization over the full gradient vectors (leaf 0 holds every
    /// row).
    pub fn init_root(&mut self, gradients: &[f32], hessians: &[f32]) {
        let partials: Vec<(f64, f64)> = gradients
            .par_chunks(SUM_BLOCK)
            .zip(hessians.par_chunks(SUM_BLOCK))
            .map(|(g_block, h_block)| {
                let g: f64 = g_block.iter().map(|&g| g as f64).sum();
                let h: f64 = h_block.iter().map(|&h| h as f64).sum();
                (g, h)
            })
            .collect();
        let (sum_g, sum_h) = partials
            .iter()
            .fold((0.0, 0.0), |(g0, h0), &(g1, h1)| (g0 + g1, h0 + h1));
        self.leaf_index = Some(0);
        self.num_data_in_leaf = gradients.len();
        self.sum_gradients = sum_g;
        self.sum_hessians = sum_h;
        self.reset_best_splits();
    }

    /// Initialize by summing over the rows the partition currently routes to
    /// `leaf` (used when bagging leaves the root with a row subset).
    pub fn init_from_partition(
        &mut self,
        leaf: usize,
        partition: &DataPartition,
        gradients: &[f32],
        hessians: &[f32],
    ) {
        let rows = partition.leaf_indices(leaf);
        let partials: Vec<(f64, f64)> = rows
            .par_chunks(SUM_BLOCK)
            .map(|block| {
                let mut g = 0.0f64;
                let mut h = 0.0f64;
                for &row in block {
                    g += gradients[row as usize] as f64;
                    h += hessians[row as usize] as f64;
                }
                (g, h)
            })
            .collect();
        let (sum_g, sum_h) = partials
            .iter()
            .fold((0.0, 0.0), |(g0, h0), &(g1, h1)| (g0 + g1, h0 + h1));
        self.leaf_index = Some(leaf);
        self.num_data_in_leaf = rows.len();
        self.sum_gradients = sum_g;
        self.sum_hessians = sum_h;
        self.reset_best_splits();
    }

    /// Initialize from sums already known from the parent's split info,
    /// saving a pass over the rows.
    pub fn init_with_sums(
        &mut self,
        leaf: usize,
        num_data_in_leaf: usize,
        sum_gradients: f64,
        sum_hessians: f64,
    ) {
        self.leaf_index = Some(leaf);
        self.num_data_in_leaf = num_data_in_leaf;
        self.sum_gradients = sum_gradients;
        self.sum_hessians = sum_hessians;
        self.reset_best_splits();
    }

    /// Mark inactive (no leaf under consideration).
    pub fn reset(&mut self) {
        self.leaf_index = None;
        self.num_data_in_leaf = 0;
        self.sum_gradients = 0.0;
        self.sum_hessians = 0.0;
        self.reset_best_splits();
    }

    /// Leaf under consideration, if any.
    #[inline]
    pub fn leaf_index(&self) -> Option<usize> {
        self.leaf_index
    }

    /// Rows in the leaf.
    #[inline]
    pub fn num_data_in_leaf(&self) -> usize {
        self.num_data_in_leaf
    }

    /// Gradient total of the leaf.
    #[inline]
    pub fn sum_gradients(&self) -> f64 {
        self.sum_gradients
    }

    /// Hessian total of the leaf.
    #[inline]
    pub fn sum_hessians(&self) -> f64 {
        self.sum_hessians
    }

    /// Per-feature best splits found for this leaf.
    #[inline]
    pub fn best_split_per_feature(&self) -> &[SplitInfo] {
        &self.best_split_per_feature
    }

    /// Mutable per-feature best splits, for the parallel threshold pass.
    #[inline]
    pub fn best_split_per_feature_mut(&mut self) -> &mut [SplitInfo] {
        &mut self.best_split_per_feature
    }

    fn reset_best_splits(&mut self) {
        for split in &mut self.best_split_per_feature {
            split.reset();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn root_init_sums_everything() {
        let g = [1.0f32, 2.0, 3.0, -1.0];
        let h = [1.0f32, 1.0, 2.0, 0.5];
        let mut splits = LeafSplits::new(3);
        splits.init_root(&g, &h);
        assert_eq!(splits.leaf_index(), Some(0));
        assert_eq!(splits.num_data_in_leaf(), 4);
        assert_relative_eq!(splits.sum_gradients(), 5.0);
        assert_relative_eq!(splits.sum_hessians(), 4.5);
    }

    #[test]
    fn partition_init_sums_leaf_rows_only() {
        let g = [1.0f32, 10.0, 2.0, 20.0];
        let h = [1.0f32; 4];
        let mut partition = DataPartition::new(4, 2);
        partition.set_used_indices(&[0, 2]);
        partition.init();

        let mut splits = LeafSplits::new(1);
        splits.init_from_partition(0, &partition, &g, &h);
        assert_eq!(splits.num_data_in_leaf(), 2);
        assert_relative_eq!(splits.sum_gradients(), 3.0);
    }

    #[test]
    fn init_resets_best_splits() {
        let mut splits = LeafSplits::new(2);
        splits.best_split_per_feature_mut()[1].gain = 42.0;
        splits.init_with_sums(3, 10, 1.0, 2.0);
        assert!(splits.best_split_per_feature()[1].gain.is_infinite());
        assert_eq!(splits.leaf_index(), Some(3));
    }

    #[test]
    fn reset_marks_inactive() {
        let mut splits = LeafSplits::new(1);
        splits.init_with_sums(2, 5, 1.0, 1.0);
        splits.reset();
        assert_eq!(splits.leaf_index(), None);
    }
}

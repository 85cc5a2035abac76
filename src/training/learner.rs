//! The serial leaf-wise tree learner.
//!
//! Each call to [`SerialTreeLearner::train`] grows one tree: the partition is
//! reset to a single root leaf, a feature subset is sampled, and up to
//! `num_leaves - 1` times the leaf with the highest pending gain is split.
//! Histograms for a split's smaller child are built from scratch; the larger
//! child's are derived by subtracting them from the parent's retained array,
//! which the pool rebinds to the larger child without copying.

use log::info;
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;

use crate::data::bin_data::BinData;
use crate::data::sparse::OrderedBin;
use crate::data::Dataset;
use crate::error::DataResult;
use crate::tree::Tree;

use super::config::TreeConfig;
use super::histogram::{FeatureHistogram, HistogramEntry};
use super::leaf_splits::LeafSplits;
use super::partition::DataPartition;
use super::pool::{HistogramPool, SlotId};
use super::split::SplitInfo;

/// Grows single trees over a pre-binned dataset from gradient/hessian pairs.
pub struct SerialTreeLearner {
    config: TreeConfig,
    num_data: usize,
    num_features: usize,
    partition: DataPartition,
    /// Ordered-bin state per feature; `None` for dense features.
    ordered_bins: Vec<Option<OrderedBin>>,
    has_ordered_bin: bool,
    pool: HistogramPool,
    smaller_leaf_splits: LeafSplits,
    larger_leaf_splits: LeafSplits,
    best_split_per_leaf: Vec<SplitInfo>,
    is_feature_used: Vec<bool>,
    /// Gradients gathered into leaf order, smaller child first.
    ordered_gradients: Vec<f32>,
    ordered_hessians: Vec<f32>,
    /// Per-row 0/1 scratch for ordered-bin init/split; empty when no feature
    /// is sparse.
    is_data_in_leaf: Vec<u8>,
    rng: Xoshiro256PlusPlus,
    // Histogram routing for the current iteration.
    smaller_slot: Option<SlotId>,
    larger_slot: Option<SlotId>,
    has_parent_histogram: bool,
    /// Root iteration over the full data reads the caller's gradient vectors
    /// directly instead of the ordered buffers.
    root_uses_global_gradients: bool,
}

impl SerialTreeLearner {
    /// Create a learner for `dataset`. The same dataset must be passed to
    /// every subsequent [`SerialTreeLearner::train`] call.
    pub fn new(config: TreeConfig, dataset: &Dataset) -> DataResult<Self> {
        config.validate()?;
        let num_data = dataset.num_data();
        let num_features = dataset.num_features();
        let num_leaves = config.num_leaves;

        // Size the pool so all cached histograms fit the configured budget.
        let cache_size = if config.histogram_pool_size_mb < 0.0 {
            num_leaves
        } else {
            let bytes_per_leaf: usize = dataset
                .features()
                .iter()
                .map(|f| f.num_bin() * std::mem::size_of::<HistogramEntry>())
                .sum();
            (config.histogram_pool_size_mb * 1024.0 * 1024.0 / bytes_per_leaf.max(1) as f64)
                as usize
        };
        let cache_size = cache_size.clamp(2, num_leaves);

        let mut pool = HistogramPool::default();
        pool.reset_size(cache_size, num_leaves);
        pool.fill(|| {
            dataset
                .features()
                .iter()
                .enumerate()
                .map(|(f, feature)| FeatureHistogram::new(f, feature.num_bin()))
                .collect::<Vec<_>>()
                .into_boxed_slice()
        });

        let ordered_bins: Vec<Option<OrderedBin>> = dataset
            .features()
            .iter()
            .map(|f| f.bin_data().create_ordered_bin(num_leaves))
            .collect();
        let has_ordered_bin = ordered_bins.iter().any(|b| b.is_some());

        info!(
            "tree learner over {} rows, {} features ({} sparse), histogram cache {}",
            num_data,
            num_features,
            ordered_bins.iter().filter(|b| b.is_some()).count(),
            cache_size,
        );

        Ok(Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(config.feature_fraction_seed),
            partition: DataPartition::new(num_data, num_leaves),
            ordered_bins,
            has_ordered_bin,
            pool,
            smaller_leaf_splits: LeafSplits::new(num_features),
            larger_leaf_splits: LeafSplits::new(num_features),
            best_split_per_leaf: vec![SplitInfo::default(); num_leaves],
            is_feature_used: vec![false; num_features],
            ordered_gradients: vec![0.0; num_data],
            ordered_hessians: vec![0.0; num_data],
            is_data_in_leaf: vec![0; if has_ordered_bin { num_data } else { 0 }],
            smaller_slot: None,
            larger_slot: None,
            has_parent_histogram: false,
            root_uses_global_gradients: true,
            config,
            num_data,
            num_features,
        })
    }

    /// Restrict the next trees to a bagging subset of rows (increasing
    /// order); an empty slice restores full-data training.
    pub fn set_used_rows(&mut self, rows: &[u32]) {
        self.partition.set_used_indices(rows);
    }

    /// Features sampled for the current tree.
    pub fn feature_used_mask(&self) -> &[bool] {
        &self.is_feature_used
    }

    /// The histogram pool (bindings and hit/miss counters).
    pub fn histogram_pool(&self) -> &HistogramPool {
        &self.pool
    }

    /// Grow one tree from the given gradients and hessians.
    pub fn train(&mut self, dataset: &Dataset, gradients: &[f32], hessians: &[f32]) -> Tree {
        assert_eq!(gradients.len(), self.num_data);
        assert_eq!(hessians.len(), self.num_data);

        self.before_train(dataset, gradients, hessians);

        let mut tree = Tree::new(self.config.num_leaves);
        let mut left_leaf = 0usize;
        let mut right_leaf: Option<usize> = None;

        for _ in 0..self.config.num_leaves - 1 {
            if self.before_find_best_split(&tree, left_leaf, right_leaf, gradients, hessians) {
                self.find_best_thresholds(dataset, gradients, hessians);
            }

            let best_leaf = Self::arg_max_gain(&self.best_split_per_leaf[..tree.num_leaves()]);
            let best_gain = self.best_split_per_leaf[best_leaf].gain;
            if best_gain <= 0.0 {
                info!(
                    "no further split with positive gain, stopping at {} leaves",
                    tree.num_leaves()
                );
                break;
            }

            let (left, right) = self.split(dataset, &mut tree, best_leaf);
            left_leaf = left;
            right_leaf = Some(right);
        }
        tree
    }

    // ------------------------------------------------------------------
    // Per-tree setup
    // ------------------------------------------------------------------

    fn before_train(&mut self, _dataset: &Dataset, gradients: &[f32], hessians: &[f32]) {
        self.pool.reset_map();
        self.sample_features();
        self.partition.init();
        for split in &mut self.best_split_per_leaf {
            split.reset();
        }
        self.smaller_slot = None;
        self.larger_slot = None;
        self.has_parent_histogram = false;

        let root_count = self.partition.leaf_count(0);
        if root_count == self.num_data {
            // All rows in the root: use the caller's vectors as the ordered
            // gradients, no copy.
            self.smaller_leaf_splits.init_root(gradients, hessians);
            self.root_uses_global_gradients = true;
        } else {
            self.smaller_leaf_splits
                .init_from_partition(0, &self.partition, gradients, hessians);
            let rows = self.partition.leaf_indices(0);
            self.ordered_gradients[..root_count]
                .par_iter_mut()
                .zip(self.ordered_hessians[..root_count].par_iter_mut())
                .zip(rows.par_iter())
                .for_each(|((g_out, h_out), &row)| {
                    *g_out = gradients[row as usize];
                    *h_out = hessians[row as usize];
                });
            self.root_uses_global_gradients = false;
        }
        self.larger_leaf_splits.reset();

        if self.has_ordered_bin {
            let num_leaves = self.config.num_leaves;
            if root_count == self.num_data {
                self.ordered_bins.par_iter_mut().for_each(|bin| {
                    if let Some(bin) = bin {
                        bin.init(None, num_leaves);
                    }
                });
            } else {
                self.is_data_in_leaf.fill(0);
                for &row in self.partition.leaf_indices(0) {
                    self.is_data_in_leaf[row as usize] = 1;
                }
                let flags = &self.is_data_in_leaf;
                self.ordered_bins.par_iter_mut().for_each(|bin| {
                    if let Some(bin) = bin {
                        bin.init(Some(flags), num_leaves);
                    }
                });
            }
        }
    }

    /// Sample `feature_fraction` of the features for this tree, without
    /// replacement, from the learner's seeded stream.
    fn sample_features(&mut self) {
        self.is_feature_used.fill(false);
        let used_cnt = (self.num_features as f64 * self.config.feature_fraction) as usize;
        if used_cnt >= self.num_features {
            self.is_feature_used.fill(true);
            return;
        }
        let mut indices: Vec<usize> = (0..self.num_features).collect();
        for i in 0..used_cnt {
            let j = self.rng.gen_range(i..self.num_features);
            indices.swap(i, j);
        }
        for &f in &indices[..used_cnt] {
            self.is_feature_used[f] = true;
        }
    }

    // ------------------------------------------------------------------
    // Per-iteration setup
    // ------------------------------------------------------------------

    /// Route histograms for the two fresh leaves and prepare ordered
    /// gradients. Returns `false` when neither leaf can be split, with their
    /// pending gains forced to the sentinel.
    fn before_find_best_split(
        &mut self,
        tree: &Tree,
        left_leaf: usize,
        right_leaf: Option<usize>,
        gradients: &[f32],
        hessians: &[f32],
    ) -> bool {
        // Both children sit at the same depth, so the left check covers both.
        if self.config.max_depth > 0 && tree.leaf_depth(left_leaf) >= self.config.max_depth as u32 {
            self.mark_unsplittable(left_leaf, right_leaf);
            return false;
        }
        let left_count = self.partition.leaf_count(left_leaf);
        let right_count = right_leaf.map_or(0, |r| self.partition.leaf_count(r));
        let min_twice = 2 * self.config.min_data_in_leaf;
        if left_count < min_twice && right_count < min_twice {
            self.mark_unsplittable(left_leaf, right_leaf);
            return false;
        }

        match right_leaf {
            None => {
                // Root: one fresh histogram array, nothing to subtract.
                let (slot, _) = self.pool.get(left_leaf);
                self.smaller_slot = Some(slot);
                self.larger_slot = None;
                self.has_parent_histogram = false;
            }
            Some(right) => {
                let (smaller, larger) = if left_count < right_count {
                    (left_leaf, right)
                } else {
                    (right, left_leaf)
                };
                // The left leaf inherited the parent's binding (if it
                // survived eviction): that array still holds the parent's
                // histograms and is handed to the larger child.
                let (parent_slot, was_bound) = self.pool.get(left_leaf);
                self.has_parent_histogram = was_bound;
                if smaller == left_leaf {
                    self.pool.move_to(left_leaf, right);
                }
                self.larger_slot = Some(parent_slot);
                let (smaller_slot, _) = self.pool.get(smaller);
                self.smaller_slot = Some(smaller_slot);

                self.root_uses_global_gradients = false;
                self.gather_ordered_gradients(smaller, larger, gradients, hessians);
            }
        }

        // One ordered-bin split per iteration, shared by all sparse features.
        if self.has_ordered_bin {
            if let Some(right) = right_leaf {
                self.is_data_in_leaf.fill(0);
                for &row in self.partition.leaf_indices(left_leaf) {
                    self.is_data_in_leaf[row as usize] = 1;
                }
                let flags = &self.is_data_in_leaf;
                self.ordered_bins.par_iter_mut().for_each(|bin| {
                    if let Some(bin) = bin {
                        bin.split(left_leaf, right, flags);
                    }
                });
            }
        }
        true
    }

    /// Lay the smaller leaf's gradients at the front of the ordered buffers;
    /// when no parent histogram survives, the larger leaf's follow so it can
    /// be constructed from scratch.
    fn gather_ordered_gradients(
        &mut self,
        smaller: usize,
        larger: usize,
        gradients: &[f32],
        hessians: &[f32],
    ) {
        let smaller_rows = self.partition.leaf_indices(smaller);
        let smaller_count = smaller_rows.len();
        self.ordered_gradients[..smaller_count]
            .par_iter_mut()
            .zip(self.ordered_hessians[..smaller_count].par_iter_mut())
            .zip(smaller_rows.par_iter())
            .for_each(|((g_out, h_out), &row)| {
                *g_out = gradients[row as usize];
                *h_out = hessians[row as usize];
            });

        if !self.has_parent_histogram {
            let larger_rows = self.partition.leaf_indices(larger);
            let larger_count = larger_rows.len();
            self.ordered_gradients[smaller_count..smaller_count + larger_count]
                .par_iter_mut()
                .zip(
                    self.ordered_hessians[smaller_count..smaller_count + larger_count]
                        .par_iter_mut(),
                )
                .zip(larger_rows.par_iter())
                .for_each(|((g_out, h_out), &row)| {
                    *g_out = gradients[row as usize];
                    *h_out = hessians[row as usize];
                });
        }
    }

    fn mark_unsplittable(&mut self, left_leaf: usize, right_leaf: Option<usize>) {
        self.best_split_per_leaf[left_leaf].reset();
        if let Some(right) = right_leaf {
            self.best_split_per_leaf[right].reset();
        }
    }

    // ------------------------------------------------------------------
    // Threshold search
    // ------------------------------------------------------------------

    /// Build histograms and scan thresholds for every sampled feature, in
    /// parallel over features, then reduce to the per-leaf best split.
    fn find_best_thresholds(&mut self, dataset: &Dataset, gradients: &[f32], hessians: &[f32]) {
        let config = &self.config;
        let partition = &self.partition;
        let ordered_bins = &self.ordered_bins;
        let is_feature_used = &self.is_feature_used;
        let has_parent = self.has_parent_histogram;

        let smaller = &mut self.smaller_leaf_splits;
        let larger = &mut self.larger_leaf_splits;

        let smaller_leaf = match smaller.leaf_index() {
            Some(leaf) => leaf,
            None => return,
        };
        let smaller_count = smaller.num_data_in_leaf();
        let smaller_sum_g = smaller.sum_gradients();
        let smaller_sum_h = smaller.sum_hessians();
        let smaller_rows = partition.leaf_indices(smaller_leaf);
        let (smaller_g, smaller_h): (&[f32], &[f32]) = if self.root_uses_global_gradients {
            (gradients, hessians)
        } else {
            (
                &self.ordered_gradients[..smaller_count],
                &self.ordered_hessians[..smaller_count],
            )
        };

        match (self.smaller_slot, self.larger_slot, larger.leaf_index()) {
            (Some(smaller_slot), Some(larger_slot), Some(larger_leaf)) => {
                let larger_count = larger.num_data_in_leaf();
                let larger_sum_g = larger.sum_gradients();
                let larger_sum_h = larger.sum_hessians();
                let larger_rows = partition.leaf_indices(larger_leaf);
                let larger_g = &self.ordered_gradients[smaller_count..smaller_count + larger_count];
                let larger_h = &self.ordered_hessians[smaller_count..smaller_count + larger_count];

                let (smaller_hists, larger_hists) =
                    self.pool.slot_pair_mut(smaller_slot, larger_slot);

                smaller_hists
                    .par_iter_mut()
                    .zip(larger_hists.par_iter_mut())
                    .zip(smaller.best_split_per_feature_mut().par_iter_mut())
                    .zip(larger.best_split_per_feature_mut().par_iter_mut())
                    .enumerate()
                    .for_each(|(f, (((s_hist, l_hist), s_best), l_best))| {
                        if !is_feature_used[f] {
                            return;
                        }
                        // Monotone pruning: the parent's histograms sit in the
                        // larger child's array; a feature the parent could not
                        // split stays unsplittable in both children.
                        if has_parent && !l_hist.is_splittable() {
                            s_hist.set_splittable(false);
                            return;
                        }

                        match &ordered_bins[f] {
                            Some(bin) => s_hist.construct_ordered(
                                bin.leaf_entries(smaller_leaf),
                                smaller_count,
                                smaller_sum_g,
                                smaller_sum_h,
                                gradients,
                                hessians,
                            ),
                            None => match dataset.feature(f).bin_data() {
                                BinData::Dense(column) => s_hist.construct_dense(
                                    column,
                                    smaller_rows,
                                    smaller_g,
                                    smaller_h,
                                ),
                                BinData::Sparse(_) => {
                                    unreachable!("sparse features carry an ordered bin")
                                }
                            },
                        }
                        *s_best = s_hist.find_best_threshold(
                            smaller_count,
                            smaller_sum_g,
                            smaller_sum_h,
                            config,
                        );

                        if has_parent {
                            l_hist.subtract(s_hist);
                        } else {
                            match &ordered_bins[f] {
                                Some(bin) => l_hist.construct_ordered(
                                    bin.leaf_entries(larger_leaf),
                                    larger_count,
                                    larger_sum_g,
                                    larger_sum_h,
                                    gradients,
                                    hessians,
                                ),
                                None => match dataset.feature(f).bin_data() {
                                    BinData::Dense(column) => l_hist.construct_dense(
                                        column,
                                        larger_rows,
                                        larger_g,
                                        larger_h,
                                    ),
                                    BinData::Sparse(_) => {
                                        unreachable!("sparse features carry an ordered bin")
                                    }
                                },
                            }
                        }
                        *l_best = l_hist.find_best_threshold(
                            larger_count,
                            larger_sum_g,
                            larger_sum_h,
                            config,
                        );
                    });

                self.best_split_per_leaf[smaller_leaf] =
                    Self::best_over_features(is_feature_used, smaller.best_split_per_feature());
                self.best_split_per_leaf[larger_leaf] =
                    Self::best_over_features(is_feature_used, larger.best_split_per_feature());
            }
            (Some(smaller_slot), _, _) => {
                let smaller_hists = self.pool.slot_mut(smaller_slot);
                smaller_hists
                    .par_iter_mut()
                    .zip(smaller.best_split_per_feature_mut().par_iter_mut())
                    .enumerate()
                    .for_each(|(f, (s_hist, s_best))| {
                        if !is_feature_used[f] {
                            return;
                        }
                        match &ordered_bins[f] {
                            Some(bin) => s_hist.construct_ordered(
                                bin.leaf_entries(smaller_leaf),
                                smaller_count,
                                smaller_sum_g,
                                smaller_sum_h,
                                gradients,
                                hessians,
                            ),
                            None => match dataset.feature(f).bin_data() {
                                BinData::Dense(column) => s_hist.construct_dense(
                                    column,
                                    smaller_rows,
                                    smaller_g,
                                    smaller_h,
                                ),
                                BinData::Sparse(_) => {
                                    unreachable!("sparse features carry an ordered bin")
                                }
                            },
                        }
                        *s_best = s_hist.find_best_threshold(
                            smaller_count,
                            smaller_sum_g,
                            smaller_sum_h,
                            config,
                        );
                    });

                self.best_split_per_leaf[smaller_leaf] =
                    Self::best_over_features(is_feature_used, smaller.best_split_per_feature());
            }
            _ => {}
        }
    }

    /// Best split across the sampled features; ties keep the lowest feature.
    fn best_over_features(is_feature_used: &[bool], splits: &[SplitInfo]) -> SplitInfo {
        let mut best = SplitInfo::default();
        for (f, split) in splits.iter().enumerate() {
            if is_feature_used[f] && split.gain > best.gain {
                best = split.clone();
            }
        }
        best
    }

    /// Index of the leaf with the highest pending gain.
    fn arg_max_gain(splits: &[SplitInfo]) -> usize {
        let mut best = 0;
        for (leaf, split) in splits.iter().enumerate() {
            if split.gain > splits[best].gain {
                best = leaf;
            }
        }
        best
    }

    // ------------------------------------------------------------------
    // Split application
    // ------------------------------------------------------------------

    /// Apply the chosen split: grow the tree, repartition the rows, and seed
    /// the two children's leaf state from the split's stored sums.
    fn split(&mut self, dataset: &Dataset, tree: &mut Tree, best_leaf: usize) -> (usize, usize) {
        let info = self.best_split_per_leaf[best_leaf].clone();
        let feature = dataset.feature(info.feature);

        let right_leaf = tree.split(
            best_leaf,
            info.feature,
            info.threshold,
            feature.feature_index(),
            feature.bin_to_value(info.threshold),
            info.left_output,
            info.right_output,
            info.gain,
        );

        self.partition
            .split(best_leaf, feature.bin_data(), info.threshold, right_leaf);

        if info.left_count < info.right_count {
            self.smaller_leaf_splits.init_with_sums(
                best_leaf,
                self.partition.leaf_count(best_leaf),
                info.left_sum_gradient,
                info.left_sum_hessian,
            );
            self.larger_leaf_splits.init_with_sums(
                right_leaf,
                self.partition.leaf_count(right_leaf),
                info.right_sum_gradient,
                info.right_sum_hessian,
            );
        } else {
            self.smaller_leaf_splits.init_with_sums(
                right_leaf,
                self.partition.leaf_count(right_leaf),
                info.right_sum_gradient,
                info.right_sum_hessian,
            );
            self.larger_leaf_splits.init_with_sums(
                best_leaf,
                self.partition.leaf_count(best_leaf),
                info.left_sum_gradient,
                info.left_sum_hessian,
            );
        }
        (best_leaf, right_leaf)
    }
}

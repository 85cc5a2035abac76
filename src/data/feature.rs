//! A pre-binned feature column and its thread-partitioned builder.

use super::bin_data::{BinData, SPARSE_RATE_THRESHOLD};
use super::bin_mapper::BinMapper;
use super::dense::DenseBin;
use super::sparse::SparseBin;

// ============================================================================
// Feature
// ============================================================================

/// One used feature: its mapper, its immutable bin column, and the index it
/// had in the original column space (the index written into trees).
#[derive(Clone, Debug)]
pub struct Feature {
    feature_index: usize,
    bin_mapper: BinMapper,
    bin_data: BinData,
}

impl Feature {
    pub(crate) fn new(feature_index: usize, bin_mapper: BinMapper, bin_data: BinData) -> Self {
        Self {
            feature_index,
            bin_mapper,
            bin_data,
        }
    }

    /// Index of this feature in the original (pre-drop) column space.
    #[inline]
    pub fn feature_index(&self) -> usize {
        self.feature_index
    }

    /// Number of bins.
    #[inline]
    pub fn num_bin(&self) -> usize {
        self.bin_mapper.num_bin()
    }

    /// The value→bin mapping.
    #[inline]
    pub fn bin_mapper(&self) -> &BinMapper {
        &self.bin_mapper
    }

    /// The bin column.
    #[inline]
    pub fn bin_data(&self) -> &BinData {
        &self.bin_data
    }

    /// Representative real value of a bin (used for tree thresholds).
    #[inline]
    pub fn bin_to_value(&self, bin: u32) -> f64 {
        self.bin_mapper.bin_to_value(bin)
    }
}

// ============================================================================
// FeatureBuilder
// ============================================================================

/// Collects one feature's values during extraction and freezes them into a
/// [`Feature`].
///
/// Extraction is parallel over disjoint row ranges: each worker owns one
/// [`ThreadPart`] and pushes its rows in increasing order;
/// [`FeatureBuilder::finish_load`] merges the parts in row order. No worker
/// ever writes another's range, so the merge is a plain ordered
/// concatenation.
#[derive(Debug)]
pub struct FeatureBuilder {
    feature_index: usize,
    bin_mapper: BinMapper,
    num_data: usize,
    enable_sparse: bool,
    parts: Vec<ThreadPart>,
}

/// Per-thread ordered `(row, bin)` buffer.
#[derive(Debug)]
pub struct ThreadPart {
    mapper: BinMapper,
    pairs: Vec<(u32, u32)>,
}

impl ThreadPart {
    /// Record `value` for `row`. Rows must arrive in increasing order within
    /// a part.
    #[inline]
    pub fn push(&mut self, row: u32, value: f64) {
        debug_assert!(self.pairs.last().map_or(true, |&(r, _)| r < row));
        self.pairs.push((row, self.mapper.value_to_bin(value)));
    }
}

impl FeatureBuilder {
    /// Create a builder with `num_parts` thread-local buffers.
    pub fn new(
        feature_index: usize,
        bin_mapper: BinMapper,
        num_data: usize,
        enable_sparse: bool,
        num_parts: usize,
    ) -> Self {
        let parts = (0..num_parts)
            .map(|_| ThreadPart {
                mapper: bin_mapper.clone(),
                pairs: Vec::new(),
            })
            .collect();
        Self {
            feature_index,
            bin_mapper,
            num_data,
            enable_sparse,
            parts,
        }
    }

    /// The per-thread buffers, for parallel extraction.
    pub fn parts_mut(&mut self) -> &mut [ThreadPart] {
        &mut self.parts
    }

    /// Merge the thread buffers in row order and freeze the column.
    ///
    /// Sparse storage is chosen when the sampled zero-rate is high enough and
    /// zero maps to bin 0 (so omitted rows really are the default bin);
    /// otherwise the column is dense at the minimal width, with unpushed rows
    /// set to the zero bin.
    pub fn finish_load(mut self) -> Feature {
        // Parts own disjoint, ordered row ranges: sort by first row, concat.
        self.parts.retain(|p| !p.pairs.is_empty());
        self.parts.sort_by_key(|p| p.pairs[0].0);
        let mut pairs: Vec<(u32, u32)> = Vec::with_capacity(
            self.parts.iter().map(|p| p.pairs.len()).sum(),
        );
        for part in &self.parts {
            debug_assert!(pairs.last().map_or(true, |&(r, _)| r < part.pairs[0].0));
            pairs.extend_from_slice(&part.pairs);
        }

        let zero_bin = self.bin_mapper.value_to_bin(0.0);
        let use_sparse = self.enable_sparse
            && self.bin_mapper.sparse_rate() > SPARSE_RATE_THRESHOLD
            && zero_bin == 0;

        let bin_data = if use_sparse {
            BinData::Sparse(SparseBin::from_pairs(self.num_data, &pairs))
        } else {
            BinData::Dense(DenseBin::from_pairs(
                self.num_data,
                self.bin_mapper.num_bin(),
                zero_bin,
                &pairs,
            ))
        };

        Feature::new(self.feature_index, self.bin_mapper, bin_data)
    }
}

// ============================================================================
// Tests
// ============================================================================

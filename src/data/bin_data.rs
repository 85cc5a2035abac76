//! Unified bin column storage.
//!
//! A [`BinData`] is either dense (one packed bin index per row) or sparse
//! (explicit non-default entries over an implicit bin-0 background). The
//! representation is chosen once when the feature is built and never changes;
//! split application and histogram construction branch on it.

use super::dense::DenseBin;
use super::sparse::{OrderedBin, SparseBin};

/// Zero-fraction above which a column is stored sparse.
pub(crate) const SPARSE_RATE_THRESHOLD: f64 = 0.8;

/// Bin column of one feature.
#[derive(Clone, Debug)]
pub enum BinData {
    /// Packed per-row bin indices.
    Dense(DenseBin),
    /// Non-default `(row, bin)` entries; omitted rows are bin 0.
    Sparse(SparseBin),
}

impl BinData {
    /// Number of rows.
    #[inline]
    pub fn len(&self) -> usize {
        match self {
            Self::Dense(d) => d.len(),
            Self::Sparse(s) => s.len(),
        }
    }

    /// True when the column holds no rows.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bin index of a row. O(1) for dense columns, O(log nnz) for sparse.
    ///
    /// Split application is the only hot caller on the sparse path, and a
    /// split lands on a sparse feature far less often than histograms are
    /// built over it.
    #[inline]
    pub fn bin(&self, row: u32) -> u32 {
        match self {
            Self::Dense(d) => d.bin(row),
            Self::Sparse(s) => s.bin(row),
        }
    }

    /// True for sparse storage.
    #[inline]
    pub fn is_sparse(&self) -> bool {
        matches!(self, Self::Sparse(_))
    }

    /// Leaf-aware iterator state for sparse columns; `None` for dense ones.
    /// The learner keeps one per sparse feature for the lifetime of training.
    pub fn create_ordered_bin(&self, num_leaves: usize) -> Option<OrderedBin> {
        match self {
            Self::Dense(_) => None,
            Self::Sparse(s) => Some(s.create_ordered_bin(num_leaves)),
        }
    }
}

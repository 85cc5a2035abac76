//! Pre-binned feature representation.
//!
//! - [`bin_mapper`] - Value→bin boundary selection and lookup
//! - [`dense`] / [`sparse`] - The two column storage forms
//! - [`bin_data`] - Width/representation-tagged column wrapper
//! - [`feature`] - A used feature and its thread-partitioned builder
//! - [`dataset`] - Dataset assembly, local or distributed
//! - [`io`] - Binary persistence

pub mod bin_data;
pub mod bin_mapper;
pub mod dataset;
pub mod dense;
pub mod feature;
pub mod io;
pub mod sparse;

pub use bin_data::BinData;
pub use bin_mapper::BinMapper;
pub use dataset::{Dataset, DatasetBuilder, IoConfig};
pub use dense::DenseBin;
pub use feature::{Feature, FeatureBuilder};
pub use sparse::{OrderedBin, SparseBin, SparsePair};

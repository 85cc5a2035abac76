//! Leaf-wise tree training.
//!
//! - [`config`] - Tree growth parameters
//! - [`split`] - Split descriptions and gain arithmetic
//! - [`histogram`] - Per-feature gradient histograms and threshold search
//! - [`pool`] - Bounded per-leaf histogram storage
//! - [`partition`] - Row index partitioning across leaves
//! - [`leaf_splits`] - Per-leaf aggregate state
//! - [`learner`] - The serial leaf-wise orchestrator

pub mod config;
pub mod histogram;
pub mod leaf_splits;
pub mod learner;
pub mod partition;
pub mod pool;
pub mod split;

pub use config::TreeConfig;
pub use histogram::{FeatureHistogram, HistogramEntry};
pub use leaf_splits::LeafSplits;
pub use learner::SerialTreeLearner;
pub use partition::DataPartition;
pub use pool::{HistogramPool, SlotId};
pub use split::{leaf_gain, leaf_output, split_gain, SplitInfo};

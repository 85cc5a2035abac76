//! leafwise: a histogram-based leaf-wise tree learner for gradient boosting.
//!
//! Given per-row gradients and hessians of a loss, [`SerialTreeLearner`] grows a
//! single regression tree over a pre-binned [`Dataset`], using histogram
//! subtraction and ordered sparse bins to keep split finding cheap. A small
//! socket-based collective layer synchronizes bin mappers across machines.

pub mod data;
pub mod error;
pub mod network;
pub mod training;
pub mod tree;

pub use data::{BinMapper, Dataset, DatasetBuilder, Feature, IoConfig};
pub use error::{DataError, NetworkError};
pub use network::{Network, NetworkConfig};
pub use training::{SerialTreeLearner, SplitInfo, TreeConfig};
pub use tree::Tree;

//! Error types shared across the crate.

use std::io;

/// Errors raised while building, loading or saving a binned dataset.
#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid configuration: {name} = {value} ({reason})")]
    InvalidConfig {
        name: &'static str,
        value: String,
        reason: &'static str,
    },

    #[error("binary dataset format error at {step}")]
    BinaryFormat { step: &'static str },

    #[error("dataset has no usable feature (all {0} columns are trivial or ignored)")]
    NoUsableFeature(usize),

    #[error("dataset is empty")]
    EmptyDataset,

    #[error("column {column} has {got} rows, expected {expected}")]
    ColumnLength {
        column: usize,
        got: usize,
        expected: usize,
    },

    #[error("bin mapper synchronization failed: {0}")]
    Network(#[from] NetworkError),
}

/// Errors raised by the distributed communication layer.
#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("machine list file {path} does not exist or is empty")]
    EmptyMachineList { path: String },

    #[error("machine list contains {got} machines, {expected} declared")]
    MachineCountMismatch { got: usize, expected: usize },

    #[error("machine list does not contain the local machine (listen port {port})")]
    LocalRankNotFound { port: u16 },

    #[error("cannot bind listen port {port}: {source}")]
    Bind { port: u16, source: io::Error },

    #[error("rank {rank} unreachable after {attempts} connection attempts")]
    UnreachableRank { rank: usize, attempts: usize },

    #[error("allgather layout mismatch: block lengths sum to {got}, buffer is {expected}")]
    AllgatherLayout { got: usize, expected: usize },
}

/// Convenience alias for dataset operations.
pub type DataResult<T> = Result<T, DataError>;

/// Convenience alias for network operations.
pub type NetworkResult<T> = Result<T, NetworkError>;

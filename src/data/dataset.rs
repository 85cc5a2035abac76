//! Pre-binned dataset construction.
//!
//! A [`Dataset`] is a fixed N×F block of bin indices plus the per-feature
//! [`BinMapper`]s that produced them. The builder samples each raw column,
//! selects bin boundaries (locally, or across machines through the
//! all-gather), drops trivial features, and extracts the columns with the
//! thread-partitioned push discipline.

use log::{info, warn};
use rand::Rng;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;

use crate::error::{DataError, DataResult};
use crate::network::Network;

use super::bin_mapper::BinMapper;
use super::feature::{Feature, FeatureBuilder};

// ============================================================================
// IoConfig
// ============================================================================

/// Options for dataset construction.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct IoConfig {
    /// Upper limit on bins per feature.
    pub max_bin: usize,
    /// Allow sparse storage for mostly-zero columns.
    pub enable_sparse: bool,
    /// Number of rows sampled for bin boundary selection.
    pub bin_sample_count: usize,
    /// Seed for the binning sample.
    pub data_random_seed: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            max_bin: 256,
            enable_sparse: true,
            bin_sample_count: 50_000,
            data_random_seed: 1,
        }
    }
}

// ============================================================================
// Dataset
// ============================================================================

/// Immutable pre-binned training data.
#[derive(Clone, Debug)]
pub struct Dataset {
    pub(crate) num_data: usize,
    pub(crate) global_num_data: u64,
    pub(crate) max_bin: usize,
    pub(crate) enable_sparse: bool,
    pub(crate) features: Vec<Feature>,
    /// Original column index → used feature index, or -1 when dropped.
    pub(crate) used_feature_map: Vec<i32>,
    pub(crate) feature_names: Vec<String>,
}

impl Dataset {
    /// Number of rows.
    #[inline]
    pub fn num_data(&self) -> usize {
        self.num_data
    }

    /// Number of used (non-trivial) features.
    #[inline]
    pub fn num_features(&self) -> usize {
        self.features.len()
    }

    /// Number of columns before trivial features were dropped.
    #[inline]
    pub fn num_total_features(&self) -> usize {
        self.used_feature_map.len()
    }

    /// A used feature by inner index.
    #[inline]
    pub fn feature(&self, i: usize) -> &Feature {
        &self.features[i]
    }

    /// All used features.
    #[inline]
    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    /// Original column index → used feature index (-1 when dropped).
    #[inline]
    pub fn used_feature_map(&self) -> &[i32] {
        &self.used_feature_map
    }

    /// Column names (defaulted to `Column_<i>` when not supplied).
    #[inline]
    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }
}

// ============================================================================
// DatasetBuilder
// ============================================================================

/// Builds a [`Dataset`] from raw column-major values.
#[derive(Clone, Debug, Default)]
pub struct DatasetBuilder {
    io: IoConfig,
    feature_names: Option<Vec<String>>,
}

impl DatasetBuilder {
    /// Create a builder with the given construction options.
    pub fn new(io: IoConfig) -> Self {
        Self {
            io,
            feature_names: None,
        }
    }

    /// Supply column names; defaults to `Column_<i>` otherwise.
    pub fn feature_names(mut self, names: Vec<String>) -> Self {
        self.feature_names = Some(names);
        self
    }

    /// Build from raw columns on a single machine.
    pub fn from_columns(&self, columns: &[Vec<f64>]) -> DataResult<Dataset> {
        let mut network = Network::single_machine();
        self.from_columns_distributed(columns, &mut network)
    }

    /// Build from raw columns, synchronizing bin mappers across machines.
    ///
    /// Rows are machine-local; bin boundaries are found for a contiguous
    /// stripe of features per machine and exchanged through the all-gather as
    /// fixed-size records, so every machine ends up with identical mappers.
    pub fn from_columns_distributed(
        &self,
        columns: &[Vec<f64>],
        network: &mut Network,
    ) -> DataResult<Dataset> {
        if columns.is_empty() || columns[0].is_empty() {
            return Err(DataError::EmptyDataset);
        }
        let num_data = columns[0].len();
        for (i, col) in columns.iter().enumerate() {
            if col.len() != num_data {
                return Err(DataError::ColumnLength {
                    column: i,
                    got: col.len(),
                    expected: num_data,
                });
            }
        }
        if self.io.max_bin < 2 {
            return Err(DataError::InvalidConfig {
                name: "max_bin",
                value: self.io.max_bin.to_string(),
                reason: "must be at least 2",
            });
        }

        let sample_rows = self.sample_rows(num_data);
        let mappers = if network.num_machines() <= 1 {
            self.find_bins_local(columns, &sample_rows)
        } else {
            self.find_bins_distributed(columns, &sample_rows, network)?
        };

        self.assemble(columns, num_data, mappers)
    }

    /// Row indices used for bin boundary selection.
    fn sample_rows(&self, num_data: usize) -> Vec<usize> {
        let sample_cnt = self.io.bin_sample_count.min(num_data);
        if sample_cnt == num_data {
            return (0..num_data).collect();
        }
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.io.data_random_seed);
        let mut indices: Vec<usize> = (0..num_data).collect();
        for i in 0..sample_cnt {
            let j = rng.gen_range(i..num_data);
            indices.swap(i, j);
        }
        let mut sampled = indices[..sample_cnt].to_vec();
        sampled.sort_unstable();
        sampled
    }

    /// Find bin boundaries for every column on this machine.
    fn find_bins_local(&self, columns: &[Vec<f64>], sample_rows: &[usize]) -> Vec<BinMapper> {
        columns
            .par_iter()
            .map(|col| {
                let sample: Vec<f64> = sample_rows.iter().map(|&r| col[r]).collect();
                BinMapper::find_bin(&sample, self.io.max_bin)
            })
            .collect()
    }

    /// Find bin boundaries for a stripe of columns and all-gather the rest.
    ///
    /// Machine `r` handles columns `[start[r], start[r] + len[r])` with
    /// `step = ceil(F / M)`; records are `BinMapper::serialized_size(max_bin)`
    /// bytes each so the gathered layout is computable on every machine.
    fn find_bins_distributed(
        &self,
        columns: &[Vec<f64>],
        sample_rows: &[usize],
        network: &mut Network,
    ) -> DataResult<Vec<BinMapper>> {
        let num_total = columns.len();
        let machines = network.num_machines();
        let rank = network.rank();
        let step = num_total.div_ceil(machines).max(1);

        let starts: Vec<usize> = (0..machines).map(|m| (m * step).min(num_total)).collect();
        let lens: Vec<usize> = (0..machines)
            .map(|m| ((m + 1) * step).min(num_total) - starts[m])
            .collect();

        let record = BinMapper::serialized_size(self.io.max_bin);
        let mut input = vec![0u8; lens[rank] * record];
        let local: Vec<BinMapper> = columns[starts[rank]..starts[rank] + lens[rank]]
            .par_iter()
            .map(|col| {
                let sample: Vec<f64> = sample_rows.iter().map(|&r| col[r]).collect();
                BinMapper::find_bin(&sample, self.io.max_bin)
            })
            .collect();
        for (i, mapper) in local.iter().enumerate() {
            mapper.copy_to(&mut input[i * record..(i + 1) * record]);
        }

        let byte_starts: Vec<usize> = starts.iter().map(|s| s * record).collect();
        let byte_lens: Vec<usize> = lens.iter().map(|l| l * record).collect();
        let mut output = vec![0u8; num_total * record];
        network.allgather(&input, &byte_starts, &byte_lens, &mut output)?;

        Ok((0..num_total)
            .map(|i| BinMapper::copy_from(&output[i * record..(i + 1) * record]))
            .collect())
    }

    /// Drop trivial features and extract the surviving columns.
    fn assemble(
        &self,
        columns: &[Vec<f64>],
        num_data: usize,
        mappers: Vec<BinMapper>,
    ) -> DataResult<Dataset> {
        let num_total = columns.len();
        let feature_names: Vec<String> = match &self.feature_names {
            Some(names) => names.clone(),
            None => (0..num_total).map(|i| format!("Column_{i}")).collect(),
        };

        let mut used_feature_map = vec![-1i32; num_total];
        let mut kept: Vec<(usize, BinMapper)> = Vec::new();
        for (i, mapper) in mappers.into_iter().enumerate() {
            if mapper.is_trivial() {
                warn!(
                    "feature {} only contains one value, will be ignored",
                    feature_names[i]
                );
            } else {
                used_feature_map[i] = kept.len() as i32;
                kept.push((i, mapper));
            }
        }
        if kept.is_empty() {
            return Err(DataError::NoUsableFeature(num_total));
        }

        let num_parts = rayon::current_num_threads().max(1);
        let chunk = num_data.div_ceil(num_parts);
        let features: Vec<Feature> = kept
            .into_par_iter()
            .map(|(col_idx, mapper)| {
                let col = &columns[col_idx];
                let mut builder =
                    FeatureBuilder::new(col_idx, mapper, num_data, self.io.enable_sparse, num_parts);
                builder
                    .parts_mut()
                    .par_iter_mut()
                    .zip(col.par_chunks(chunk))
                    .enumerate()
                    .for_each(|(part_idx, (part, rows))| {
                        let base = (part_idx * chunk) as u32;
                        for (off, &value) in rows.iter().enumerate() {
                            part.push(base + off as u32, value);
                        }
                    });
                builder.finish_load()
            })
            .collect();

        info!(
            "constructed dataset: {} rows, {} of {} features used",
            num_data,
            features.len(),
            num_total
        );

        Ok(Dataset {
            num_data,
            global_num_data: num_data as u64,
            max_bin: self.io.max_bin,
            enable_sparse: self.io.enable_sparse,
            features,
            used_feature_map,
            feature_names,
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

//! Tree learner configuration.

use crate::error::{DataError, DataResult};

/// Parameters controlling a single tree's growth.
///
/// These are static for the lifetime of a learner and control leaf-wise
/// expansion, admissibility constraints, regularization, feature sampling and
/// histogram memory.
#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TreeConfig {
    /// Maximum number of leaves per tree. Must be at least 2.
    pub num_leaves: usize,
    /// Minimum rows on each side of an admissible split.
    pub min_data_in_leaf: usize,
    /// Minimum hessian sum on each side of an admissible split.
    pub min_sum_hessian_in_leaf: f64,
    /// Fraction of features considered per tree, in (0, 1].
    pub feature_fraction: f64,
    /// Seed for the feature-fraction sampler.
    pub feature_fraction_seed: u64,
    /// Histogram pool budget in MiB; negative means unbounded.
    pub histogram_pool_size_mb: f64,
    /// Maximum leaf depth; zero or negative means unlimited.
    pub max_depth: i32,
    /// L2 regularization constant λ in the gain and output formulas.
    pub lambda_l2: f64,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            num_leaves: 127,
            min_data_in_leaf: 100,
            min_sum_hessian_in_leaf: 10.0,
            feature_fraction: 1.0,
            feature_fraction_seed: 2,
            histogram_pool_size_mb: -1.0,
            max_depth: -1,
            lambda_l2: 0.0,
        }
    }
}

impl TreeConfig {
    /// Validate the configuration, naming the offending value on failure.
    pub fn validate(&self) -> DataResult<()> {
        if self.num_leaves < 2 {
            return Err(DataError::InvalidConfig {
                name: "num_leaves",
                value: self.num_leaves.to_string(),
                reason: "a tree needs at least 2 leaves",
            });
        }
        if !(self.feature_fraction > 0.0 && self.feature_fraction <= 1.0) {
            return Err(DataError::InvalidConfig {
                name: "feature_fraction",
                value: self.feature_fraction.to_string(),
                reason: "must be in (0, 1]",
            });
        }
        if self.min_sum_hessian_in_leaf < 0.0 {
            return Err(DataError::InvalidConfig {
                name: "min_sum_hessian_in_leaf",
                value: self.min_sum_hessian_in_leaf.to_string(),
                reason: "must be non-negative",
            });
        }
        if self.lambda_l2 < 0.0 {
            return Err(DataError::InvalidConfig {
                name: "lambda_l2",
                value: self.lambda_l2.to_string(),
                reason: "must be non-negative",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(TreeConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_values_name_the_field() {
        let config = TreeConfig {
            num_leaves: 1,
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("num_leaves"));

        let config = TreeConfig {
            feature_fraction: 0.0,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("feature_fraction"));
    }
}

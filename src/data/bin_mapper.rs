//! Mapping from raw feature values to bin indices.
//!
//! A [`BinMapper`] is built once per feature from a sample of its values and is
//! immutable afterwards. It owns the bin boundaries, answers value→bin lookups
//! during extraction, and converts a bin index back to a representative value
//! when a split threshold is written into a tree.
//!
//! Mappers also serialize to fixed-size records whose length depends only on
//! `max_bin`, so the distributed bin-discovery path can all-gather one
//! equal-sized block per feature.

// ============================================================================
// BinMapper
// ============================================================================

/// Mapping from continuous values to bin indices.
///
/// Bin `b` covers `(upper_bound[b-1], upper_bound[b]]`; the first bin is
/// unbounded below and lookups above the last bound clamp into the last bin.
#[derive(Clone, Debug, PartialEq)]
pub struct BinMapper {
    /// Upper (inclusive) bound of each bin, strictly increasing.
    bin_upper_bounds: Box<[f64]>,
    /// Fraction of sample values equal to zero.
    sparse_rate: f64,
}

impl BinMapper {
    /// Build a mapper from sampled values of one feature.
    ///
    /// Boundaries are chosen by quantile-weighted merging: adjacent distinct
    /// values are merged into one bin until the bin holds roughly
    /// `sample_len / max_bin` values, so bins are approximately
    /// equal-frequency while cuts fall on natural value gaps. Zero, when
    /// present, always gets a bin of its own; this is what lets sparse
    /// storage treat bin 0 as the implicit default.
    ///
    /// # Panics
    ///
    /// Panics if `max_bin < 2`.
    pub fn find_bin(sample_values: &[f64], max_bin: usize) -> Self {
        assert!(max_bin >= 2, "max_bin must be at least 2");

        if sample_values.is_empty() {
            return Self {
                bin_upper_bounds: Box::new([0.0]),
                sparse_rate: 1.0,
            };
        }

        let mut sorted: Vec<f64> = sample_values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).expect("feature values must be finite"));

        let zero_count = sorted.iter().filter(|v| **v == 0.0).count();
        let sparse_rate = zero_count as f64 / sorted.len() as f64;

        // Collapse to distinct values with multiplicities.
        let mut distinct: Vec<f64> = Vec::new();
        let mut counts: Vec<usize> = Vec::new();
        for &v in &sorted {
            match distinct.last() {
                Some(&last) if last == v => *counts.last_mut().unwrap() += 1,
                _ => {
                    distinct.push(v);
                    counts.push(1);
                }
            }
        }

        let bounds = if distinct.len() <= max_bin {
            // One bin per distinct value; cuts at midpoints.
            let mut bounds = Vec::with_capacity(distinct.len());
            for i in 0..distinct.len() - 1 {
                bounds.push((distinct[i] + distinct[i + 1]) / 2.0);
            }
            bounds.push(*distinct.last().unwrap());
            bounds
        } else {
            Self::quantile_bounds(&distinct, &counts, sorted.len(), max_bin)
        };

        Self {
            bin_upper_bounds: bounds.into_boxed_slice(),
            sparse_rate,
        }
    }

    /// Greedy quantile-weighted boundary selection for `distinct.len() > max_bin`.
    fn quantile_bounds(
        distinct: &[f64],
        counts: &[usize],
        sample_len: usize,
        max_bin: usize,
    ) -> Vec<f64> {
        let mean_bin_size = sample_len as f64 / max_bin as f64;
        let mut bounds = Vec::with_capacity(max_bin);
        let mut in_bin = 0usize;

        for i in 0..distinct.len() - 1 {
            in_bin += counts[i];
            if bounds.len() == max_bin - 1 {
                // Remaining values all fall into the last bin.
                break;
            }
            let at_zero = distinct[i] == 0.0 || distinct[i + 1] == 0.0;
            if at_zero || in_bin as f64 >= mean_bin_size {
                bounds.push((distinct[i] + distinct[i + 1]) / 2.0);
                in_bin = 0;
            }
        }
        bounds.push(*distinct.last().unwrap());
        bounds
    }

    /// Number of bins.
    #[inline]
    pub fn num_bin(&self) -> usize {
        self.bin_upper_bounds.len()
    }

    /// True when every sample value fell into a single bin; such features
    /// carry no split information and are dropped by the dataset builder.
    #[inline]
    pub fn is_trivial(&self) -> bool {
        self.bin_upper_bounds.len() <= 1
    }

    /// Fraction of sampled values equal to zero.
    #[inline]
    pub fn sparse_rate(&self) -> f64 {
        self.sparse_rate
    }

    /// Map a value to its bin by binary search over the upper bounds.
    #[inline]
    pub fn value_to_bin(&self, value: f64) -> u32 {
        let bounds = &self.bin_upper_bounds;
        let mut lo = 0usize;
        let mut hi = bounds.len() - 1;
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if value <= bounds[mid] {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }
        lo as u32
    }

    /// Representative value of a bin: its upper bound. Used to annotate tree
    /// thresholds with a real value.
    #[inline]
    pub fn bin_to_value(&self, bin: u32) -> f64 {
        self.bin_upper_bounds[bin as usize]
    }

    // ------------------------------------------------------------------
    // Fixed-size records
    // ------------------------------------------------------------------

    /// Serialized size of any mapper built with this `max_bin`.
    ///
    /// Depends only on `max_bin`, never on feature content, so all features
    /// can be exchanged as equal-sized records.
    pub const fn serialized_size(max_bin: usize) -> usize {
        // num_bin (u32) + pad (u32) + sparse_rate (f64) + max_bin bounds
        16 + max_bin * 8
    }

    /// Write this mapper into `buf`, which must be exactly
    /// [`Self::serialized_size`] bytes for the builder's `max_bin`.
    pub fn copy_to(&self, buf: &mut [u8]) {
        let n = self.bin_upper_bounds.len();
        debug_assert!(buf.len() >= Self::serialized_size(n));
        buf[..4].copy_from_slice(&(n as u32).to_le_bytes());
        buf[4..8].copy_from_slice(&0u32.to_le_bytes());
        buf[8..16].copy_from_slice(&self.sparse_rate.to_le_bytes());
        for (i, &b) in self.bin_upper_bounds.iter().enumerate() {
            let at = 16 + i * 8;
            buf[at..at + 8].copy_from_slice(&b.to_le_bytes());
        }
        for rest in buf[16 + n * 8..].chunks_exact_mut(8) {
            rest.copy_from_slice(&0f64.to_le_bytes());
        }
    }

    /// Reconstruct a mapper from a record written by [`Self::copy_to`].
    pub fn copy_from(buf: &[u8]) -> Self {
        let n = u32::from_le_bytes(buf[..4].try_into().unwrap()) as usize;
        let sparse_rate = f64::from_le_bytes(buf[8..16].try_into().unwrap());
        let mut bounds = Vec::with_capacity(n);
        for i in 0..n {
            let at = 16 + i * 8;
            bounds.push(f64::from_le_bytes(buf[at..at + 8].try_into().unwrap()));
        }
        Self {
            bin_upper_bounds: bounds.into_boxed_slice(),
            sparse_rate,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distinct_values_get_own_bins() {
        let mapper = BinMapper::find_bin(&[1.0, 2.0, 3.0, 4.0], 16);
        assert_eq!(mapper.num_bin(), 4);
        assert_eq!(mapper.value_to_bin(1.0), 0);
        assert_eq!(mapper.value_to_bin(2.0), 1);
        assert_eq!(mapper.value_to_bin(3.9), 3);
        // Midpoint boundaries: values just below a midpoint stay left.
        assert_eq!(mapper.value_to_bin(1.49), 0);
        assert_eq!(mapper.value_to_bin(1.51), 1);
    }

    #[test]
    fn constant_feature_is_trivial() {
        let mapper = BinMapper::find_bin(&[5.0; 100], 16);
        assert_eq!(mapper.num_bin(), 1);
        assert!(mapper.is_trivial());
    }

    #[test]
    fn merges_to_at_most_max_bin() {
        let values: Vec<f64> = (0..1000).map(|i| i as f64).collect();
        let mapper = BinMapper::find_bin(&values, 16);
        assert!(mapper.num_bin() <= 16);
        assert!(mapper.num_bin() >= 2);
        // Monotone boundaries.
        for b in 1..mapper.num_bin() {
            assert!(mapper.bin_to_value(b as u32) > mapper.bin_to_value(b as u32 - 1));
        }
        // Every bin catches at least one value.
        let mut per_bin = vec![0usize; mapper.num_bin()];
        for &v in &values {
            per_bin[mapper.value_to_bin(v) as usize] += 1;
        }
        for &c in &per_bin {
            assert!(c > 0);
        }
    }

    #[test]
    fn zero_keeps_its_own_bin() {
        // Mostly zeros with a dense positive tail; zero must not merge with it.
        let mut values = vec![0.0; 900];
        values.extend((1..200).map(|i| i as f64 / 10.0));
        let mapper = BinMapper::find_bin(&values, 8);
        let zero_bin = mapper.value_to_bin(0.0);
        assert_eq!(zero_bin, 0);
        assert_ne!(mapper.value_to_bin(0.1), zero_bin);
        assert!(mapper.sparse_rate() > 0.8);
    }

    #[test]
    fn lookups_clamp_to_outer_bins() {
        let mapper = BinMapper::find_bin(&[1.0, 2.0, 3.0], 16);
        assert_eq!(mapper.value_to_bin(-100.0), 0);
        assert_eq!(mapper.value_to_bin(100.0), mapper.num_bin() as u32 - 1);
    }

    #[test]
    fn fixed_size_record_round_trip() {
        let max_bin = 32;
        let a = BinMapper::find_bin(&[0.0, 0.0, 1.0, 2.0, 2.0, 7.5], max_bin);
        let b = BinMapper::find_bin(&(0..500).map(|i| (i % 97) as f64).collect::<Vec<_>>(), max_bin);

        let size = BinMapper::serialized_size(max_bin);
        let mut buf_a = vec![0u8; size];
        let mut buf_b = vec![0u8; size];
        a.copy_to(&mut buf_a);
        b.copy_to(&mut buf_b);
        assert_eq!(buf_a.len(), buf_b.len());

        assert_eq!(BinMapper::copy_from(&buf_a), a);
        assert_eq!(BinMapper::copy_from(&buf_b), b);
    }
}

//! Binary dataset persistence.
//!
//! The on-disk layout is little-endian and size-prefixed at every level so a
//! reader can verify each step before trusting it:
//!
//! ```text
//! u64  size_of_header
//! ---- header (size_of_header bytes) ----
//! u64  global_num_data
//! u8   is_enable_sparse
//! i32  max_bin
//! i32  num_data
//! i32  num_features
//! i32  num_total_features
//! u64  num_used_feature_map
//! i32[num_used_feature_map]  used_feature_map  (-1 = feature dropped)
//! per total feature: i32 name_len, name bytes
//! ---- metadata (u64 size prefix) ----
//! ---- per used feature: u64 size prefix, feature record ----
//! ```
//!
//! A feature record is `u32 feature_index`, the fixed-size bin-mapper record,
//! a one-byte storage tag, and the column payload.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::error::{DataError, DataResult};

use super::bin_data::BinData;
use super::bin_mapper::BinMapper;
use super::dataset::Dataset;
use super::dense::DenseBin;
use super::feature::Feature;
use super::sparse::SparseBin;

const TAG_DENSE_U8: u8 = 0;
const TAG_DENSE_U16: u8 = 1;
const TAG_DENSE_U32: u8 = 2;
const TAG_SPARSE: u8 = 3;

impl Dataset {
    /// Serialize into a writer using the binary layout above.
    pub fn save_binary<W: Write>(&self, writer: &mut W) -> DataResult<()> {
        // Header body first, so its size can be prefixed.
        let mut header: Vec<u8> = Vec::new();
        header.extend_from_slice(&self.global_num_data.to_le_bytes());
        header.push(self.enable_sparse as u8);
        header.extend_from_slice(&(self.max_bin as i32).to_le_bytes());
        header.extend_from_slice(&(self.num_data as i32).to_le_bytes());
        header.extend_from_slice(&(self.features.len() as i32).to_le_bytes());
        header.extend_from_slice(&(self.used_feature_map.len() as i32).to_le_bytes());
        header.extend_from_slice(&(self.used_feature_map.len() as u64).to_le_bytes());
        for &m in &self.used_feature_map {
            header.extend_from_slice(&m.to_le_bytes());
        }
        for name in &self.feature_names {
            header.extend_from_slice(&(name.len() as i32).to_le_bytes());
            header.extend_from_slice(name.as_bytes());
        }
        writer.write_all(&(header.len() as u64).to_le_bytes())?;
        writer.write_all(&header)?;

        // Metadata block. Labels, weights and queries live with the boosting
        // collaborator, so the block is empty but the size prefix stays.
        writer.write_all(&0u64.to_le_bytes())?;

        for feature in &self.features {
            let record = encode_feature(feature, self.max_bin);
            writer.write_all(&(record.len() as u64).to_le_bytes())?;
            writer.write_all(&record)?;
        }
        Ok(())
    }

    /// Deserialize from a reader; the inverse of [`Dataset::save_binary`].
    pub fn load_binary<R: Read>(reader: &mut R) -> DataResult<Dataset> {
        let header_size = read_u64(reader, "header size")? as usize;
        let header = read_block(reader, header_size, "header")?;
        let mut at = 0usize;

        let global_num_data = take_u64(&header, &mut at, "global_num_data")?;
        let enable_sparse = *header.get(at).ok_or(DataError::BinaryFormat {
            step: "is_enable_sparse",
        })? != 0;
        at += 1;
        let max_bin = take_i32(&header, &mut at, "max_bin")? as usize;
        let num_data = take_i32(&header, &mut at, "num_data")? as usize;
        let num_features = take_i32(&header, &mut at, "num_features")? as usize;
        let num_total_features = take_i32(&header, &mut at, "num_total_features")? as usize;
        let num_map = take_u64(&header, &mut at, "num_used_feature_map")? as usize;
        if num_map != num_total_features {
            return Err(DataError::BinaryFormat {
                step: "used_feature_map length",
            });
        }
        let mut used_feature_map = Vec::with_capacity(num_map);
        for _ in 0..num_map {
            used_feature_map.push(take_i32(&header, &mut at, "used_feature_map")?);
        }
        let mut feature_names = Vec::with_capacity(num_total_features);
        for _ in 0..num_total_features {
            let len = take_i32(&header, &mut at, "feature name length")? as usize;
            let bytes = header
                .get(at..at + len)
                .ok_or(DataError::BinaryFormat { step: "feature name" })?;
            at += len;
            feature_names.push(
                String::from_utf8(bytes.to_vec())
                    .map_err(|_| DataError::BinaryFormat { step: "feature name" })?,
            );
        }

        let metadata_size = read_u64(reader, "metadata size")? as usize;
        let _metadata = read_block(reader, metadata_size, "metadata")?;

        let mut features = Vec::with_capacity(num_features);
        for _ in 0..num_features {
            let record_size = read_u64(reader, "feature size")? as usize;
            let record = read_block(reader, record_size, "feature record")?;
            features.push(decode_feature(&record, num_data, max_bin)?);
        }

        Ok(Dataset {
            num_data,
            global_num_data,
            max_bin,
            enable_sparse,
            features,
            used_feature_map,
            feature_names,
        })
    }

    /// Save to a file path.
    pub fn save_binary_file<P: AsRef<Path>>(&self, path: P) -> DataResult<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.save_binary(&mut writer)
    }

    /// Load from a file path.
    pub fn load_binary_file<P: AsRef<Path>>(path: P) -> DataResult<Dataset> {
        let mut reader = BufReader::new(File::open(path)?);
        Self::load_binary(&mut reader)
    }
}

// ============================================================================
// Feature records
// ============================================================================

fn encode_feature(feature: &Feature, max_bin: usize) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&(feature.feature_index() as u32).to_le_bytes());

    let mapper_size = BinMapper::serialized_size(max_bin);
    let at = out.len();
    out.resize(at + mapper_size, 0);
    feature.bin_mapper().copy_to(&mut out[at..]);

    match feature.bin_data() {
        BinData::Dense(DenseBin::U8(data)) => {
            out.push(TAG_DENSE_U8);
            out.extend_from_slice(data);
        }
        BinData::Dense(DenseBin::U16(data)) => {
            out.push(TAG_DENSE_U16);
            for v in data.iter() {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        BinData::Dense(DenseBin::U32(data)) => {
            out.push(TAG_DENSE_U32);
            for v in data.iter() {
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        BinData::Sparse(sparse) => {
            out.push(TAG_SPARSE);
            out.extend_from_slice(&(sparse.entries().len() as u64).to_le_bytes());
            for pair in sparse.entries() {
                out.extend_from_slice(&pair.row.to_le_bytes());
                out.extend_from_slice(&pair.bin.to_le_bytes());
            }
        }
    }
    out
}

fn decode_feature(record: &[u8], num_data: usize, max_bin: usize) -> DataResult<Feature> {
    let mut at = 0usize;
    let feature_index = take_u32(record, &mut at, "feature index")? as usize;

    let mapper_size = BinMapper::serialized_size(max_bin);
    let mapper_bytes = record
        .get(at..at + mapper_size)
        .ok_or(DataError::BinaryFormat { step: "bin mapper" })?;
    let mapper = BinMapper::copy_from(mapper_bytes);
    at += mapper_size;

    let tag = *record
        .get(at)
        .ok_or(DataError::BinaryFormat { step: "bin data tag" })?;
    at += 1;
    let payload = &record[at..];

    let bin_data = match tag {
        TAG_DENSE_U8 => {
            expect_len(payload.len(), num_data, "dense u8 column")?;
            BinData::Dense(DenseBin::U8(payload.to_vec().into_boxed_slice()))
        }
        TAG_DENSE_U16 => {
            expect_len(payload.len(), num_data * 2, "dense u16 column")?;
            let data: Vec<u16> = payload
                .chunks_exact(2)
                .map(|c| u16::from_le_bytes([c[0], c[1]]))
                .collect();
            BinData::Dense(DenseBin::U16(data.into_boxed_slice()))
        }
        TAG_DENSE_U32 => {
            expect_len(payload.len(), num_data * 4, "dense u32 column")?;
            let data: Vec<u32> = payload
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect();
            BinData::Dense(DenseBin::U32(data.into_boxed_slice()))
        }
        TAG_SPARSE => {
            let mut sp = 0usize;
            let nnz = take_u64(payload, &mut sp, "sparse entry count")? as usize;
            expect_len(payload.len() - sp, nnz * 8, "sparse entries")?;
            let pairs: Vec<(u32, u32)> = payload[sp..]
                .chunks_exact(8)
                .map(|c| {
                    (
                        u32::from_le_bytes([c[0], c[1], c[2], c[3]]),
                        u32::from_le_bytes([c[4], c[5], c[6], c[7]]),
                    )
                })
                .collect();
            BinData::Sparse(SparseBin::from_pairs(num_data, &pairs))
        }
        _ => return Err(DataError::BinaryFormat { step: "bin data tag" }),
    };

    Ok(Feature::new(feature_index, mapper, bin_data))
}

// ============================================================================
// Little-endian helpers
// ============================================================================

fn read_u64<R: Read>(reader: &mut R, step: &'static str) -> DataResult<u64> {
    let mut buf = [0u8; 8];
    reader
        .read_exact(&mut buf)
        .map_err(|_| DataError::BinaryFormat { step })?;
    Ok(u64::from_le_bytes(buf))
}

fn read_block<R: Read>(reader: &mut R, len: usize, step: &'static str) -> DataResult<Vec<u8>> {
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .map_err(|_| DataError::BinaryFormat { step })?;
    Ok(buf)
}

fn take_u64(buf: &[u8], at: &mut usize, step: &'static str) -> DataResult<u64> {
    let bytes = buf
        .get(*at..*at + 8)
        .ok_or(DataError::BinaryFormat { step })?;
    *at += 8;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}

fn take_u32(buf: &[u8], at: &mut usize, step: &'static str) -> DataResult<u32> {
    let bytes = buf
        .get(*at..*at + 4)
        .ok_or(DataError::BinaryFormat { step })?;
    *at += 4;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn take_i32(buf: &[u8], at: &mut usize, step: &'static str) -> DataResult<i32> {
    let bytes = buf
        .get(*at..*at + 4)
        .ok_or(DataError::BinaryFormat { step })?;
    *at += 4;
    Ok(i32::from_le_bytes(bytes.try_into().unwrap()))
}

fn expect_len(got: usize, expected: usize, step: &'static str) -> DataResult<()> {
    if got == expected {
        Ok(())
    } else {
        Err(DataError::BinaryFormat { step })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::{DatasetBuilder, IoConfig};

    fn sample_dataset() -> Dataset {
        let mut sparse_col = vec![0.0; 32];
        sparse_col[3] = 1.0;
        sparse_col[9] = 2.0;
        sparse_col[20] = 1.0;
        let columns = vec![
            (0..32).map(|i| (i % 7) as f64).collect::<Vec<f64>>(),
            vec![5.0; 32], // trivial, dropped
            sparse_col,
        ];
        DatasetBuilder::new(IoConfig::default())
            .from_columns(&columns)
            .unwrap()
    }

    #[test]
    fn round_trip_preserves_everything() {
        let dataset = sample_dataset();
        let mut buf = Vec::new();
        dataset.save_binary(&mut buf).unwrap();
        let loaded = Dataset::load_binary(&mut buf.as_slice()).unwrap();

        assert_eq!(loaded.num_data(), dataset.num_data());
        assert_eq!(loaded.num_features(), dataset.num_features());
        assert_eq!(loaded.num_total_features(), dataset.num_total_features());
        assert_eq!(loaded.used_feature_map(), dataset.used_feature_map());
        assert_eq!(loaded.feature_names(), dataset.feature_names());

        for (a, b) in dataset.features().iter().zip(loaded.features()) {
            assert_eq!(a.feature_index(), b.feature_index());
            assert_eq!(a.num_bin(), b.num_bin());
            assert_eq!(a.bin_data().is_sparse(), b.bin_data().is_sparse());
            for row in 0..dataset.num_data() as u32 {
                assert_eq!(a.bin_data().bin(row), b.bin_data().bin(row));
            }
            for bin in 0..a.num_bin() as u32 {
                assert_eq!(a.bin_to_value(bin), b.bin_to_value(bin));
            }
        }
    }

    #[test]
    fn truncated_stream_names_the_step() {
        let dataset = sample_dataset();
        let mut buf = Vec::new();
        dataset.save_binary(&mut buf).unwrap();

        let err = Dataset::load_binary(&mut buf[..4].as_ref()).unwrap_err();
        assert!(matches!(err, DataError::BinaryFormat { step: "header size" }));

        let err = Dataset::load_binary(&mut buf[..20].as_ref()).unwrap_err();
        assert!(matches!(err, DataError::BinaryFormat { step: "header" }));
    }
}

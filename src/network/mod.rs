//! Multi-machine collective communication.
//!
//! - [`topology`] - Bruck and recursive-halving peer maps
//! - [`linkers`] - Machine-list parsing and connection establishment
//!
//! [`Network`] fronts the collective operations the rest of the crate uses;
//! today that is the variable-block-size all-gather the dataset builder runs
//! over fixed-size bin-mapper records.

pub mod linkers;
pub mod topology;

use std::io::{Read, Write};

use crate::error::{NetworkError, NetworkResult};

pub use linkers::{Linkers, NetworkConfig};
pub use topology::{BruckMap, RecursiveHalvingMap, RecursiveHalvingNodeType};

/// Handle to this process's place in the training cluster.
#[derive(Debug)]
pub struct Network {
    rank: usize,
    num_machines: usize,
    bruck: BruckMap,
    linkers: Option<Linkers>,
}

impl Network {
    /// A cluster of one: every collective degenerates to a local copy.
    pub fn single_machine() -> Self {
        Self {
            rank: 0,
            num_machines: 1,
            bruck: BruckMap::default(),
            linkers: None,
        }
    }

    /// Join the cluster described by `config`, establishing all peer links.
    pub fn new(config: &NetworkConfig) -> NetworkResult<Self> {
        let linkers = Linkers::new(config)?;
        let rank = linkers.rank();
        let num_machines = linkers.num_machines();
        if num_machines <= 1 {
            return Ok(Self::single_machine());
        }
        Ok(Self {
            rank,
            num_machines,
            bruck: BruckMap::construct(rank, num_machines),
            linkers: Some(linkers),
        })
    }

    /// This machine's rank.
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Number of machines in the cluster.
    #[inline]
    pub fn num_machines(&self) -> usize {
        self.num_machines
    }

    /// Bruck all-gather with per-rank block sizes.
    ///
    /// Rank `r` contributes `input` (its `block_len[r]` bytes); on return
    /// `output` holds every rank's block at `block_start[rank]`, identically
    /// on all machines. Blocks travel in `ceil(log2 m)` rounds, doubling the
    /// held prefix each round; all sizes are derivable from `block_len` on
    /// both ends, so no size headers go over the wire.
    pub fn allgather(
        &mut self,
        input: &[u8],
        block_start: &[usize],
        block_len: &[usize],
        output: &mut [u8],
    ) -> NetworkResult<()> {
        let m = self.num_machines;
        let total: usize = block_len.iter().sum();
        if total != output.len() || block_len.len() != m || input.len() != block_len[self.rank] {
            return Err(NetworkError::AllgatherLayout {
                got: total,
                expected: output.len(),
            });
        }

        if m <= 1 {
            output[block_start[0]..block_start[0] + input.len()].copy_from_slice(input);
            return Ok(());
        }
        let linkers = self.linkers.as_ref().expect("multi-machine network has linkers");

        // Working buffer in rotated order: virtual block j is the block of
        // real rank (rank + j) % m.
        let rotated_len = |j: usize| block_len[(self.rank + j) % m];
        let mut rotated_offset = Vec::with_capacity(m + 1);
        rotated_offset.push(0usize);
        for j in 0..m {
            rotated_offset.push(rotated_offset[j] + rotated_len(j));
        }

        let mut buffer = vec![0u8; total];
        buffer[..input.len()].copy_from_slice(input);

        let mut have = 1usize;
        for round in 0..self.bruck.k {
            let count = have.min(m - have);
            let send_bytes = rotated_offset[count];
            let recv_begin = rotated_offset[have];
            let recv_end = rotated_offset[have + count];

            let out_stream = linkers.stream(self.bruck.out_ranks[round])?;
            let in_stream = linkers.stream(self.bruck.in_ranks[round])?;

            let (head, tail) = buffer.split_at_mut(recv_begin);
            let send_slice = &head[..send_bytes];
            let recv_slice = &mut tail[..recv_end - recv_begin];

            // Send and receive concurrently; with blocking sockets a
            // one-sided ordering can deadlock once buffers fill.
            std::thread::scope(|scope| -> NetworkResult<()> {
                let sender = scope.spawn(move || {
                    let mut writer = out_stream;
                    writer.write_all(send_slice)
                });
                let mut reader = in_stream;
                reader.read_exact(recv_slice)?;
                sender.join().expect("send thread does not panic")?;
                Ok(())
            })?;

            have += count;
        }

        // Rotate back into rank order.
        for j in 0..m {
            let real = (self.rank + j) % m;
            let src = &buffer[rotated_offset[j]..rotated_offset[j + 1]];
            output[block_start[real]..block_start[real] + src.len()].copy_from_slice(src);
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

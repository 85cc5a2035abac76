//! Loopback integration tests for the collective layer.
//!
//! Each rank runs in its own thread on 127.0.0.1 with a distinct port and a
//! pinned-rank machine list, so connection establishment and the Bruck
//! all-gather run over real sockets.

use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use leafwise::data::{DatasetBuilder, IoConfig};
use leafwise::{Network, NetworkConfig};

/// Write one machine list per rank (same peers, pinned local rank).
fn machine_lists(base_port: u16, machines: usize) -> Vec<tempfile::NamedTempFile> {
    let peers: String = (0..machines)
        .map(|r| format!("127.0.0.1 {}\n", base_port + r as u16))
        .collect();
    (0..machines)
        .map(|rank| {
            let mut file = tempfile::NamedTempFile::new().unwrap();
            write!(file, "rank={rank}\n{peers}").unwrap();
            file
        })
        .collect()
}

fn config_for(path: PathBuf, rank: usize, base_port: u16, machines: usize) -> NetworkConfig {
    NetworkConfig {
        num_machines: machines,
        local_listen_port: base_port + rank as u16,
        machine_list_file: path,
        socket_timeout_minutes: 1,
        connect_retries: 100,
        connect_retry_delay: Duration::from_millis(50),
        ..Default::default()
    }
}

#[test]
fn allgather_round_trip_across_three_ranks() {
    let base_port = 47310;
    let machines = 3;
    let lists = machine_lists(base_port, machines);
    let paths: Vec<PathBuf> = lists.iter().map(|f| f.path().to_path_buf()).collect();

    // Unequal block sizes: rank r contributes r + 2 bytes of value r.
    let block_len: Vec<usize> = (0..machines).map(|r| r + 2).collect();
    let mut block_start = vec![0usize];
    for r in 0..machines {
        block_start.push(block_start[r] + block_len[r]);
    }
    let total = block_start[machines];

    let handles: Vec<_> = (0..machines)
        .map(|rank| {
            let path = paths[rank].clone();
            let block_start = block_start.clone();
            let block_len = block_len.clone();
            thread::spawn(move || {
                let mut network =
                    Network::new(&config_for(path, rank, base_port, machines)).unwrap();
                assert_eq!(network.rank(), rank);
                assert_eq!(network.num_machines(), machines);

                let input = vec![rank as u8; block_len[rank]];
                let mut output = vec![0u8; total];
                network
                    .allgather(&input, &block_start[..machines], &block_len, &mut output)
                    .unwrap();
                output
            })
        })
        .collect();

    let outputs: Vec<Vec<u8>> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // Every rank holds the identical concatenation, with rank r's slice
    // equal to its input.
    let mut expected = Vec::new();
    for r in 0..machines {
        expected.extend(std::iter::repeat(r as u8).take(block_len[r]));
    }
    for output in &outputs {
        assert_eq!(output, &expected);
    }
}

#[test]
fn allgather_round_trip_across_four_ranks() {
    // Power-of-two peer count exercises the full-round-only path.
    let base_port = 47330;
    let machines = 4;
    let lists = machine_lists(base_port, machines);
    let paths: Vec<PathBuf> = lists.iter().map(|f| f.path().to_path_buf()).collect();

    let block_len = vec![4usize; machines];
    let block_start: Vec<usize> = (0..machines).map(|r| r * 4).collect();

    let handles: Vec<_> = (0..machines)
        .map(|rank| {
            let path = paths[rank].clone();
            let block_start = block_start.clone();
            let block_len = block_len.clone();
            thread::spawn(move || {
                let mut network =
                    Network::new(&config_for(path, rank, base_port, machines)).unwrap();
                let input: Vec<u8> = (0..4).map(|i| (rank * 4 + i) as u8).collect();
                let mut output = vec![0u8; 16];
                network
                    .allgather(&input, &block_start, &block_len, &mut output)
                    .unwrap();
                output
            })
        })
        .collect();

    let expected: Vec<u8> = (0u8..16).collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), expected);
    }
}

#[test]
fn distributed_bin_discovery_matches_local() {
    // Two ranks each hold the same raw columns; the striped bin discovery
    // plus all-gather must reproduce the single-machine mappers exactly.
    let base_port = 47350;
    let machines = 2;
    let lists = machine_lists(base_port, machines);
    let paths: Vec<PathBuf> = lists.iter().map(|f| f.path().to_path_buf()).collect();

    let columns: Vec<Vec<f64>> = vec![
        (0..300).map(|i| (i % 23) as f64).collect(),
        (0..300).map(|i| ((i * 7) % 51) as f64 / 3.0).collect(),
        (0..300).map(|i| if i % 9 == 0 { 1.0 } else { 0.0 }).collect(),
    ];

    let local = DatasetBuilder::new(IoConfig::default())
        .from_columns(&columns)
        .unwrap();

    let handles: Vec<_> = (0..machines)
        .map(|rank| {
            let path = paths[rank].clone();
            let columns = columns.clone();
            thread::spawn(move || {
                let mut network =
                    Network::new(&config_for(path, rank, base_port, machines)).unwrap();
                DatasetBuilder::new(IoConfig::default())
                    .from_columns_distributed(&columns, &mut network)
                    .unwrap()
            })
        })
        .collect();

    for handle in handles {
        let dataset = handle.join().unwrap();
        assert_eq!(dataset.num_features(), local.num_features());
        for (a, b) in dataset.features().iter().zip(local.features()) {
            assert_eq!(a.num_bin(), b.num_bin());
            assert_eq!(a.bin_mapper(), b.bin_mapper());
            for row in 0..dataset.num_data() as u32 {
                assert_eq!(a.bin_data().bin(row), b.bin_data().bin(row));
            }
        }
    }
}

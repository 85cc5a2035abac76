//! Peer connection establishment.
//!
//! Every peer binds its listen port, then connects outward to the
//! higher-ranked peers it needs (per the union of the Bruck and
//! recursive-halving maps) while a listener thread accepts the inbound
//! connections from lower ranks. Each connection opens with a 4-byte
//! little-endian rank so the acceptor knows who arrived.

use std::collections::BTreeSet;
use std::fs;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream, ToSocketAddrs, UdpSocket};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::error::{NetworkError, NetworkResult};

use super::topology::{BruckMap, RecursiveHalvingMap, RecursiveHalvingNodeType};

// ============================================================================
// NetworkConfig
// ============================================================================

/// Options for multi-machine training.
#[derive(Clone, Debug)]
pub struct NetworkConfig {
    /// Declared number of machines.
    pub num_machines: usize,
    /// Port this machine listens on.
    pub local_listen_port: u16,
    /// File with one `host port` line per peer in rank order; an optional
    /// `rank=N` line pins the local rank.
    pub machine_list_file: PathBuf,
    /// Socket read/write timeout, in minutes.
    pub socket_timeout_minutes: u64,
    /// Outbound connection attempts before a peer counts as unreachable.
    pub connect_retries: usize,
    /// Delay between outbound connection attempts.
    pub connect_retry_delay: Duration,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            num_machines: 1,
            local_listen_port: 12400,
            machine_list_file: PathBuf::new(),
            socket_timeout_minutes: 120,
            connect_retries: 20,
            connect_retry_delay: Duration::from_secs(10),
        }
    }
}

// ============================================================================
// Linkers
// ============================================================================

/// Established peer connections, indexed by rank.
#[derive(Debug)]
pub struct Linkers {
    rank: usize,
    num_machines: usize,
    streams: Vec<Option<TcpStream>>,
}

impl Linkers {
    /// Parse the machine list, bind the listener, and establish every
    /// required connection.
    pub fn new(config: &NetworkConfig) -> NetworkResult<Self> {
        let (hosts, ports, pinned_rank) = parse_machine_list(config)?;
        let num_machines = hosts.len().min(config.num_machines);
        if hosts.len() != config.num_machines {
            warn!(
                "machine list has {} entries, {} declared; using {}",
                hosts.len(),
                config.num_machines,
                num_machines
            );
        }
        if num_machines <= 1 {
            return Ok(Self {
                rank: 0,
                num_machines: 1,
                streams: Vec::new(),
            });
        }

        let rank = match pinned_rank {
            Some(rank) => rank,
            None => infer_local_rank(&hosts, &ports, config.local_listen_port).ok_or(
                NetworkError::LocalRankNotFound {
                    port: config.local_listen_port,
                },
            )?,
        };
        if rank >= num_machines {
            return Err(NetworkError::LocalRankNotFound {
                port: config.local_listen_port,
            });
        }

        let listener = TcpListener::bind(("0.0.0.0", config.local_listen_port)).map_err(
            |source| NetworkError::Bind {
                port: config.local_listen_port,
                source,
            },
        )?;
        info!("rank {rank} listening on port {}", config.local_listen_port);

        let bruck = BruckMap::construct(rank, num_machines);
        let halving = RecursiveHalvingMap::construct(rank, num_machines);

        // Union of both topologies: the peers this rank ever talks to.
        let mut need_connect: BTreeSet<usize> = BTreeSet::new();
        for i in 0..bruck.k {
            need_connect.insert(bruck.in_ranks[i]);
            need_connect.insert(bruck.out_ranks[i]);
        }
        if let Some(neighbor) = halving.neighbor {
            need_connect.insert(neighbor);
        }
        if halving.node_type != RecursiveHalvingNodeType::Other {
            need_connect.extend(halving.ranks.iter().copied());
        }
        need_connect.remove(&rank);

        let incoming_count = need_connect.iter().filter(|&&peer| peer < rank).count();

        // Lower ranks dial us; accept exactly that many, each prefixed with
        // the dialer's rank.
        let accept_thread = thread::spawn(move || -> NetworkResult<Vec<(usize, TcpStream)>> {
            let mut accepted = Vec::with_capacity(incoming_count);
            while accepted.len() < incoming_count {
                let (mut stream, _) = match listener.accept() {
                    Ok(conn) => conn,
                    Err(_) => continue,
                };
                let mut rank_bytes = [0u8; 4];
                stream.read_exact(&mut rank_bytes)?;
                accepted.push((u32::from_le_bytes(rank_bytes) as usize, stream));
            }
            Ok(accepted)
        });

        let mut streams: Vec<Option<TcpStream>> = (0..num_machines).map(|_| None).collect();
        for &peer in need_connect.iter().filter(|&&peer| peer > rank) {
            let stream = connect_with_retry(&hosts[peer], ports[peer], peer, config)?;
            (&stream).write_all(&(rank as u32).to_le_bytes())?;
            streams[peer] = Some(stream);
        }

        let accepted = accept_thread
            .join()
            .expect("listener thread does not panic")?;
        for (peer, stream) in accepted {
            if peer >= streams.len() {
                warn!("dropping connection announcing out-of-range rank {peer}");
                continue;
            }
            streams[peer] = Some(stream);
        }

        let timeout = Duration::from_secs(config.socket_timeout_minutes * 60);
        for stream in streams.iter().flatten() {
            stream.set_read_timeout(Some(timeout))?;
            stream.set_write_timeout(Some(timeout))?;
        }
        for (peer, stream) in streams.iter().enumerate() {
            if stream.is_some() {
                info!("rank {rank} connected to rank {peer}");
            }
        }

        Ok(Self {
            rank,
            num_machines,
            streams,
        })
    }

    /// This machine's rank.
    #[inline]
    pub fn rank(&self) -> usize {
        self.rank
    }

    /// Effective number of machines.
    #[inline]
    pub fn num_machines(&self) -> usize {
        self.num_machines
    }

    /// Connection to a peer. Reads and writes go through `&TcpStream`, so
    /// one round can send and receive on distinct (or identical) peers
    /// concurrently.
    pub fn stream(&self, peer: usize) -> NetworkResult<&TcpStream> {
        self.streams
            .get(peer)
            .and_then(|s| s.as_ref())
            .ok_or(NetworkError::UnreachableRank {
                rank: peer,
                attempts: 0,
            })
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Read `host port` lines (plus an optional `rank=N` pin) in rank order.
fn parse_machine_list(
    config: &NetworkConfig,
) -> NetworkResult<(Vec<String>, Vec<u16>, Option<usize>)> {
    let path = &config.machine_list_file;
    let content = fs::read_to_string(path).map_err(|_| NetworkError::EmptyMachineList {
        path: path.display().to_string(),
    })?;

    let mut hosts = Vec::new();
    let mut ports = Vec::new();
    let mut pinned_rank = None;
    for line in content.lines() {
        let line = line.trim();
        if let Some(value) = line.strip_prefix("rank=") {
            pinned_rank = value.trim().parse::<usize>().ok();
            continue;
        }
        let mut fields = line.split_whitespace();
        let (Some(host), Some(port)) = (fields.next(), fields.next()) else {
            continue;
        };
        let Ok(port) = port.parse::<u16>() else {
            continue;
        };
        if hosts.len() >= config.num_machines {
            warn!("machine list longer than num_machines, ignoring the rest");
            break;
        }
        hosts.push(host.to_string());
        ports.push(port);
    }
    if hosts.is_empty() {
        return Err(NetworkError::EmptyMachineList {
            path: path.display().to_string(),
        });
    }
    Ok((hosts, ports, pinned_rank))
}

/// Find the machine-list entry that names this machine: its port matches the
/// listen port and its host resolves to an address we can bind locally.
fn infer_local_rank(hosts: &[String], ports: &[u16], listen_port: u16) -> Option<usize> {
    for (i, (host, &port)) in hosts.iter().zip(ports).enumerate() {
        if port != listen_port {
            continue;
        }
        let Ok(addrs) = (host.as_str(), port).to_socket_addrs() else {
            continue;
        };
        for addr in addrs {
            if UdpSocket::bind((addr.ip(), 0)).is_ok() {
                return Some(i);
            }
        }
    }
    None
}

/// Dial a higher-ranked peer, retrying on a fixed schedule.
fn connect_with_retry(
    host: &str,
    port: u16,
    peer: usize,
    config: &NetworkConfig,
) -> NetworkResult<TcpStream> {
    for attempt in 0..config.connect_retries {
        match TcpStream::connect((host, port)) {
            Ok(stream) => return Ok(stream),
            Err(_) => {
                warn!(
                    "connect to rank {peer} failed (attempt {}), retrying in {:?}",
                    attempt + 1,
                    config.connect_retry_delay
                );
                thread::sleep(config.connect_retry_delay);
            }
        }
    }
    Err(NetworkError::UnreachableRank {
        rank: peer,
        attempts: config.connect_retries,
    })
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn write_list(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parse_reads_hosts_ports_and_rank_pin() {
        let file = write_list("rank=1\n127.0.0.1 9001\n127.0.0.1 9002\n");
        let config = NetworkConfig {
            num_machines: 2,
            machine_list_file: file.path().to_path_buf(),
            ..Default::default()
        };
        let (hosts, ports, pinned) = parse_machine_list(&config).unwrap();
        assert_eq!(hosts, vec!["127.0.0.1", "127.0.0.1"]);
        assert_eq!(ports, vec![9001, 9002]);
        assert_eq!(pinned, Some(1));
    }

    #[test]
    fn parse_skips_malformed_lines() {
        let file = write_list("# comment\n127.0.0.1 9001\nnot-a-line\n127.0.0.1 9002\n");
        let config = NetworkConfig {
            num_machines: 2,
            machine_list_file: file.path().to_path_buf(),
            ..Default::default()
        };
        let (hosts, _, _) = parse_machine_list(&config).unwrap();
        assert_eq!(hosts.len(), 2);
    }

    #[test]
    fn missing_file_is_fatal() {
        let config = NetworkConfig {
            num_machines: 2,
            machine_list_file: PathBuf::from("/nonexistent/machines.txt"),
            ..Default::default()
        };
        assert!(matches!(
            parse_machine_list(&config),
            Err(NetworkError::EmptyMachineList { .. })
        ));
    }

    #[test]
    fn local_rank_inferred_from_loopback_and_port() {
        let hosts = vec!["127.0.0.1".to_string(), "127.0.0.1".to_string()];
        let ports = vec![9101, 9102];
        assert_eq!(infer_local_rank(&hosts, &ports, 9102), Some(1));
        assert_eq!(infer_local_rank(&hosts, &ports, 9103), None);
    }
}

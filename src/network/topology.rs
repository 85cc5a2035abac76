//! Collective communication topologies.
//!
//! Both maps are pure functions of `(rank, num_machines)`; the linkers union
//! them to decide which peer connections a rank must establish.

// ============================================================================
// BruckMap
// ============================================================================

/// Peer schedule for the Bruck all-gather: `ceil(log2 m)` rounds in which
/// rank `r` receives from `r + 2^i` and sends to `r - 2^i` (mod `m`).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BruckMap {
    /// Number of communication rounds.
    pub k: usize,
    /// `in_ranks[i]`: the rank received from on round `i`.
    pub in_ranks: Vec<usize>,
    /// `out_ranks[i]`: the rank sent to on round `i`.
    pub out_ranks: Vec<usize>,
}

impl BruckMap {
    /// Build the schedule for `rank` among `num_machines` peers.
    pub fn construct(rank: usize, num_machines: usize) -> Self {
        if num_machines <= 1 {
            return Self::default();
        }
        let mut map = Self::default();
        let mut step = 1;
        while step < num_machines {
            map.in_ranks.push((rank + step) % num_machines);
            map.out_ranks.push((rank + num_machines - step) % num_machines);
            step <<= 1;
        }
        map.k = map.in_ranks.len();
        map
    }
}

// ============================================================================
// RecursiveHalvingMap
// ============================================================================

/// Role of a rank in the recursive-halving pattern.
///
/// When the peer count is not a power of two, the lowest `2 * rest` ranks
/// form pairs: the even member leads the pair through the halving rounds and
/// the odd member only relays through its leader.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RecursiveHalvingNodeType {
    /// Participates directly; its group has only itself.
    #[default]
    Normal,
    /// Leads a two-machine group and represents it in the halving rounds.
    GroupLeader,
    /// Relays through its group leader; takes no part in the halving rounds.
    Other,
}

/// Peer schedule for recursive halving over power-of-two sub-groups.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RecursiveHalvingMap {
    /// Number of halving rounds (0 for `Other` nodes).
    pub k: usize,
    /// This rank's role.
    pub node_type: RecursiveHalvingNodeType,
    /// Whether the peer count is a power of two.
    pub is_power_of_2: bool,
    /// Pair partner for `GroupLeader`/`Other` ranks.
    pub neighbor: Option<usize>,
    /// `ranks[i]`: the rank exchanged with on round `i`.
    pub ranks: Vec<usize>,
}

impl RecursiveHalvingMap {
    /// Build the schedule for `rank` among `num_machines` peers.
    pub fn construct(rank: usize, num_machines: usize) -> Self {
        if num_machines <= 1 {
            return Self::default();
        }

        let is_power_of_2 = num_machines.is_power_of_two();
        if is_power_of_2 {
            let k = num_machines.trailing_zeros() as usize;
            let ranks = (0..k).map(|i| rank ^ (1 << i)).collect();
            return Self {
                k,
                node_type: RecursiveHalvingNodeType::Normal,
                is_power_of_2,
                neighbor: None,
                ranks,
            };
        }

        // Largest power of two below the peer count; the excess ranks pair up
        // at the bottom and relay through their leaders.
        let lower = num_machines.next_power_of_two() / 2;
        let rest = num_machines - lower;
        let paired = 2 * rest;
        let k = lower.trailing_zeros() as usize;

        let (node_type, neighbor) = if rank < paired {
            if rank % 2 == 0 {
                (RecursiveHalvingNodeType::GroupLeader, Some(rank + 1))
            } else {
                (RecursiveHalvingNodeType::Other, Some(rank - 1))
            }
        } else {
            (RecursiveHalvingNodeType::Normal, None)
        };

        if node_type == RecursiveHalvingNodeType::Other {
            return Self {
                k: 0,
                node_type,
                is_power_of_2,
                neighbor,
                ranks: Vec::new(),
            };
        }

        // Participants get contiguous virtual ranks; partners come from the
        // virtual space mapped back to real ranks.
        let virtual_rank = if rank < paired { rank / 2 } else { rank - rest };
        let to_real = |vr: usize| if vr < rest { 2 * vr } else { vr + rest };
        let ranks = (0..k).map(|i| to_real(virtual_rank ^ (1 << i))).collect();

        Self {
            k,
            node_type,
            is_power_of_2,
            neighbor,
            ranks,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

//! The IPv4 subnet a scan sweeps.

use ipnetwork::Ipv4Network;
use serde::Serialize;
use std::fmt;
use std::net::Ipv4Addr;

/// Widest prefix whose host range is iterated in full.
const MAX_SWEEP_PREFIX: u32 = 24;

/// The network interface that owns the outbound address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterfaceRef {
    /// Interface name (e.g. `eth0`, `en0`).
    pub name: String,
    /// OS interface index.
    pub index: u32,
}

impl fmt::Display for InterfaceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Immutable description of the local subnet, derived once per scan.
///
/// Host addresses are every address strictly between the network and
/// broadcast addresses. Subnets wider than /24 are swept only across the
/// /24 that contains the local address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NetworkRange {
    local_addr: Ipv4Addr,
    mask: Ipv4Addr,
    network_addr: Ipv4Addr,
    broadcast_addr: Ipv4Addr,
    interface: InterfaceRef,
}

impl NetworkRange {
    /// Derive the range from the local address and its interface mask.
    pub fn from_address(local_addr: Ipv4Addr, mask: Ipv4Addr, interface: InterfaceRef) -> Self {
        let (network_addr, broadcast_addr) = network_and_broadcast(local_addr, mask);
        Self {
            local_addr,
            mask,
            network_addr,
            broadcast_addr,
            interface,
        }
    }

    /// The address the host uses for outbound traffic.
    pub fn local_addr(&self) -> Ipv4Addr {
        self.local_addr
    }

    /// The subnet mask of the owning interface.
    pub fn mask(&self) -> Ipv4Addr {
        self.mask
    }

    /// `local & mask`.
    pub fn network_addr(&self) -> Ipv4Addr {
        self.network_addr
    }

    /// `network | !mask`.
    pub fn broadcast_addr(&self) -> Ipv4Addr {
        self.broadcast_addr
    }

    /// The interface that owns the local address.
    pub fn interface(&self) -> &InterfaceRef {
        &self.interface
    }

    /// Prefix length of the mask.
    pub fn prefix(&self) -> u32 {
        u32::from(self.mask).count_ones()
    }

    /// Whether the sweep is narrower than the real subnet.
    pub fn is_clamped(&self) -> bool {
        self.prefix() < MAX_SWEEP_PREFIX
    }

    /// The subnet in CIDR form, if the mask is contiguous.
    pub fn cidr(&self) -> Option<Ipv4Network> {
        Ipv4Network::with_netmask(self.network_addr, self.mask).ok()
    }

    /// Iterate every host address to probe, network and broadcast excluded.
    pub fn hosts(&self) -> impl Iterator<Item = Ipv4Addr> {
        let (first, last) = self.sweep_bounds();
        (first..=last).map(Ipv4Addr::from)
    }

    /// Number of addresses `hosts()` yields.
    pub fn host_count(&self) -> usize {
        let (first, last) = self.sweep_bounds();
        if last < first {
            0
        } else {
            (last - first + 1) as usize
        }
    }

    /// Whether `addr` falls in the swept host range.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        let (first, last) = self.sweep_bounds();
        let addr = u32::from(addr);
        addr >= first && addr <= last
    }

    /// Inclusive host bounds. An empty range has `last < first`.
    fn sweep_bounds(&self) -> (u32, u32) {
        let (network, broadcast) = if self.is_clamped() {
            let slash24 = Ipv4Addr::new(255, 255, 255, 0);
            network_and_broadcast(self.local_addr, slash24)
        } else {
            (self.network_addr, self.broadcast_addr)
        };
        let start = u32::from(network);
        let end = u32::from(broadcast);
        if end <= start.saturating_add(1) {
            return (1, 0);
        }
        (start + 1, end - 1)
    }
}

impl fmt::Display for NetworkRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{} on {}",
            self.network_addr,
            self.prefix(),
            self.interface
        )
    }
}

/// Apply the mask byte by byte: `network = ip & mask`, `broadcast = network | !mask`.
fn network_and_broadcast(ip: Ipv4Addr, mask: Ipv4Addr) -> (Ipv4Addr, Ipv4Addr) {
    let ip = ip.octets();
    let mask = mask.octets();
    let mut network = [0u8; 4];
    let mut broadcast = [0u8; 4];
    for i in 0..4 {
        network[i] = ip[i] & mask[i];
        broadcast[i] = network[i] | !mask[i];
    }
    (Ipv4Addr::from(network), Ipv4Addr::from(broadcast))
}

//! Local network detection.
//!
//! Finds the IPv4 address the host uses for outbound traffic and the
//! interface and mask that own it, producing the [`NetworkRange`] a scan
//! sweeps.

use crate::error::{ScanError, ScanResult};
use crate::types::{InterfaceRef, NetworkRange};
use pnet::datalink::{self, NetworkInterface};
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use tracing::debug;

/// Well-known external address used only to select a route. No packet is sent.
const ROUTE_PROBE_ADDR: &str = "8.8.8.8:80";

/// Detect the range of the interface that carries outbound traffic.
pub fn detect_network_range() -> ScanResult<NetworkRange> {
    let local = outbound_ipv4()?;
    debug!(%local, "resolved outbound address");

    let interfaces = datalink::interfaces();
    let range = range_for_address(local, &interfaces)?;
    debug!(range = %range, hosts = range.host_count(), "network range selected");
    Ok(range)
}

/// The local endpoint of a connected (but silent) UDP socket.
fn outbound_ipv4() -> ScanResult<Ipv4Addr> {
    let socket = UdpSocket::bind("0.0.0.0:0")
        .map_err(|e| ScanError::NetworkSetup(format!("cannot open diagnostic socket: {}", e)))?;
    socket
        .connect(ROUTE_PROBE_ADDR)
        .map_err(|e| ScanError::NetworkSetup(format!("no outbound route: {}", e)))?;

    match socket.local_addr() {
        Ok(addr) => match addr.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => Ok(ip),
            other => Err(ScanError::NetworkSetup(format!(
                "outbound address {} is not a usable IPv4 address",
                other
            ))),
        },
        Err(e) => Err(ScanError::NetworkSetup(format!(
            "cannot read local endpoint: {}",
            e
        ))),
    }
}

/// Find the interface owning `local` and derive its range.
pub fn range_for_address(
    local: Ipv4Addr,
    interfaces: &[NetworkInterface],
) -> ScanResult<NetworkRange> {
    for iface in interfaces {
        for network in &iface.ips {
            if network.ip() != IpAddr::V4(local) {
                continue;
            }
            let mask = match network.mask() {
                IpAddr::V4(mask) => mask,
                IpAddr::V6(_) => continue,
            };
            let interface = InterfaceRef {
                name: iface.name.clone(),
                index: iface.index,
            };
            return Ok(NetworkRange::from_address(local, mask, interface));
        }
    }

    Err(ScanError::NetworkSetup(format!(
        "no interface owns address {}",
        local
    )))
}

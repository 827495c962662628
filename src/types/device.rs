//! A device observed on the local network.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Discovery protocol that observed a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiscoverySource {
    /// Answered an ICMP echo request.
    #[serde(rename = "ICMP")]
    Icmp,
    /// Announced a service over multicast DNS.
    #[serde(rename = "mDNS")]
    Mdns,
}

impl fmt::Display for DiscoverySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Icmp => write!(f, "ICMP"),
            Self::Mdns => write!(f, "mDNS"),
        }
    }
}

/// A discovered network endpoint, keyed by its IPv4 address.
///
/// `addr_v6` and `hostname` follow a first-writer-wins policy: once set by
/// a discovery source they are never overwritten by a later observation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Device {
    /// Primary key.
    pub addr_v4: Ipv4Addr,
    /// Secondary address, filled opportunistically.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub addr_v6: Option<Ipv6Addr>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// True only after a successful TCP connect to the SSH port.
    #[serde(default, rename = "canConnectSSH")]
    pub can_connect_ssh: bool,
    /// Every protocol that observed this device, in first-seen order.
    #[serde(default)]
    pub sources: Vec<DiscoverySource>,
}

impl Device {
    /// Create an empty device for the given address.
    pub fn new(addr_v4: Ipv4Addr) -> Self {
        Self {
            addr_v4,
            addr_v6: None,
            hostname: None,
            can_connect_ssh: false,
            sources: Vec::new(),
        }
    }

    /// Record a discovery source. Returns `false` if it was already present.
    pub fn add_source(&mut self, source: DiscoverySource) -> bool {
        if self.sources.contains(&source) {
            return false;
        }
        self.sources.push(source);
        true
    }

    /// Whether the given protocol has observed this device.
    pub fn has_source(&self, source: DiscoverySource) -> bool {
        self.sources.contains(&source)
    }

    /// Set the hostname if none is recorded yet. Blank values are ignored.
    pub fn merge_hostname(&mut self, hostname: &str) -> bool {
        let hostname = hostname.trim();
        if self.hostname.is_some() || hostname.is_empty() {
            return false;
        }
        self.hostname = Some(hostname.to_string());
        true
    }

    /// Set the IPv6 address if none is recorded yet.
    pub fn merge_addr_v6(&mut self, addr: Ipv6Addr) -> bool {
        if self.addr_v6.is_some() {
            return false;
        }
        self.addr_v6 = Some(addr);
        true
    }

    /// Comma-separated list of sources, e.g. `ICMP, mDNS`.
    pub fn sources_label(&self) -> String {
        self.sources
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.hostname {
            Some(name) => write!(f, "{} ({})", self.addr_v4, name),
            None => write!(f, "{}", self.addr_v4),
        }
    }
}

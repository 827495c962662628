//! Shared device registry.
//!
//! The only mutable state shared between discovery and enrichment tasks.
//! A single mutex guards the whole map; every check-then-act sequence runs
//! under one acquisition, and callers only see copies of devices.

use crate::types::{Device, DiscoverySource};
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, Mutex, MutexGuard};

/// Optional field merged with first-writer-wins semantics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeField {
    Hostname(String),
    AddrV6(Ipv6Addr),
}

/// A single discovery observation, applied atomically.
#[derive(Debug, Clone)]
pub struct Observation {
    pub source: DiscoverySource,
    pub hostname: Option<String>,
    pub addr_v6: Option<Ipv6Addr>,
}

impl Observation {
    /// An observation that only records the source.
    pub fn new(source: DiscoverySource) -> Self {
        Self {
            source,
            hostname: None,
            addr_v6: None,
        }
    }

    pub fn with_hostname(mut self, hostname: Option<String>) -> Self {
        self.hostname = hostname;
        self
    }

    pub fn with_addr_v6(mut self, addr: Option<Ipv6Addr>) -> Self {
        self.addr_v6 = addr;
        self
    }
}

/// Thread-safe map from IPv4 address to [`Device`].
///
/// Cloning the registry clones the handle; all clones share one map.
#[derive(Debug, Clone, Default)]
pub struct DeviceRegistry {
    inner: Arc<Mutex<HashMap<Ipv4Addr, Device>>>,
}

impl DeviceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A poisoned lock only means another task panicked mid-update; every
    /// update is a single field assignment, so the map is still consistent.
    fn lock(&self) -> MutexGuard<'_, HashMap<Ipv4Addr, Device>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Return a copy of the device, inserting an empty entry if absent.
    pub fn get_or_create(&self, addr: Ipv4Addr) -> Device {
        self.lock()
            .entry(addr)
            .or_insert_with(|| Device::new(addr))
            .clone()
    }

    /// Record that `source` observed `addr`. No-op if already recorded.
    pub fn record_source(&self, addr: Ipv4Addr, source: DiscoverySource) {
        self.lock()
            .entry(addr)
            .or_insert_with(|| Device::new(addr))
            .add_source(source);
    }

    /// Set an optional field only if it is still empty.
    ///
    /// Returns `true` if the value was written.
    pub fn merge_field(&self, addr: Ipv4Addr, field: MergeField) -> bool {
        let mut map = self.lock();
        let device = map.entry(addr).or_insert_with(|| Device::new(addr));
        match field {
            MergeField::Hostname(name) => device.merge_hostname(&name),
            MergeField::AddrV6(v6) => device.merge_addr_v6(v6),
        }
    }

    /// Apply a discovery observation: create, merge fields and record the
    /// source under one lock acquisition.
    pub fn observe(&self, addr: Ipv4Addr, observation: Observation) {
        let mut map = self.lock();
        let device = map.entry(addr).or_insert_with(|| Device::new(addr));
        if let Some(name) = observation.hostname.as_deref() {
            device.merge_hostname(name);
        }
        if let Some(v6) = observation.addr_v6 {
            device.merge_addr_v6(v6);
        }
        device.add_source(observation.source);
    }

    /// Set SSH reachability. Unknown addresses are ignored.
    pub fn set_reachable(&self, addr: Ipv4Addr, reachable: bool) {
        if let Some(device) = self.lock().get_mut(&addr) {
            device.can_connect_ssh = reachable;
        }
    }

    /// Set the hostname unconditionally. Unknown addresses are ignored.
    pub fn set_hostname(&self, addr: Ipv4Addr, hostname: impl Into<String>) {
        if let Some(device) = self.lock().get_mut(&addr) {
            device.hostname = Some(hostname.into());
        }
    }

    /// Set the hostname only if the device still has none at write time.
    pub fn set_hostname_if_empty(&self, addr: Ipv4Addr, hostname: &str) -> bool {
        match self.lock().get_mut(&addr) {
            Some(device) => device.merge_hostname(hostname),
            None => false,
        }
    }

    /// Copy of one device.
    pub fn get(&self, addr: Ipv4Addr) -> Option<Device> {
        self.lock().get(&addr).cloned()
    }

    /// Point-in-time copy of every device, ordered by address.
    pub fn snapshot(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.lock().values().cloned().collect();
        devices.sort_by_key(|d| d.addr_v4);
        devices
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

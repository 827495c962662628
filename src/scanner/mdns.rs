//! Multicast DNS discovery.
//!
//! Browses the DNS-SD meta-query `_services._dns-sd._udp.local.` to learn
//! which service types are announced on the link, then browses each type
//! until the shared deadline. Resolved instances are funnelled through a
//! bounded channel to a single consumer that merges them into the registry.

use crate::error::{ScanError, ScanResult};
use crate::registry::{DeviceRegistry, Observation};
use crate::scanner::traits::Discoverer;
use crate::types::{DiscoverySource, InterfaceRef, NetworkRange};
use async_trait::async_trait;
use mdns_sd::{IfKind, ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// The DNS-SD service enumeration name.
pub const META_QUERY: &str = "_services._dns-sd._udp.local.";

/// TXT key carrying a device's model or display name.
const MODEL_KEY_PREFIX: &str = "md=";

/// Forward a browse receiver into the shared event channel until either
/// side closes.
macro_rules! forward_events {
    ($receiver:expr, $tx:expr) => {{
        let receiver = $receiver;
        let tx = $tx.clone();
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
    }};
}

/// One resolved mDNS service instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceEntry {
    /// Full instance name, e.g. `Kitchen._googlecast._tcp.local.`
    pub name: String,
    /// Target host name.
    pub host: String,
    pub addr_v4: Option<Ipv4Addr>,
    pub addr_v6: Option<Ipv6Addr>,
    /// TXT record strings in `key=value` form.
    pub info_fields: Vec<String>,
}

impl ServiceEntry {
    /// Convert a resolved `mdns-sd` record.
    pub fn from_service_info(info: &ServiceInfo) -> Self {
        let mut addr_v4 = None;
        let mut addr_v6 = None;
        let mut addresses: Vec<&IpAddr> = info.get_addresses().iter().collect();
        addresses.sort();
        for addr in addresses {
            match addr {
                IpAddr::V4(v4) if addr_v4.is_none() => addr_v4 = Some(*v4),
                IpAddr::V6(v6) if addr_v6.is_none() => addr_v6 = Some(*v6),
                _ => {}
            }
        }

        let info_fields = info
            .get_properties()
            .iter()
            .map(|prop| format!("{}={}", prop.key(), prop.val_str()))
            .collect();

        Self {
            name: info.get_fullname().to_string(),
            host: info.get_hostname().trim_end_matches('.').to_string(),
            addr_v4,
            addr_v6,
            info_fields,
        }
    }
}

/// Return the value of the first `md=` field. Scanning stops at the first
/// `md=` field even if its value is blank.
pub fn extract_model_name(info_fields: &[String]) -> Option<String> {
    info_fields
        .iter()
        .find_map(|field| field.strip_prefix(MODEL_KEY_PREFIX))
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Merge one entry into the registry.
///
/// Entries without an IPv4 address are skipped. Returns the address of the
/// device that was created or updated.
pub fn process_entry(entry: &ServiceEntry, registry: &DeviceRegistry) -> Option<Ipv4Addr> {
    let addr = entry.addr_v4?;
    let observation = Observation::new(DiscoverySource::Mdns)
        .with_hostname(extract_model_name(&entry.info_fields))
        .with_addr_v6(entry.addr_v6);
    registry.observe(addr, observation);
    Some(addr)
}

/// Consume entries until the sending side closes, returning the distinct
/// addresses seen.
pub async fn consume_entries(
    mut entries: mpsc::Receiver<ServiceEntry>,
    registry: &DeviceRegistry,
) -> usize {
    let mut seen = HashSet::new();
    while let Some(entry) = entries.recv().await {
        match process_entry(&entry, registry) {
            Some(addr) => {
                trace!(%addr, service = %entry.name, "mDNS entry");
                seen.insert(addr);
            }
            None => trace!(service = %entry.name, "mDNS entry without IPv4 address"),
        }
    }
    seen.len()
}

/// mDNS discovery bound to the scan interface.
pub struct MdnsScanner {
    timeout: Duration,
    buffer: usize,
}

impl MdnsScanner {
    /// Create a scanner with an overall query deadline and channel capacity.
    pub fn new(timeout: Duration, buffer: usize) -> Self {
        Self {
            timeout,
            buffer: buffer.max(1),
        }
    }

    fn start_daemon(interface: &InterfaceRef) -> ScanResult<ServiceDaemon> {
        let daemon = ServiceDaemon::new().map_err(|e| ScanError::Mdns(e.to_string()))?;

        // Restricting to one interface is best effort; some platforms report
        // names the daemon does not recognise.
        if let Err(e) = daemon
            .disable_interface(IfKind::All)
            .and_then(|_| daemon.enable_interface(IfKind::Name(interface.name.clone())))
        {
            debug!(interface = %interface, error = %e, "could not bind mDNS to interface");
            daemon
                .enable_interface(IfKind::All)
                .map_err(|e| ScanError::Mdns(e.to_string()))?;
        }
        // Interface rules apply in order, so this must come last.
        daemon
            .disable_interface(IfKind::IPv6)
            .map_err(|e| ScanError::Mdns(e.to_string()))?;

        Ok(daemon)
    }

    /// Run the query side: browse the meta-query, then every service type
    /// it reveals, forwarding resolved entries until the deadline.
    async fn query(
        daemon: &ServiceDaemon,
        deadline: Instant,
        tx: mpsc::Sender<ServiceEntry>,
        cancel: &CancellationToken,
    ) -> ScanResult<()> {
        let meta = daemon
            .browse(META_QUERY)
            .map_err(|e| ScanError::Mdns(e.to_string()))?;
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();

        forward_events!(meta, event_tx);

        let mut browsed = HashSet::new();
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep_until(deadline) => break,
                event = event_rx.recv() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            match event {
                ServiceEvent::ServiceFound(ty, fullname) if ty == META_QUERY => {
                    let service_type = normalize_service_type(&fullname);
                    if browsed.insert(service_type.clone()) {
                        trace!(%service_type, "browsing service type");
                        match daemon.browse(&service_type) {
                            Ok(receiver) => forward_events!(receiver, event_tx),
                            Err(e) => debug!(%service_type, error = %e, "browse failed"),
                        }
                    }
                }
                ServiceEvent::ServiceResolved(info) => {
                    let entry = ServiceEntry::from_service_info(&info);
                    if tx.send(entry).await.is_err() {
                        break;
                    }
                }
                _ => {}
            }
        }

        for service_type in browsed.iter().map(String::as_str).chain([META_QUERY]) {
            let _ = daemon.stop_browse(service_type);
        }
        Ok(())
    }
}

/// `_http._tcp.local` and `_http._tcp.local.` name the same type.
fn normalize_service_type(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{}.", name)
    }
}

#[async_trait]
impl Discoverer for MdnsScanner {
    fn source(&self) -> DiscoverySource {
        DiscoverySource::Mdns
    }

    async fn discover(
        &self,
        range: &NetworkRange,
        registry: &DeviceRegistry,
        cancel: &CancellationToken,
    ) -> ScanResult<usize> {
        let daemon = Self::start_daemon(range.interface())?;
        let deadline = Instant::now() + self.timeout;
        let (tx, rx) = mpsc::channel(self.buffer);

        debug!(
            interface = %range.interface(),
            timeout_ms = self.timeout.as_millis() as u64,
            "starting mDNS query"
        );

        // Both halves are joined; the consumer ends when the query drops `tx`.
        let (queried, found) = tokio::join!(
            Self::query(&daemon, deadline, tx, cancel),
            consume_entries(rx, registry),
        );

        if let Err(e) = daemon.shutdown() {
            debug!(error = %e, "mDNS daemon shutdown failed");
        }
        queried?;

        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }
        debug!(found, "mDNS query finished");
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_extract_model_name() {
        assert_eq!(
            extract_model_name(&fields(&["md=Google Nest Mini", "other=x"])),
            Some("Google Nest Mini".to_string())
        );
        assert_eq!(
            extract_model_name(&fields(&["id=1", "md=First", "md=Second"])),
            Some("First".to_string())
        );
        assert_eq!(extract_model_name(&fields(&["fn=Kitchen"])), None);
        assert_eq!(extract_model_name(&fields(&["md=", "md=Later"])), None);
    }

    #[test]
    fn test_process_entry_sets_model_name_and_source() {
        let registry = DeviceRegistry::new();
        let entry = ServiceEntry {
            name: "Kitchen._googlecast._tcp.local.".to_string(),
            host: "kitchen.local".to_string(),
            addr_v4: Some(Ipv4Addr::new(192, 168, 86, 21)),
            addr_v6: Some("fe80::1c2d".parse().unwrap()),
            info_fields: fields(&["md=Google Nest Mini", "other=x"]),
        };

        assert_eq!(
            process_entry(&entry, &registry),
            Some(Ipv4Addr::new(192, 168, 86, 21))
        );

        let device = registry.get(Ipv4Addr::new(192, 168, 86, 21)).unwrap();
        assert_eq!(device.hostname.as_deref(), Some("Google Nest Mini"));
        assert!(device.has_source(DiscoverySource::Mdns));
        assert_eq!(device.addr_v6, Some("fe80::1c2d".parse().unwrap()));
    }

    #[test]
    fn test_process_entry_without_ipv4_is_skipped() {
        let registry = DeviceRegistry::new();
        let entry = ServiceEntry {
            addr_v6: Some("fe80::1".parse().unwrap()),
            info_fields: fields(&["md=Ghost"]),
            ..Default::default()
        };
        assert_eq!(process_entry(&entry, &registry), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_process_entry_keeps_existing_fields() {
        let registry = DeviceRegistry::new();
        let addr = Ipv4Addr::new(10, 0, 0, 8);
        registry.record_source(addr, DiscoverySource::Icmp);

        for name in ["md=Printer", "md=Renamed"] {
            let entry = ServiceEntry {
                addr_v4: Some(addr),
                info_fields: fields(&[name]),
                ..Default::default()
            };
            process_entry(&entry, &registry);
        }

        let device = registry.get(addr).unwrap();
        assert_eq!(device.hostname.as_deref(), Some("Printer"));
        assert_eq!(
            device.sources,
            vec![DiscoverySource::Icmp, DiscoverySource::Mdns]
        );
    }

    #[tokio::test]
    async fn test_consumer_drains_channel() {
        let registry = DeviceRegistry::new();
        let (tx, rx) = mpsc::channel(4);

        let producer = tokio::spawn(async move {
            for last in [1u8, 2, 2, 3] {
                let entry = ServiceEntry {
                    addr_v4: Some(Ipv4Addr::new(192, 168, 1, last)),
                    ..Default::default()
                };
                tx.send(entry).await.unwrap();
            }
            tx.send(ServiceEntry::default()).await.unwrap();
        });

        let found = consume_entries(rx, &registry).await;
        producer.await.unwrap();
        assert_eq!(found, 3);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_normalize_service_type() {
        assert_eq!(normalize_service_type("_http._tcp.local"), "_http._tcp.local.");
        assert_eq!(normalize_service_type("_ssh._tcp.local."), "_ssh._tcp.local.");
    }
}

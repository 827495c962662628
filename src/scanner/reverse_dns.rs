//! Reverse DNS hostname probe.
//!
//! Issues a PTR lookup for devices that are still unnamed after discovery
//! and keeps the leftmost label of the first answer.

use crate::registry::DeviceRegistry;
use crate::scanner::traits::{Probe, ProbeKind, ProbeOutcome};
use crate::types::Device;
use async_trait::async_trait;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, trace};
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Something that can answer PTR queries.
#[async_trait]
pub trait PtrResolver: Send + Sync {
    /// Names for `addr`, in answer order. An empty list means no record.
    async fn lookup(&self, addr: Ipv4Addr) -> Result<Vec<String>, String>;
}

/// PTR resolver backed by the system resolver configuration.
pub struct SystemResolver {
    resolver: TokioAsyncResolver,
}

impl SystemResolver {
    /// Use `/etc/resolv.conf` (or the platform equivalent), falling back to
    /// the library defaults when it cannot be read.
    pub fn new(query_timeout: Duration) -> Self {
        let (config, mut opts) = match trust_dns_resolver::system_conf::read_system_conf() {
            Ok(conf) => conf,
            Err(e) => {
                debug!(error = %e, "system resolver config unavailable, using defaults");
                (ResolverConfig::default(), ResolverOpts::default())
            }
        };
        opts.timeout = query_timeout;
        opts.attempts = 1;

        Self {
            resolver: TokioAsyncResolver::tokio(config, opts),
        }
    }
}

#[async_trait]
impl PtrResolver for SystemResolver {
    async fn lookup(&self, addr: Ipv4Addr) -> Result<Vec<String>, String> {
        let answer = self
            .resolver
            .reverse_lookup(IpAddr::V4(addr))
            .await
            .map_err(|e| e.to_string())?;
        Ok(answer.iter().map(|name| name.to_string()).collect())
    }
}

/// Reduce a fully qualified name to its first label: `my-pc.lan.` -> `my-pc`.
pub fn short_hostname(fqdn: &str) -> Option<String> {
    let name = fqdn.trim().trim_end_matches('.');
    let label = name.split('.').next().unwrap_or_default();
    if label.is_empty() {
        None
    } else {
        Some(label.to_string())
    }
}

/// Names unnamed devices from their PTR record.
pub struct ReverseDnsProbe<R = SystemResolver> {
    resolver: R,
    timeout: Duration,
}

impl ReverseDnsProbe<SystemResolver> {
    /// Probe with the system resolver.
    pub fn system(timeout: Duration) -> Self {
        Self::new(SystemResolver::new(timeout), timeout)
    }
}

impl<R: PtrResolver> ReverseDnsProbe<R> {
    pub fn new(resolver: R, timeout: Duration) -> Self {
        Self { resolver, timeout }
    }
}

#[async_trait]
impl<R: PtrResolver> Probe for ReverseDnsProbe<R> {
    fn kind(&self) -> ProbeKind {
        ProbeKind::ReverseDns
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn wants(&self, device: &Device) -> bool {
        device.hostname.is_none()
    }

    async fn probe(&self, device: &Device, registry: &DeviceRegistry) -> ProbeOutcome {
        let addr = device.addr_v4;
        let names = match timeout(self.timeout, self.resolver.lookup(addr)).await {
            Ok(Ok(names)) => names,
            Ok(Err(e)) => {
                trace!(%addr, error = %e, "no PTR record");
                return ProbeOutcome::Unchanged;
            }
            Err(_) => return ProbeOutcome::TimedOut,
        };

        let Some(hostname) = names.first().and_then(|fqdn| short_hostname(fqdn)) else {
            return ProbeOutcome::Unchanged;
        };

        // Discovery may have named the device since the snapshot was taken.
        if registry.set_hostname_if_empty(addr, &hostname) {
            trace!(%addr, %hostname, "resolved hostname");
            ProbeOutcome::Updated
        } else {
            ProbeOutcome::Unchanged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeResolver {
        records: HashMap<Ipv4Addr, Vec<String>>,
        delay: Duration,
    }

    impl FakeResolver {
        fn new(records: &[(Ipv4Addr, &str)]) -> Self {
            let mut map: HashMap<Ipv4Addr, Vec<String>> = HashMap::new();
            for (addr, name) in records {
                map.entry(*addr).or_default().push(name.to_string());
            }
            Self {
                records: map,
                delay: Duration::ZERO,
            }
        }
    }

    #[async_trait]
    impl PtrResolver for FakeResolver {
        async fn lookup(&self, addr: Ipv4Addr) -> Result<Vec<String>, String> {
            tokio::time::sleep(self.delay).await;
            self.records
                .get(&addr)
                .cloned()
                .ok_or_else(|| "NXDOMAIN".to_string())
        }
    }

    #[test]
    fn test_short_hostname() {
        assert_eq!(short_hostname("my-pc.lan."), Some("my-pc".to_string()));
        assert_eq!(short_hostname("printer"), Some("printer".to_string()));
        assert_eq!(short_hostname("."), None);
        assert_eq!(short_hostname(""), None);
    }

    #[tokio::test]
    async fn test_probe_names_unnamed_device() {
        let addr = Ipv4Addr::new(192, 168, 1, 30);
        let probe = ReverseDnsProbe::new(
            FakeResolver::new(&[(addr, "my-pc.lan."), (addr, "alias.lan.")]),
            Duration::from_secs(1),
        );
        let registry = DeviceRegistry::new();
        let device = registry.get_or_create(addr);

        assert!(probe.wants(&device));
        assert_eq!(probe.probe(&device, &registry).await, ProbeOutcome::Updated);
        assert_eq!(registry.get(addr).unwrap().hostname.as_deref(), Some("my-pc"));
    }

    #[tokio::test]
    async fn test_probe_does_not_overwrite_late_name() {
        let addr = Ipv4Addr::new(192, 168, 1, 31);
        let probe = ReverseDnsProbe::new(
            FakeResolver::new(&[(addr, "tv.lan.")]),
            Duration::from_secs(1),
        );
        let registry = DeviceRegistry::new();
        let snapshot = registry.get_or_create(addr);
        registry.set_hostname(addr, "Living Room TV");

        assert_eq!(probe.probe(&snapshot, &registry).await, ProbeOutcome::Unchanged);
        assert_eq!(
            registry.get(addr).unwrap().hostname.as_deref(),
            Some("Living Room TV")
        );
    }

    #[tokio::test]
    async fn test_lookup_failure_and_timeout_are_absorbed() {
        let known = Ipv4Addr::new(10, 0, 0, 1);
        let unknown = Ipv4Addr::new(10, 0, 0, 2);
        let registry = DeviceRegistry::new();

        let probe = ReverseDnsProbe::new(FakeResolver::new(&[]), Duration::from_secs(1));
        let device = registry.get_or_create(unknown);
        assert_eq!(probe.probe(&device, &registry).await, ProbeOutcome::Unchanged);

        let mut slow = FakeResolver::new(&[(known, "slow.lan.")]);
        slow.delay = Duration::from_millis(500);
        let probe = ReverseDnsProbe::new(slow, Duration::from_millis(50));
        let device = registry.get_or_create(known);
        assert_eq!(probe.probe(&device, &registry).await, ProbeOutcome::TimedOut);
        assert!(registry.get(known).unwrap().hostname.is_none());
    }

    #[test]
    fn test_named_devices_are_skipped() {
        let probe = ReverseDnsProbe::new(FakeResolver::new(&[]), Duration::from_secs(1));
        let mut device = Device::new(Ipv4Addr::new(10, 0, 0, 3));
        device.hostname = Some("nas".to_string());
        assert!(!probe.wants(&device));
    }
}

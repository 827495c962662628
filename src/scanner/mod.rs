//! Scanner module - discovery, enrichment and the scan pipeline.
//!
//! A scan moves through fixed phases:
//!
//! 1. `SettingUpNetwork`: detect the local [`NetworkRange`].
//! 2. `Discovering`: every [`Discoverer`] runs concurrently; the phase ends
//!    only when all of them have returned.
//! 3. `Enriching`: every [`Probe`] runs concurrently over a snapshot of the
//!    registry taken after discovery, with a bounded number of in-flight
//!    probes each.
//! 4. `Done`: the caller receives the final device list.
//!
//! Per-device failures never abort a phase. Only network setup failure and
//! cancellation end a scan early.

pub mod icmp;
pub mod mdns;
pub mod rate_limiter;
pub mod reverse_dns;
pub mod ssh_probe;
pub mod traits;

pub use icmp::{IcmpScanner, IcmpSocket, IcmpTransport};
pub use mdns::{MdnsScanner, ServiceEntry};
pub use rate_limiter::RateLimiter;
pub use reverse_dns::{PtrResolver, ReverseDnsProbe, SystemResolver};
pub use ssh_probe::SshProbe;
pub use traits::{Discoverer, Probe, ProbeKind, ProbeOutcome};

use crate::error::{ScanError, ScanResult};
use crate::network::detect_network_range;
use crate::registry::DeviceRegistry;
use crate::types::{Device, DiscoverySource, NetworkRange};
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Scan state machine phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    SettingUpNetwork,
    Discovering,
    Enriching,
    Done,
    Failed,
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SettingUpNetwork => write!(f, "Setting up network"),
            Self::Discovering => write!(f, "Discovering devices"),
            Self::Enriching => write!(f, "Probing devices"),
            Self::Done => write!(f, "Done"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Timeouts, rates and limits for one scan.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Overall ICMP sweep deadline.
    pub icmp_timeout: Duration,
    /// Receive poll interval inside the sweep.
    pub icmp_poll: Duration,
    /// Echo requests per second (0 = unpaced).
    pub icmp_send_rate: u32,
    /// Overall mDNS query deadline.
    pub mdns_timeout: Duration,
    /// Capacity of the mDNS entry channel.
    pub mdns_buffer: usize,
    /// Per-device TCP connect timeout.
    pub ssh_probe_timeout: Duration,
    /// Per-device PTR lookup timeout.
    pub dns_timeout: Duration,
    /// Port checked by the reachability probe.
    pub ssh_port: u16,
    /// Maximum in-flight probes per probe kind.
    pub probe_concurrency: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            icmp_timeout: Duration::from_secs(3),
            icmp_poll: Duration::from_millis(100),
            icmp_send_rate: 1000,
            mdns_timeout: Duration::from_secs(2),
            mdns_buffer: 100,
            ssh_probe_timeout: Duration::from_secs(1),
            dns_timeout: Duration::from_secs(2),
            ssh_port: crate::types::DEFAULT_SSH_PORT,
            probe_concurrency: 64,
        }
    }
}

/// Outcome of one discoverer.
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveryStat {
    pub source: DiscoverySource,
    pub found: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome counts for one probe kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeSummary {
    pub kind: ProbeKind,
    pub attempted: usize,
    pub updated: usize,
    pub timed_out: usize,
}

impl ProbeSummary {
    fn from_outcomes(kind: ProbeKind, outcomes: &[ProbeOutcome]) -> Self {
        let count = |wanted: ProbeOutcome| outcomes.iter().filter(|o| **o == wanted).count();
        Self {
            kind,
            attempted: outcomes.len(),
            updated: count(ProbeOutcome::Updated),
            timed_out: count(ProbeOutcome::TimedOut),
        }
    }
}

/// Complete scan results.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub range: NetworkRange,
    pub devices: Vec<Device>,
    pub discovery: Vec<DiscoveryStat>,
    pub enrichment: Vec<ProbeSummary>,
    pub duration_ms: u64,
}

impl ScanReport {
    /// Discovered devices keyed by address, for selection prompts.
    pub fn device_map(&self) -> BTreeMap<Ipv4Addr, Device> {
        self.devices
            .iter()
            .map(|device| (device.addr_v4, device.clone()))
            .collect()
    }
}

type PhaseObserver = Arc<dyn Fn(ScanPhase) + Send + Sync>;

/// The two-phase discovery and enrichment pipeline.
pub struct ScanPipeline {
    discoverers: Vec<Arc<dyn Discoverer>>,
    probes: Vec<Arc<dyn Probe>>,
    probe_concurrency: usize,
    observer: Option<PhaseObserver>,
}

impl ScanPipeline {
    /// An empty pipeline.
    pub fn new(probe_concurrency: usize) -> Self {
        Self {
            discoverers: Vec::new(),
            probes: Vec::new(),
            probe_concurrency: probe_concurrency.max(1),
            observer: None,
        }
    }

    /// ICMP and mDNS discovery followed by SSH and reverse DNS probes.
    pub fn from_options(options: &ScanOptions) -> Self {
        Self::new(options.probe_concurrency)
            .with_discoverer(Arc::new(IcmpScanner::new(
                options.icmp_timeout,
                options.icmp_poll,
                options.icmp_send_rate,
            )))
            .with_discoverer(Arc::new(MdnsScanner::new(
                options.mdns_timeout,
                options.mdns_buffer,
            )))
            .with_probe(Arc::new(
                SshProbe::new(options.ssh_probe_timeout).with_port(options.ssh_port),
            ))
            .with_probe(Arc::new(ReverseDnsProbe::system(options.dns_timeout)))
    }

    pub fn with_discoverer(mut self, discoverer: Arc<dyn Discoverer>) -> Self {
        self.discoverers.push(discoverer);
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.probes.push(probe);
        self
    }

    /// Call `observer` on every phase transition.
    pub fn on_phase(mut self, observer: impl Fn(ScanPhase) + Send + Sync + 'static) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    fn enter(&self, phase: ScanPhase) {
        debug!(%phase, "scan phase");
        if let Some(observer) = &self.observer {
            observer(phase);
        }
    }

    /// Detect the network, then run both phases.
    pub async fn run(&self, cancel: &CancellationToken) -> ScanResult<ScanReport> {
        self.enter(ScanPhase::SettingUpNetwork);
        let range = match detect_network_range() {
            Ok(range) => range,
            Err(e) => {
                self.enter(ScanPhase::Failed);
                return Err(e);
            }
        };
        self.run_on(range, cancel).await
    }

    /// Run discovery and enrichment over a known range.
    pub async fn run_on(
        &self,
        range: NetworkRange,
        cancel: &CancellationToken,
    ) -> ScanResult<ScanReport> {
        let started = Instant::now();
        let registry = DeviceRegistry::new();

        if range.is_clamped() {
            warn!(
                range = %range,
                "subnet is wider than /24, only sweeping the /24 around {}",
                range.local_addr()
            );
        }

        self.enter(ScanPhase::Discovering);
        let discovery = self.discover(&range, &registry, cancel).await;
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        self.enter(ScanPhase::Enriching);
        let enrichment = self.enrich(&registry, cancel).await;
        if cancel.is_cancelled() {
            return Err(ScanError::Cancelled);
        }

        self.enter(ScanPhase::Done);
        let devices = registry.snapshot();
        info!(devices = devices.len(), range = %range, "scan complete");

        Ok(ScanReport {
            range,
            devices,
            discovery,
            enrichment,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Discovery barrier: returns only after every discoverer has finished.
    async fn discover(
        &self,
        range: &NetworkRange,
        registry: &DeviceRegistry,
        cancel: &CancellationToken,
    ) -> Vec<DiscoveryStat> {
        let runs = self.discoverers.iter().map(|discoverer| async move {
            let source = discoverer.source();
            match discoverer.discover(range, registry, cancel).await {
                Ok(found) => DiscoveryStat {
                    source,
                    found,
                    error: None,
                },
                Err(e) => {
                    match &e {
                        ScanError::Cancelled => {}
                        ScanError::PermissionDenied(_) if discoverer.requires_privileges() => warn!(
                            %source,
                            error = %e,
                            "{} discovery unavailable, run with sudo for a full sweep",
                            source
                        ),
                        _ => warn!(%source, error = %e, "{} discovery failed", source),
                    }
                    DiscoveryStat {
                        source,
                        found: 0,
                        error: Some(e.to_string()),
                    }
                }
            }
        });
        join_all(runs).await
    }

    /// Enrichment barrier over the post-discovery snapshot.
    async fn enrich(
        &self,
        registry: &DeviceRegistry,
        cancel: &CancellationToken,
    ) -> Vec<ProbeSummary> {
        let snapshot = registry.snapshot();
        let runs = self.probes.iter().map(|probe| {
            run_probe(
                Arc::clone(probe),
                &snapshot,
                registry,
                self.probe_concurrency,
                cancel,
            )
        });
        join_all(runs).await
    }
}

/// Run one probe over every device that wants it, at most `concurrency`
/// at a time.
pub async fn run_probe(
    probe: Arc<dyn Probe>,
    devices: &[Device],
    registry: &DeviceRegistry,
    concurrency: usize,
    cancel: &CancellationToken,
) -> ProbeSummary {
    let targets: Vec<Device> = devices
        .iter()
        .filter(|device| probe.wants(device))
        .cloned()
        .collect();

    let outcomes: Vec<ProbeOutcome> = stream::iter(targets)
        .map(|device| {
            let probe = Arc::clone(&probe);
            async move {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => ProbeOutcome::Cancelled,
                    outcome = probe.probe(&device, registry) => outcome,
                }
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let summary = ProbeSummary::from_outcomes(probe.kind(), &outcomes);
    debug!(
        kind = %summary.kind,
        timeout_ms = probe.timeout().as_millis() as u64,
        attempted = summary.attempted,
        updated = summary.updated,
        timed_out = summary.timed_out,
        "probe finished"
    );
    summary
}

/// Detect the network and run the default pipeline.
pub async fn run_scan(
    options: &ScanOptions,
    cancel: &CancellationToken,
    on_phase: impl Fn(ScanPhase) + Send + Sync + 'static,
) -> ScanResult<ScanReport> {
    ScanPipeline::from_options(options)
        .on_phase(on_phase)
        .run(cancel)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InterfaceRef;
    use async_trait::async_trait;
    use std::net::Ipv4Addr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn range() -> NetworkRange {
        NetworkRange::from_address(
            Ipv4Addr::new(192, 168, 1, 50),
            Ipv4Addr::new(255, 255, 255, 0),
            InterfaceRef {
                name: "eth0".to_string(),
                index: 2,
            },
        )
    }

    struct FakeDiscoverer {
        source: DiscoverySource,
        delay: Duration,
        addrs: Vec<Ipv4Addr>,
        fail: bool,
    }

    #[async_trait]
    impl Discoverer for FakeDiscoverer {
        fn source(&self) -> DiscoverySource {
            self.source
        }

        async fn discover(
            &self,
            _range: &NetworkRange,
            registry: &DeviceRegistry,
            _cancel: &CancellationToken,
        ) -> ScanResult<usize> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ScanError::PermissionDenied("no raw sockets".to_string()));
            }
            for addr in &self.addrs {
                registry.record_source(*addr, self.source);
            }
            Ok(self.addrs.len())
        }
    }

    /// Records how many devices existed when each probe call started.
    struct CountingProbe {
        seen: Arc<Mutex<Vec<usize>>>,
        in_flight: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Probe for CountingProbe {
        fn kind(&self) -> ProbeKind {
            ProbeKind::SshReachability
        }

        fn timeout(&self) -> Duration {
            Duration::from_secs(1)
        }

        async fn probe(&self, device: &Device, registry: &DeviceRegistry) -> ProbeOutcome {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.seen.lock().unwrap().push(registry.len());
            tokio::time::sleep(Duration::from_millis(10)).await;
            registry.set_reachable(device.addr_v4, true);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            ProbeOutcome::Updated
        }
    }

    fn counting_probe() -> (CountingProbe, Arc<Mutex<Vec<usize>>>, Arc<AtomicUsize>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let peak = Arc::new(AtomicUsize::new(0));
        let probe = CountingProbe {
            seen: Arc::clone(&seen),
            in_flight: Arc::new(AtomicUsize::new(0)),
            peak: Arc::clone(&peak),
        };
        (probe, seen, peak)
    }

    #[tokio::test]
    async fn test_enrichment_waits_for_slowest_discoverer() {
        let (probe, seen, _) = counting_probe();
        let pipeline = ScanPipeline::new(8)
            .with_discoverer(Arc::new(FakeDiscoverer {
                source: DiscoverySource::Icmp,
                delay: Duration::from_millis(10),
                addrs: vec![Ipv4Addr::new(192, 168, 1, 2)],
                fail: false,
            }))
            .with_discoverer(Arc::new(FakeDiscoverer {
                source: DiscoverySource::Mdns,
                delay: Duration::from_millis(150),
                addrs: vec![Ipv4Addr::new(192, 168, 1, 3), Ipv4Addr::new(192, 168, 1, 4)],
                fail: false,
            }))
            .with_probe(Arc::new(probe));

        let report = pipeline
            .run_on(range(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.devices.len(), 3);
        assert!(report.devices.iter().all(|d| d.can_connect_ssh));
        assert_eq!(*seen.lock().unwrap(), vec![3, 3, 3]);
        assert_eq!(report.enrichment[0].updated, 3);
    }

    #[tokio::test]
    async fn test_failed_discoverer_does_not_abort_scan() {
        let pipeline = ScanPipeline::new(4)
            .with_discoverer(Arc::new(FakeDiscoverer {
                source: DiscoverySource::Icmp,
                delay: Duration::ZERO,
                addrs: Vec::new(),
                fail: true,
            }))
            .with_discoverer(Arc::new(FakeDiscoverer {
                source: DiscoverySource::Mdns,
                delay: Duration::ZERO,
                addrs: vec![Ipv4Addr::new(192, 168, 1, 9)],
                fail: false,
            }));

        let report = pipeline
            .run_on(range(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.devices.len(), 1);
        let icmp = &report.discovery[0];
        assert_eq!(icmp.source, DiscoverySource::Icmp);
        assert!(icmp.error.is_some());
    }

    #[tokio::test]
    async fn test_probe_concurrency_is_bounded() {
        let (probe, _, peak) = counting_probe();
        let devices: Vec<Device> = (1..=40)
            .map(|i| Device::new(Ipv4Addr::new(10, 0, 0, i)))
            .collect();
        let registry = DeviceRegistry::new();
        for device in &devices {
            registry.get_or_create(device.addr_v4);
        }

        let summary = run_probe(
            Arc::new(probe),
            &devices,
            &registry,
            5,
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(summary.attempted, 40);
        assert!(peak.load(Ordering::SeqCst) <= 5);
    }

    #[tokio::test]
    async fn test_cancelled_scan_reports_cancelled() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pipeline = ScanPipeline::new(4).with_discoverer(Arc::new(FakeDiscoverer {
            source: DiscoverySource::Mdns,
            delay: Duration::ZERO,
            addrs: vec![Ipv4Addr::new(192, 168, 1, 9)],
            fail: false,
        }));

        let result = pipeline.run_on(range(), &cancel).await;
        assert!(matches!(result, Err(ScanError::Cancelled)));
    }

    #[tokio::test]
    async fn test_phase_transitions_are_reported_in_order() {
        let phases = Arc::new(Mutex::new(Vec::new()));
        let recorded = Arc::clone(&phases);
        let pipeline = ScanPipeline::new(1).on_phase(move |phase| {
            recorded.lock().unwrap().push(phase);
        });

        pipeline
            .run_on(range(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            *phases.lock().unwrap(),
            vec![ScanPhase::Discovering, ScanPhase::Enriching, ScanPhase::Done]
        );
    }

    #[test]
    fn test_default_options() {
        let options = ScanOptions::default();
        assert_eq!(options.icmp_timeout, Duration::from_secs(3));
        assert_eq!(options.probe_concurrency, 64);
        assert_eq!(options.ssh_port, 22);
    }
}

//! Scan pipeline behaviour through the public API.

use async_trait::async_trait;
use idiot::error::ScanResult;
use idiot::registry::DeviceRegistry;
use idiot::scanner::{
    Discoverer, PtrResolver, ReverseDnsProbe, ScanPhase, ScanPipeline, SshProbe,
};
use idiot::types::{DiscoverySource, InterfaceRef, NetworkRange};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

fn loopback_range() -> NetworkRange {
    NetworkRange::from_address(
        Ipv4Addr::new(127, 0, 0, 1),
        Ipv4Addr::new(255, 255, 255, 0),
        InterfaceRef {
            name: "lo".to_string(),
            index: 1,
        },
    )
}

struct StaticDiscoverer {
    source: DiscoverySource,
    addrs: Vec<Ipv4Addr>,
    hostname: Option<&'static str>,
}

#[async_trait]
impl Discoverer for StaticDiscoverer {
    fn source(&self) -> DiscoverySource {
        self.source
    }

    async fn discover(
        &self,
        _range: &NetworkRange,
        registry: &DeviceRegistry,
        _cancel: &CancellationToken,
    ) -> ScanResult<usize> {
        for addr in &self.addrs {
            registry.record_source(*addr, self.source);
            if let Some(name) = self.hostname {
                registry.set_hostname_if_empty(*addr, name);
            }
        }
        Ok(self.addrs.len())
    }
}

struct TableResolver;

#[async_trait]
impl PtrResolver for TableResolver {
    async fn lookup(&self, addr: Ipv4Addr) -> Result<Vec<String>, String> {
        match addr.octets()[3] {
            2 => Ok(vec!["kitchen-pi.lan.".to_string()]),
            _ => Err("NXDOMAIN".to_string()),
        }
    }
}

#[tokio::test]
async fn test_full_pipeline_enriches_devices() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            if listener.accept().await.is_err() {
                break;
            }
        }
    });

    let phases = Arc::new(Mutex::new(Vec::new()));
    let recorded = Arc::clone(&phases);

    let pipeline = ScanPipeline::new(4)
        .with_discoverer(Arc::new(StaticDiscoverer {
            source: DiscoverySource::Icmp,
            addrs: vec![Ipv4Addr::new(127, 0, 0, 1), Ipv4Addr::new(127, 0, 0, 2)],
            hostname: None,
        }))
        .with_discoverer(Arc::new(StaticDiscoverer {
            source: DiscoverySource::Mdns,
            addrs: vec![Ipv4Addr::new(127, 0, 0, 1)],
            hostname: Some("Google Nest Mini"),
        }))
        .with_probe(Arc::new(
            SshProbe::new(Duration::from_millis(500)).with_port(port),
        ))
        .with_probe(Arc::new(ReverseDnsProbe::new(
            TableResolver,
            Duration::from_millis(500),
        )))
        .on_phase(move |phase| recorded.lock().unwrap().push(phase));

    let report = pipeline
        .run_on(loopback_range(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        *phases.lock().unwrap(),
        vec![ScanPhase::Discovering, ScanPhase::Enriching, ScanPhase::Done]
    );

    assert_eq!(report.devices.len(), 2);
    let first = &report.devices[0];
    assert_eq!(first.addr_v4, Ipv4Addr::new(127, 0, 0, 1));
    assert_eq!(first.hostname.as_deref(), Some("Google Nest Mini"));
    assert_eq!(first.sources, vec![DiscoverySource::Icmp, DiscoverySource::Mdns]);
    assert!(first.can_connect_ssh);

    let second = &report.devices[1];
    assert_eq!(second.hostname.as_deref(), Some("kitchen-pi"));
}

#[tokio::test]
async fn test_cancelled_scan_reports_cancelled() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let pipeline = ScanPipeline::new(4).with_discoverer(Arc::new(StaticDiscoverer {
        source: DiscoverySource::Icmp,
        addrs: vec![Ipv4Addr::new(127, 0, 0, 1)],
        hostname: None,
    }));

    let result = pipeline.run_on(loopback_range(), &cancel).await;
    assert!(matches!(result, Err(idiot::ScanError::Cancelled)));
}

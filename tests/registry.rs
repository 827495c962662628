//! Concurrency properties of the device registry.

use idiot::registry::{DeviceRegistry, MergeField, Observation};
use idiot::types::DiscoverySource;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

fn addr(last: u8) -> Ipv4Addr {
    Ipv4Addr::new(10, 1, 1, last)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_record_source_is_idempotent() {
    let registry = DeviceRegistry::new();

    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let registry = registry.clone();
            tokio::spawn(async move {
                let source = if i % 2 == 0 {
                    DiscoverySource::Icmp
                } else {
                    DiscoverySource::Mdns
                };
                for last in 1..=20 {
                    registry.record_source(addr(last), source);
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(registry.len(), 20);
    for device in registry.snapshot() {
        assert_eq!(device.sources.len(), 2, "{:?}", device);
    }
}

#[test]
fn test_first_hostname_writer_wins_under_contention() {
    let registry = Arc::new(DeviceRegistry::new());
    registry.get_or_create(addr(7));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                registry.merge_field(addr(7), MergeField::Hostname(format!("name-{}", i)))
            })
        })
        .collect();
    let winners = handles
        .into_iter()
        .map(|h| h.join().unwrap())
        .filter(|won| *won)
        .count();

    assert_eq!(winners, 1);
    let hostname = registry.get(addr(7)).unwrap().hostname.unwrap();
    assert!(hostname.starts_with("name-"));
}

#[test]
fn test_observation_merges_into_existing_device() {
    let registry = DeviceRegistry::new();
    registry.record_source(addr(3), DiscoverySource::Icmp);

    let v6: Ipv6Addr = "fe80::1".parse().unwrap();
    registry.observe(
        addr(3),
        Observation::new(DiscoverySource::Mdns)
            .with_hostname(Some("printer".to_string()))
            .with_addr_v6(Some(v6)),
    );
    registry.observe(
        addr(3),
        Observation::new(DiscoverySource::Mdns).with_hostname(Some("later".to_string())),
    );

    let device = registry.get(addr(3)).unwrap();
    assert_eq!(
        device.sources,
        vec![DiscoverySource::Icmp, DiscoverySource::Mdns]
    );
    assert_eq!(device.hostname.as_deref(), Some("printer"));
    assert_eq!(device.addr_v6, Some(v6));
    assert!(!device.can_connect_ssh);
}

//! SSH reachability probe.
//!
//! A bare TCP connect to the SSH port. The stream is dropped as soon as the
//! handshake completes; no SSH protocol bytes are exchanged.

use crate::error::{ScanError, ScanResult};
use crate::registry::DeviceRegistry;
use crate::scanner::traits::{Probe, ProbeKind, ProbeOutcome};
use crate::types::{Device, DEFAULT_SSH_PORT};
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::trace;

/// Marks devices that accept TCP connections on the SSH port.
pub struct SshProbe {
    port: u16,
    timeout: Duration,
}

impl SshProbe {
    /// Probe port 22 with the given connect timeout.
    pub fn new(timeout: Duration) -> Self {
        Self {
            port: DEFAULT_SSH_PORT,
            timeout,
        }
    }

    /// Probe a different port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Attempt to connect to the target address.
    async fn attempt_connect(&self, addr: SocketAddr) -> ScanResult<TcpStream> {
        match timeout(self.timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => Ok(stream),
            Ok(Err(e)) => Err(ScanError::Io(e)),
            Err(_) => Err(ScanError::ProbeTimeout),
        }
    }
}

#[async_trait]
impl Probe for SshProbe {
    fn kind(&self) -> ProbeKind {
        ProbeKind::SshReachability
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn probe(&self, device: &Device, registry: &DeviceRegistry) -> ProbeOutcome {
        let addr = SocketAddr::new(IpAddr::V4(device.addr_v4), self.port);

        match self.attempt_connect(addr).await {
            Ok(stream) => {
                drop(stream);
                trace!(%addr, "SSH port open");
                registry.set_reachable(device.addr_v4, true);
                ProbeOutcome::Updated
            }
            Err(ScanError::ProbeTimeout) => ProbeOutcome::TimedOut,
            Err(e) => {
                trace!(%addr, error = %e, "SSH port closed");
                ProbeOutcome::Unchanged
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_open_port_marks_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let _ = listener.accept().await;
        });

        let registry = DeviceRegistry::new();
        let device = registry.get_or_create(Ipv4Addr::LOCALHOST);
        let probe = SshProbe::new(Duration::from_secs(1)).with_port(port);

        assert_eq!(probe.probe(&device, &registry).await, ProbeOutcome::Updated);
        assert!(registry.get(Ipv4Addr::LOCALHOST).unwrap().can_connect_ssh);
    }

    #[tokio::test]
    async fn test_closed_port_leaves_flag_unset() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap().port()
        };

        let registry = DeviceRegistry::new();
        let device = registry.get_or_create(Ipv4Addr::LOCALHOST);
        let probe = SshProbe::new(Duration::from_millis(500)).with_port(port);

        let outcome = probe.probe(&device, &registry).await;
        assert_ne!(outcome, ProbeOutcome::Updated);
        assert!(!registry.get(Ipv4Addr::LOCALHOST).unwrap().can_connect_ssh);
    }

    #[test]
    fn test_defaults() {
        let probe = SshProbe::new(Duration::from_secs(1));
        assert_eq!(probe.port, 22);
        assert_eq!(probe.kind(), ProbeKind::SshReachability);
    }
}

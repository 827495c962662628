//! Discovery and enrichment abstractions.
//!
//! Discovery protocols and enrichment probes are plugged into the scan
//! pipeline through these traits, so the pipeline can be driven by fakes
//! in tests.

use crate::error::ScanResult;
use crate::registry::DeviceRegistry;
use crate::types::{Device, DiscoverySource, NetworkRange};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A discovery protocol that writes observations into the registry.
///
/// # Example
///
/// ```ignore
/// use idiot::scanner::{Discoverer, IcmpScanner};
///
/// let scanner = IcmpScanner::new(timeout, poll, 1000);
/// let found = scanner.discover(&range, &registry, &cancel).await?;
/// ```
#[async_trait]
pub trait Discoverer: Send + Sync {
    /// The source recorded on devices this discoverer observes.
    fn source(&self) -> DiscoverySource;

    /// Whether the protocol needs elevated privileges to run fully.
    fn requires_privileges(&self) -> bool {
        false
    }

    /// Run one bounded discovery pass and return the number of distinct
    /// devices observed.
    async fn discover(
        &self,
        range: &NetworkRange,
        registry: &DeviceRegistry,
        cancel: &CancellationToken,
    ) -> ScanResult<usize>;
}

/// Enrichment probe kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeKind {
    /// TCP connect to the SSH port.
    SshReachability,
    /// PTR lookup for a hostname.
    ReverseDns,
}

impl fmt::Display for ProbeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SshReachability => write!(f, "SSH reachability"),
            Self::ReverseDns => write!(f, "reverse DNS"),
        }
    }
}

/// What a single probe did to its device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// The registry entry was updated.
    Updated,
    /// The probe ran but produced nothing new.
    Unchanged,
    /// No answer within the per-device timeout.
    TimedOut,
    /// Stopped by cancellation.
    Cancelled,
}

impl fmt::Display for ProbeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Updated => write!(f, "updated"),
            Self::Unchanged => write!(f, "unchanged"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A per-device enrichment probe.
///
/// Probes read a copy of the device and write results back through the
/// registry's synchronized setters. Failures are absorbed into the outcome.
#[async_trait]
pub trait Probe: Send + Sync {
    /// Which probe this is.
    fn kind(&self) -> ProbeKind;

    /// Per-device timeout.
    fn timeout(&self) -> Duration;

    /// Whether the device needs this probe at all.
    fn wants(&self, _device: &Device) -> bool {
        true
    }

    /// Probe one device.
    async fn probe(&self, device: &Device, registry: &DeviceRegistry) -> ProbeOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_kind_display() {
        assert_eq!(ProbeKind::SshReachability.to_string(), "SSH reachability");
        assert_eq!(ProbeKind::ReverseDns.to_string(), "reverse DNS");
    }

    #[test]
    fn test_probe_outcome_serialization() {
        let json = serde_json::to_string(&ProbeOutcome::TimedOut).unwrap();
        assert_eq!(json, "\"timed_out\"");
    }
}

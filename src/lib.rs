//! # idiot - IoT device discovery and SSH access
//!
//! idiot finds devices on the local IPv4 subnet and opens an interactive
//! SSH shell on the one you pick.
//!
//! ## Features
//!
//! - **ICMP sweep**: one shared ICMP socket, paced echo requests to every
//!   host in the local /24, replies filtered by identifier and checksum
//! - **mDNS browse**: service-type enumeration followed by per-type browsing
//! - **Enrichment**: SSH port reachability and reverse DNS names, run with a
//!   bounded number of in-flight probes
//! - **Secure sessions**: known_hosts verification, password authentication,
//!   a PTY sized to the local terminal and guaranteed raw-mode restore
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use idiot::scanner::{run_scan, ScanOptions};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() {
//!     let cancel = CancellationToken::new();
//!     let report = run_scan(&ScanOptions::default(), &cancel, |_| {}).await.unwrap();
//!
//!     for device in &report.devices {
//!         println!("{} ssh={}", device, device.can_connect_ssh);
//!     }
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`types`] - Device, network range and address types
//! - [`network`] - Local network range detection
//! - [`registry`] - The synchronized device registry
//! - [`scanner`] - Discoverers, probes and the scan pipeline
//! - [`session`] - Host key verification and interactive SSH sessions
//! - [`config`] - Settings and application paths
//! - [`storage`] - Saved device persistence
//! - [`error`] - Error types
//! - [`output`] / [`ui`] - Console output and prompts

pub mod cli;
pub mod config;
pub mod error;
pub mod network;
pub mod output;
pub mod registry;
pub mod scanner;
pub mod session;
pub mod storage;
pub mod types;
pub mod ui;

pub use error::{CliError, ScanError, SessionError};
pub use registry::DeviceRegistry;
pub use scanner::{run_scan, ScanOptions, ScanPipeline, ScanReport};
pub use types::{Device, DiscoverySource, NetworkRange};

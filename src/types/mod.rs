//! Core value types shared by the scanner and the session layer.

mod device;
mod network_range;
mod target;

pub use device::{Device, DiscoverySource};
pub use network_range::{InterfaceRef, NetworkRange};
pub use target::{
    add_port, add_port_or, is_valid_hostname, split_host_port, TargetError, DEFAULT_SSH_PORT,
};

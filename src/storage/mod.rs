//! Saved device persistence.
//!
//! Provides JSON-based storage for devices selected after a scan.

mod device_store;

pub use device_store::{DeviceStore, SavedDevice};

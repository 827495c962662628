//! JSON-based saved device storage.
//!
//! Devices the user chose to keep are stored in one JSON file, keyed by
//! IPv4 address. Saving a device that is already stored replaces it.

use crate::error::{StorageError, StorageResult};
use crate::types::Device;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use tracing::debug;

/// A persisted device record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SavedDevice {
    #[serde(flatten)]
    pub device: Device,
    /// When the device was last saved.
    pub saved_at: DateTime<Utc>,
}

impl SavedDevice {
    pub fn new(device: Device) -> Self {
        Self {
            device,
            saved_at: Utc::now(),
        }
    }
}

/// JSON file-based device storage.
pub struct DeviceStore {
    file: PathBuf,
}

impl DeviceStore {
    /// Create a store backed by `file`. The parent directory is created.
    pub fn new(file: impl Into<PathBuf>) -> StorageResult<Self> {
        let file = file.into();
        if let Some(parent) = file.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| StorageError::DirectoryError(e.to_string()))?;
        }
        Ok(Self { file })
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.file
    }

    /// Load every saved device. A missing file is an empty store.
    pub fn load(&self) -> StorageResult<Vec<SavedDevice>> {
        if !self.file.exists() {
            return Ok(Vec::new());
        }

        let content =
            fs::read_to_string(&self.file).map_err(|e| StorageError::LoadFailed(e.to_string()))?;
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&content).map_err(|e| StorageError::LoadFailed(e.to_string()))
    }

    /// Saved devices as plain [`Device`] values keyed by address.
    pub fn load_map(&self) -> StorageResult<BTreeMap<Ipv4Addr, Device>> {
        Ok(self
            .load()?
            .into_iter()
            .map(|saved| (saved.device.addr_v4, saved.device))
            .collect())
    }

    /// Save a device, replacing any stored record with the same address.
    pub fn save(&self, device: &Device) -> StorageResult<()> {
        let mut records = self.load()?;
        records.retain(|saved| saved.device.addr_v4 != device.addr_v4);
        records.push(SavedDevice::new(device.clone()));
        records.sort_by_key(|saved| saved.device.addr_v4);
        self.write(&records)?;
        debug!(addr = %device.addr_v4, "device saved");
        Ok(())
    }

    /// Remove the device with the given address.
    pub fn remove(&self, addr: Ipv4Addr) -> StorageResult<SavedDevice> {
        let mut records = self.load()?;
        let index = records
            .iter()
            .position(|saved| saved.device.addr_v4 == addr)
            .ok_or_else(|| StorageError::DeviceNotFound(addr.to_string()))?;
        let removed = records.remove(index);
        self.write(&records)?;
        Ok(removed)
    }

    fn write(&self, records: &[SavedDevice]) -> StorageResult<()> {
        let content = serde_json::to_string_pretty(records)?;
        fs::write(&self.file, content).map_err(|e| StorageError::SaveFailed(e.to_string()))
    }
}

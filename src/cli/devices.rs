//! Devices subcommand implementation.
//!
//! Handles the `idiot devices` command for managing saved devices.

use crate::cli::Context;
use crate::error::{CliError, CliResult};
use crate::output;
use crate::storage::DeviceStore;
use crate::types::Device;
use clap::{Parser, Subcommand};
use std::net::Ipv4Addr;

/// Manage saved devices.
#[derive(Parser, Debug)]
pub struct DevicesCommand {
    #[command(subcommand)]
    pub action: DevicesAction,
}

/// Saved device actions.
#[derive(Subcommand, Debug)]
pub enum DevicesAction {
    /// List saved devices
    #[command(alias = "ls")]
    List {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Remove a saved device
    #[command(alias = "rm")]
    Forget {
        /// IPv4 address of the device
        address: Ipv4Addr,
    },
}

impl DevicesCommand {
    /// Execute the devices command.
    pub fn execute(&self, ctx: &Context) -> CliResult<()> {
        let store = DeviceStore::new(ctx.paths.devices_file())?;
        match &self.action {
            DevicesAction::List { json } => list_devices(&store, *json, ctx.quiet),
            DevicesAction::Forget { address } => forget_device(&store, *address, ctx.quiet),
        }
    }
}

fn list_devices(store: &DeviceStore, json: bool, quiet: bool) -> CliResult<()> {
    let saved = store.load()?;

    if json {
        return output::print_json(&saved).map_err(CliError::Output);
    }

    if saved.is_empty() {
        if !quiet {
            output::print_info("No saved devices. Run `idiot scan` to find some.");
        }
        return Ok(());
    }

    let devices: Vec<Device> = saved.into_iter().map(|s| s.device).collect();
    output::print_devices(&devices).map_err(CliError::Output)
}

fn forget_device(store: &DeviceStore, address: Ipv4Addr, quiet: bool) -> CliResult<()> {
    let removed = store.remove(address)?;
    if !quiet {
        output::print_success(&format!("Forgot {}", removed.device));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_forget_unknown_device() {
        let dir = TempDir::new().unwrap();
        let store = DeviceStore::new(dir.path().join("devices.json")).unwrap();
        let result = forget_device(&store, Ipv4Addr::new(10, 0, 0, 9), true);
        assert!(matches!(
            result,
            Err(CliError::Storage(crate::error::StorageError::DeviceNotFound(_)))
        ));
    }

    #[test]
    fn test_forget_saved_device() {
        let dir = TempDir::new().unwrap();
        let store = DeviceStore::new(dir.path().join("devices.json")).unwrap();
        store.save(&Device::new(Ipv4Addr::new(10, 0, 0, 9))).unwrap();

        forget_device(&store, Ipv4Addr::new(10, 0, 0, 9), true).unwrap();
        assert!(store.load().unwrap().is_empty());
    }
}

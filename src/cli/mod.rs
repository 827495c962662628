//! CLI subcommand definitions and handlers.
//!
//! Implements a git-like subcommand architecture:
//! - `idiot scan` - Discover devices on the local network
//! - `idiot ssh` - Open a shell on a saved or given device
//! - `idiot devices list|forget` - Manage saved devices
//! - `idiot version` - Print the version

mod devices;
mod scan;
mod ssh;

pub use devices::{DevicesAction, DevicesCommand};
pub use scan::ScanCommand;
pub use ssh::{untrusted_host_hint, SshCommand};

use crate::config::{AppSettings, Paths};
use crate::error::CliResult;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// idiot - find IoT devices on your network and SSH into them.
///
/// Devices are discovered with an ICMP sweep of the local /24 and an mDNS
/// browse, then checked for an open SSH port and a reverse DNS name.
#[derive(Parser, Debug)]
#[command(name = "idiot")]
#[command(author = "Bradley Tenuta")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Discover IoT devices on the local network", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    /// Path to custom configuration file
    #[arg(long, global = true, value_name = "PATH", env = "IDIOT_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Scan the local network for devices
    #[command(alias = "s")]
    Scan(ScanCommand),

    /// Open an interactive SSH shell on a device
    Ssh(SshCommand),

    /// Manage saved devices
    #[command(alias = "d")]
    Devices(DevicesCommand),

    /// Print version information
    Version,
}

/// State shared by every subcommand.
#[derive(Debug, Clone)]
pub struct Context {
    pub settings: AppSettings,
    pub paths: Paths,
    pub verbose: bool,
    pub quiet: bool,
}

impl Cli {
    /// Run the selected subcommand. Returns the process exit code.
    pub async fn execute(&self, ctx: &Context) -> CliResult<i32> {
        match &self.command {
            Commands::Scan(cmd) => cmd.execute(ctx).await.map(|_| 0),
            Commands::Ssh(cmd) => cmd.execute(ctx).await,
            Commands::Devices(cmd) => cmd.execute(ctx).map(|_| 0),
            Commands::Version => {
                println!("idiot {}", env!("CARGO_PKG_VERSION"));
                Ok(0)
            }
        }
    }
}

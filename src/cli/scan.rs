//! Scan subcommand implementation.
//!
//! Handles the `idiot scan` command: sweep the local network, print the
//! devices found and offer to save one of them.

use crate::cli::Context;
use crate::error::{CliError, CliResult};
use crate::output::{self, OutputFormat};
use crate::scanner::{run_scan, ScanOptions, ScanPhase, ScanReport};
use crate::storage::DeviceStore;
use crate::ui;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Discover devices on the local network.
#[derive(Parser, Debug)]
pub struct ScanCommand {
    /// Print the scan report as JSON
    #[arg(long)]
    pub json: bool,

    /// Don't offer to save a device after the scan
    #[arg(long)]
    pub no_save: bool,

    /// ICMP sweep deadline in milliseconds
    #[arg(long, value_name = "MS")]
    pub icmp_timeout: Option<u64>,

    /// mDNS browse deadline in milliseconds
    #[arg(long, value_name = "MS")]
    pub mdns_timeout: Option<u64>,

    /// Maximum in-flight enrichment probes
    #[arg(short = 'c', long)]
    pub concurrency: Option<usize>,
}

impl ScanCommand {
    fn format(&self) -> OutputFormat {
        if self.json {
            OutputFormat::Json
        } else {
            OutputFormat::Plain
        }
    }

    /// Scan options from settings with command-line overrides applied.
    pub fn options(&self, ctx: &Context) -> ScanOptions {
        let mut options = ctx.settings.scan_options();
        if let Some(ms) = self.icmp_timeout.filter(|ms| *ms > 0) {
            options.icmp_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = self.mdns_timeout.filter(|ms| *ms > 0) {
            options.mdns_timeout = Duration::from_millis(ms);
        }
        if let Some(limit) = self.concurrency.filter(|c| *c > 0) {
            options.probe_concurrency = limit;
        }
        options
    }

    /// Execute the scan command.
    pub async fn execute(&self, ctx: &Context) -> CliResult<()> {
        let interactive = self.format() == OutputFormat::Plain && !ctx.quiet;

        if interactive && !is_root() {
            output::print_warning(
                "Not running as root; the ICMP sweep needs an unprivileged ping socket or sudo.",
            );
        }

        let report = self.run(ctx, interactive).await?;

        output::format_report(&report, self.format()).map_err(CliError::Output)?;

        if interactive && !self.no_save {
            self.offer_save(ctx, &report)?;
        }

        Ok(())
    }

    async fn run(&self, ctx: &Context, show_progress: bool) -> CliResult<ScanReport> {
        let options = self.options(ctx);
        debug!(?options, "starting scan");

        let progress = if show_progress {
            spinner()
        } else {
            ProgressBar::hidden()
        };

        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    cancel.cancel();
                }
            })
        };

        let observer = progress.clone();
        let result = run_scan(&options, &cancel, move |phase: ScanPhase| {
            observer.set_message(format!("{}...", phase));
        })
        .await;

        interrupt.abort();
        progress.finish_and_clear();

        Ok(result?)
    }

    fn offer_save(&self, ctx: &Context, report: &ScanReport) -> CliResult<()> {
        if report.devices.is_empty() {
            return Ok(());
        }

        let devices = report.device_map();

        let Some(addr) = ui::select_device(&devices, "Save a device?")? else {
            return Ok(());
        };

        if let Some(device) = devices.get(&addr) {
            let store = DeviceStore::new(ctx.paths.devices_file())?;
            store.save(device)?;
            output::print_success(&format!("Saved {}", device));
        }
        Ok(())
    }
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Check if running with root/admin privileges.
fn is_root() -> bool {
    #[cfg(unix)]
    {
        unsafe { libc::geteuid() == 0 }
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AppSettings, Paths};
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> Context {
        Context {
            settings: AppSettings::default(),
            paths: Paths::at(dir.path().join("config"), dir.path().join("data")).unwrap(),
            verbose: false,
            quiet: true,
        }
    }

    #[test]
    fn test_overrides_apply() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let cmd = ScanCommand {
            json: true,
            no_save: false,
            icmp_timeout: Some(500),
            mdns_timeout: None,
            concurrency: Some(8),
        };

        let options = cmd.options(&ctx);
        assert_eq!(options.icmp_timeout, Duration::from_millis(500));
        assert_eq!(options.mdns_timeout, Duration::from_millis(2000));
        assert_eq!(options.probe_concurrency, 8);
        assert_eq!(cmd.format(), OutputFormat::Json);
    }

    #[test]
    fn test_zero_overrides_ignored() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        let cmd = ScanCommand {
            json: false,
            no_save: true,
            icmp_timeout: Some(0),
            mdns_timeout: Some(0),
            concurrency: Some(0),
        };

        let options = cmd.options(&ctx);
        assert_eq!(options.icmp_timeout, Duration::from_millis(3000));
        assert_eq!(options.probe_concurrency, 64);
    }
}

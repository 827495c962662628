//! Plain text output formatting.
//!
//! Produces human-readable output with colors and formatting.

use crate::scanner::{DiscoveryStat, ProbeSummary, ScanReport};
use crate::types::Device;
use console::style;
use std::io::{self, Write};

const RULE: &str = "═══════════════════════════════════════════════════════════════════════════";
const THIN_RULE: &str = "───────────────────────────────────────────────────────────────────────────";

/// Print a finished scan in human-readable form.
pub fn print_report(report: &ScanReport) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();

    writeln!(out)?;
    writeln!(out, "{}", style(RULE).cyan())?;
    writeln!(out, "                        {} Scan Results", style("idiot").cyan().bold())?;
    writeln!(out, "{}", style(RULE).cyan())?;
    writeln!(out)?;

    writeln!(out, "  {} {}", style("Network:").bold(), report.range)?;
    writeln!(
        out,
        "  {} {} devices in {:.2}s",
        style("Found:").bold(),
        style(report.devices.len()).green().bold(),
        report.duration_ms as f64 / 1000.0
    )?;
    for stat in &report.discovery {
        writeln!(out, "           {}", discovery_line(stat))?;
    }
    for summary in &report.enrichment {
        writeln!(out, "           {}", probe_line(summary))?;
    }
    writeln!(out)?;

    write_devices(&mut out, &report.devices)?;

    writeln!(out)?;
    writeln!(out, "{}", style(RULE).cyan())?;
    writeln!(out)?;
    Ok(())
}

/// Print a device table without scan statistics.
pub fn print_devices(devices: &[Device]) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    write_devices(&mut out, devices)
}

fn write_devices(out: &mut impl Write, devices: &[Device]) -> io::Result<()> {
    if devices.is_empty() {
        writeln!(out, "  {}", style("No devices to display.").dim())?;
        return Ok(());
    }

    writeln!(out, "  {}", style(THIN_RULE).dim())?;
    writeln!(
        out,
        "  {:>3}  {:<15}  {:<24}  {:<4}  {}",
        style("#").bold(),
        style("ADDRESS").bold(),
        style("HOSTNAME").bold(),
        style("SSH").bold(),
        style("SOURCES").bold()
    )?;
    writeln!(out, "  {}", style(THIN_RULE).dim())?;

    for (index, device) in devices.iter().enumerate() {
        let ssh = if device.can_connect_ssh {
            style("yes").green().bold()
        } else {
            style("no").dim()
        };
        writeln!(
            out,
            "  {:>3}  {:<15}  {:<24}  {:<4}  {}",
            index + 1,
            device.addr_v4,
            truncate_string(device.hostname.as_deref().unwrap_or("-"), 24),
            ssh,
            style(device.sources_label()).dim()
        )?;
        if let Some(v6) = device.addr_v6 {
            writeln!(out, "       {}", style(v6).dim())?;
        }
    }

    writeln!(out, "  {}", style(THIN_RULE).dim())?;
    Ok(())
}

fn discovery_line(stat: &DiscoveryStat) -> String {
    match &stat.error {
        Some(error) => format!("{}: {} ({})", stat.source, style("unavailable").yellow(), error),
        None => format!("{}: {} responded", stat.source, stat.found),
    }
}

fn probe_line(summary: &ProbeSummary) -> String {
    format!(
        "{}: {} of {} updated, {} timed out",
        summary.kind, summary.updated, summary.attempted, summary.timed_out
    )
}

/// Print an error message.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", style("Error:").red().bold(), msg);
}

/// Print a warning message.
pub fn print_warning(msg: &str) {
    eprintln!("{} {}", style("Warning:").yellow().bold(), msg);
}

/// Print a success message.
pub fn print_success(msg: &str) {
    println!("{} {}", style("✓").green().bold(), msg);
}

/// Print an info message.
pub fn print_info(msg: &str) {
    println!("{} {}", style("ℹ").blue().bold(), msg);
}

/// Truncate a string to a maximum number of characters, adding ellipsis if truncated.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

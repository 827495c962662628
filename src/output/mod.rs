//! Output formatting module.
//!
//! Provides plain text and JSON output of scan reports and device lists.

mod json_format;
mod plain;

pub use json_format::print_json;
pub use plain::{
    print_devices, print_error, print_info, print_report, print_success, print_warning,
};

use crate::scanner::ScanReport;
use std::fmt;
use std::io;

/// Output format for results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    #[default]
    Plain,
    /// JSON structured output
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Json => write!(f, "json"),
        }
    }
}

/// Format and print a scan report according to the specified format.
pub fn format_report(report: &ScanReport, format: OutputFormat) -> io::Result<()> {
    match format {
        OutputFormat::Plain => print_report(report),
        OutputFormat::Json => print_json(report),
    }
}

//! Interactive prompts: device selection and credentials.
//!
//! Prompts are written to stderr so stdout stays clean for `--json`.

use crate::error::{CliError, CliResult};
use crate::output;
use crate::types::Device;
use console::{style, Term};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;

/// Interpret a selection answer against a list of `count` entries.
///
/// Blank input, `q`, `n` and `none` mean nothing was selected. Numbers are
/// 1-based; a dotted-quad picks the device by address.
pub fn parse_selection(
    input: &str,
    addrs: &[Ipv4Addr],
) -> Result<Option<Ipv4Addr>, String> {
    let input = input.trim();
    if input.is_empty() || matches!(input.to_ascii_lowercase().as_str(), "q" | "n" | "none") {
        return Ok(None);
    }

    if let Ok(index) = input.parse::<usize>() {
        return match index.checked_sub(1).and_then(|i| addrs.get(i)) {
            Some(addr) => Ok(Some(*addr)),
            None => Err(format!("choose a number between 1 and {}", addrs.len())),
        };
    }

    match input.parse::<Ipv4Addr>() {
        Ok(addr) if addrs.contains(&addr) => Ok(Some(addr)),
        Ok(addr) => Err(format!("{} is not in the list", addr)),
        Err(_) => Err(format!("'{}' is not a number or address", input)),
    }
}

/// Show `devices` and let the user pick one. Returns `None` when the user
/// declines or there is nothing to choose from.
pub fn select_device(
    devices: &BTreeMap<Ipv4Addr, Device>,
    prompt: &str,
) -> CliResult<Option<Ipv4Addr>> {
    if devices.is_empty() {
        return Ok(None);
    }

    let list: Vec<Device> = devices.values().cloned().collect();
    let addrs: Vec<Ipv4Addr> = devices.keys().copied().collect();
    output::print_devices(&list).map_err(CliError::Prompt)?;

    let term = Term::stderr();
    loop {
        term.write_str(&format!(
            "{} {} {} ",
            style("?").cyan().bold(),
            prompt,
            style("[1-N, address, or blank for none]").dim()
        ))
        .map_err(CliError::Prompt)?;
        let answer = term.read_line().map_err(CliError::Prompt)?;

        match parse_selection(&answer, &addrs) {
            Ok(choice) => return Ok(choice),
            Err(reason) => output::print_warning(&reason),
        }
    }
}

/// Read one line of visible input.
pub fn prompt_line(prompt: &str) -> CliResult<String> {
    let term = Term::stderr();
    term.write_str(&format!("{} {}: ", style("?").cyan().bold(), prompt))
        .map_err(CliError::Prompt)?;
    Ok(term.read_line().map_err(CliError::Prompt)?.trim().to_string())
}

/// Read a password without echoing it.
pub fn prompt_password(prompt: &str) -> CliResult<String> {
    let term = Term::stderr();
    term.write_str(&format!("{} {}: ", style("?").cyan().bold(), prompt))
        .map_err(CliError::Prompt)?;
    term.read_secure_line().map_err(CliError::Prompt)
}

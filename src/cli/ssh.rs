//! SSH subcommand implementation.
//!
//! Handles `idiot ssh`: pick a saved device (or take `--address`), prompt
//! for credentials and open an interactive shell.

use crate::cli::Context;
use crate::error::{CliError, CliResult};
use crate::output;
use crate::session::{establish_session, Credentials, CrosstermTerminal};
use crate::storage::DeviceStore;
use crate::types::split_host_port;
use crate::ui;
use clap::Parser;
use tracing::info;

/// Open an interactive SSH shell on a device.
#[derive(Parser, Debug)]
pub struct SshCommand {
    /// Device address, optionally with a port (skips the selection prompt)
    #[arg(short, long, value_name = "ADDR")]
    pub address: Option<String>,

    /// Remote username (prompted if omitted)
    #[arg(short, long)]
    pub user: Option<String>,

    /// Trust and record the host key if the host is not in known_hosts yet
    #[arg(long)]
    pub accept_new: bool,
}

impl SshCommand {
    /// Execute the ssh command. Returns the remote shell's exit status.
    pub async fn execute(&self, ctx: &Context) -> CliResult<i32> {
        let Some(target) = self.target(ctx)? else {
            if !ctx.quiet {
                output::print_info("No device selected.");
            }
            return Ok(0);
        };

        let (host, port) = endpoint(&target, ctx)?;

        let user = match &self.user {
            Some(user) => user.clone(),
            None => ui::prompt_line("Username")?,
        };
        if user.is_empty() {
            return Err(CliError::Other("a username is required".to_string()));
        }
        let password = ui::prompt_password(&format!("Password for {}@{}", user, host))?;
        let credentials = Credentials::new(user, password);

        if !ctx.settings.ssh_secure_mode && !ctx.quiet {
            output::print_warning("ssh_secure_mode is off; the host key will not be verified.");
        }

        let status = establish_session(
            &host,
            port,
            &credentials,
            &ctx.settings,
            self.accept_new,
            &CrosstermTerminal,
        )
        .await?;

        info!(host = %host, status = ?status, "session closed");
        Ok(status.map_or(0, |code| i32::try_from(code).unwrap_or(255)))
    }

    /// The address to connect to, from `--address` or the saved devices.
    fn target(&self, ctx: &Context) -> CliResult<Option<String>> {
        if let Some(address) = &self.address {
            return Ok(Some(address.clone()));
        }

        let store = DeviceStore::new(ctx.paths.devices_file())?;
        let devices = store.load_map()?;
        if devices.is_empty() {
            return Err(CliError::Other(
                "no saved devices; run `idiot scan` to find one or pass --address".to_string(),
            ));
        }

        Ok(ui::select_device(&devices, "Connect to which device?")?.map(|addr| addr.to_string()))
    }
}

/// Host and port to dial; addresses without a port use `ssh_port`.
fn endpoint(target: &str, ctx: &Context) -> CliResult<(String, u16)> {
    Ok(split_host_port(target, ctx.settings.ssh_port)?)
}

/// Remediation text for a host whose key is not trusted.
pub fn untrusted_host_hint(host: &str, port: u16) -> String {
    let keyscan = if port == crate::types::DEFAULT_SSH_PORT {
        format!("ssh-keyscan -H {}", host)
    } else {
        format!("ssh-keyscan -H -p {} {}", port, host)
    };
    format!(
        "Add this host's key to your known_hosts after checking the fingerprint, e.g. \
         `{} >> ~/.ssh/known_hosts`, or rerun with --accept-new to trust it on first use.",
        keyscan
    )
}

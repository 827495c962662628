//! idiot - find IoT devices on the local network and SSH into them.

use anyhow::Context as _;
use clap::Parser;
use idiot::cli::{untrusted_host_hint, Cli, Context};
use idiot::config::{AppSettings, Paths};
use idiot::error::{CliError, SessionError};
use idiot::output;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            report(&err);
            1
        }
    };

    // The stdin reader used by the SSH bridge sits on a blocking thread that
    // would hold up runtime shutdown, so exit directly.
    std::process::exit(code);
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let paths = Paths::new().context("failed to prepare application directories")?;
    let settings = match &cli.config {
        Some(path) => AppSettings::load_from(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => AppSettings::load(&paths).context("failed to load settings")?,
    };

    init_logging(settings.debug || cli.verbose, cli.quiet);
    tracing::debug!(config = %paths.settings_file().display(), "settings loaded");

    let ctx = Context {
        settings,
        paths,
        verbose: cli.verbose,
        quiet: cli.quiet,
    };

    Ok(cli.execute(&ctx).await?)
}

/// Install the stderr log subscriber. `RUST_LOG` takes precedence.
fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,idiot={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn report(err: &anyhow::Error) {
    output::print_error(&format!("{:#}", err));

    if let Some(CliError::Session(SessionError::HostKeyUntrusted { host, port, .. })) =
        err.downcast_ref::<CliError>()
    {
        output::print_warning(&untrusted_host_hint(host, *port));
    }
}

//! Warden Control - CLI for the warden hardening tool

use clap::Parser;
use tracing_subscriber::EnvFilter;
use wardenctl::cli::Cli;
use wardenctl::{commands, output};

/// Filter variable for internal diagnostics
const LOG_ENV: &str = "WARDEN_LOG";

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let code = match commands::run(cli) {
        Ok(code) => code,
        Err(err) => {
            output::display_error(&format!("{:#}", err));
            commands::exit_code_for(&err)
        }
    };
    std::process::exit(code);
}

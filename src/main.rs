//! inplace command-line entry point

use anyhow::Context;
use clap::Parser;
use std::process;
use tracing_subscriber::EnvFilter;

use inplace_core::cli::{Cli, CliContext, Driver};

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let context = CliContext::new(cli.verbose, cli.quiet);
    match run(&cli, context.clone()) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            context.error(&format!("{:#}", e));
            process::exit(2);
        }
    }
}

fn run(cli: &Cli, context: CliContext) -> anyhow::Result<bool> {
    let driver = Driver::load(context, cli)
        .with_context(|| format!("Failed to load workspace {}", cli.workspace.display()))?;
    Ok(driver.execute(&cli.command)?)
}

/// `RUST_LOG` wins over the verbosity flag
fn init_tracing(verbose: bool) {
    let default = if verbose { "inplace_core=debug" } else { "inplace_core=warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

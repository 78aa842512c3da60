// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Mode};
use tracing::debug;

fn main() -> Result<()> {
    // Logs go to stderr; stdout may carry the package stream
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let mode = cli.mode()?;
    let config = cli.to_config(&mode)?;
    debug!("running {:?}", mode);

    match mode {
        Mode::Pack { .. } => commands::cmd_pack(&config, cli.non_interactive),
        Mode::Unpack { .. } => commands::cmd_unpack(&config),
        Mode::Verify { .. } => commands::cmd_verify(&config),
    }
}

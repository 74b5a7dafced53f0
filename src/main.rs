// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;
mod render;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use rook_ci::{exit_code, write_stderr, HeadlessRunner, EXIT_VALIDATION_ERROR};
use rook_core::Agent;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Some(Commands::ShowConfig) = &cli.command {
        let config = rook_config::load(cli.config.as_deref())?;
        println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
        return Ok(());
    }

    let mut config = rook_config::load(cli.config.as_deref())?;
    if let Some(model) = &cli.model {
        config.model.name = model.clone();
    }

    if let Some(Commands::Run { file }) = &cli.command {
        let headless = match rook_config::load_headless(file) {
            Ok(h) => h,
            Err(e) => {
                write_stderr(&format!("[rook:error] invalid run configuration: {e}"));
                std::process::exit(EXIT_VALIDATION_ERROR);
            }
        };
        let report = HeadlessRunner::new(headless).run(config).await?;
        std::process::exit(exit_code(&report));
    }

    // Interactive session.
    let workspace = cli
        .workspace
        .clone()
        .unwrap_or(std::env::current_dir()?);
    let provider = rook_model::from_config(&config.model)?;
    let agent = Agent::new(provider, config, workspace);
    render::run_interactive(Arc::new(agent), cli.prompt).await
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}

// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// A turn-driven coding agent: interactive on a terminal, headless in CI.
#[derive(Parser, Debug)]
#[command(name = "rook", version, about)]
pub struct Cli {
    /// One-shot prompt; omit to start an interactive session
    pub prompt: Option<String>,

    /// Path to an explicit config file (merged over the discovered layers)
    #[arg(long, short = 'c')]
    pub config: Option<PathBuf>,

    /// Model override, e.g. "gpt-4o-mini"
    #[arg(long, short = 'm')]
    pub model: Option<String>,

    /// Workspace directory (defaults to the current directory)
    #[arg(long, short = 'w')]
    pub workspace: Option<PathBuf>,

    /// Increase stderr log verbosity (-v, -vv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a headless task from a run configuration file.
    ///
    /// The run file defines the task, constraints, quality gates, git side
    /// effects, and artifact output.  Exit codes: 0 success, 1 agent/gate
    /// failure, 2 invalid configuration, 124 timeout.
    Run {
        /// Path to the headless run configuration (YAML)
        #[arg(long, short = 'f')]
        file: PathBuf,
    },

    /// Print the merged configuration and exit.
    ShowConfig,
}

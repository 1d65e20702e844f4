//! CLI argument definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// procpool - run processes inside a bounded pool
#[derive(Parser, Debug)]
#[command(name = "procpool")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Spawn every process in a manifest and stream their output
    Run {
        /// Path to the JSON manifest
        manifest: PathBuf,

        /// Override the manifest's concurrency cap
        #[arg(short = 'n', long)]
        max_concurrent: Option<usize>,

        /// Override the health-check interval (milliseconds)
        #[arg(long)]
        health_check_ms: Option<u64>,
    },

    /// Parse and validate a manifest without running it
    Validate {
        /// Path to the JSON manifest
        manifest: PathBuf,
    },
}

//! DrawPool CLI - Drive the draw pool with synthetic workloads
//!
//! # Commands
//!
//! - `drawpool simulate` - Run random frames through submit/optimize/flush and print the analysis
//! - `drawpool config` - Print the default configuration as TOML
//!
//! # Usage
//!
//! ```bash
//! # 120 frames of 2000 draws over 64 render states
//! drawpool simulate
//!
//! # Heavier scene, emergency batch bound, custom config
//! drawpool simulate --draws 6000 --states 400 --emergency --config drawpool.toml
//!
//! # Start a config file from the defaults
//! drawpool config > drawpool.toml
//! ```
//!
//! Set `RUST_LOG=drawpool=debug` to see per-frame pipeline logs.

mod config;
mod simulate;

use anyhow::Result;
use clap::{Parser, Subcommand};

/// DrawPool CLI - Synthetic workload driver for the draw pool
#[derive(Parser)]
#[command(name = "drawpool")]
#[command(about = "Synthetic workload driver for the draw pool")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run random frames through submit, optimize and flush
    Simulate(simulate::SimulateArgs),

    /// Print the default configuration as TOML
    Config,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Simulate(args) => simulate::execute(args),
        Commands::Config => config::execute(),
    }
}

//! Command-line surface: one binary, a handful of subcommands around running and
//! reporting on a rolling simulation.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about = "Rolling MPC simulator for tunnel pump scheduling", long_about = None)]
pub struct Cli {
    /// Set the logging level.
    #[arg(long, default_value = "info")]
    pub log_level: tracing::Level,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a rolling simulation against a deterministic seeded data source.
    Simulate {
        /// RNG seed for the synthetic inflow/price trace.
        #[arg(long, default_value_t = 1)]
        seed: u64,
        /// Number of control ticks to simulate.
        #[arg(long, default_value_t = 96)]
        steps: u64,
        /// Optional TOML config overriding driver defaults.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Print a baseline comparison report after the run.
        #[arg(long)]
        compare_baseline: bool,
    },
}

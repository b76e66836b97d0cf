//! Clap definitions for the `lis-reconciler` binary.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Command line of the `lis-reconciler` binary.
#[derive(Parser, Debug)]
#[command(name = "lis-reconciler")]
#[command(about = "Reconciles LIS result events into OMS tasks and applies auto-approval", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the YAML configuration file
    #[arg(short, long, global = true, env = "LISREC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the database and apply pending migrations
    Migrate,

    /// Process newline-delimited event envelopes from stdin
    Consume,

    /// Process a single event envelope from a JSON file
    Process {
        /// File holding one event envelope
        file: PathBuf,
    },

    /// Show the reconciled state of an order
    Inspect {
        /// OMS order id
        order_id: String,
    },

    /// Print the effective configuration
    Config,
}

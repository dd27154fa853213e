//! CLI command definitions.

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Audition - batch model auditions over provider batch APIs
#[derive(Parser, Debug)]
#[command(name = "audition")]
#[command(about = "Submit, poll, and reconcile batch model auditions", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to ./audition.toml over ~/.config/audition/audition.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit JSON logs
    #[arg(long, global = true)]
    pub json_logs: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Record a run's attempts and submit them as provider batches
    Submit {
        /// Condition slug to run
        #[arg(long)]
        condition: String,

        /// Condition version (latest when omitted)
        #[arg(long)]
        version: Option<i32>,

        /// TOML file of conditions to store before the run
        #[arg(long)]
        conditions: Option<PathBuf>,

        /// JSON Lines file of prompts
        #[arg(long)]
        prompts: PathBuf,

        /// Replicates per prompt
        #[arg(long, default_value = "1")]
        replicates: u32,

        /// Use three-segment custom ids for single-condition runs
        #[arg(long)]
        single_lane: bool,
    },

    /// Run the poll cycle over every pending attempt
    Poll {
        /// Keep polling at the configured interval until interrupted
        #[arg(long)]
        watch: bool,

        /// Also reconcile stuck runs after each cycle
        #[arg(long)]
        reconcile: bool,
    },

    /// Repair runs whose attempts point at the wrong batch
    Reconcile,

    /// Cancel a run locally and at the provider
    Cancel {
        /// Run id
        run_id: String,
    },

    /// Show a run and its attempt counts
    Status {
        /// Run id
        run_id: String,

        /// Output format
        #[arg(long, default_value = "human")]
        format: OutputFormat,
    },
}

/// Output format options
#[derive(ValueEnum, Clone, Copy, Debug)]
pub enum OutputFormat {
    /// Human-readable format
    Human,
    /// JSON format
    Json,
}

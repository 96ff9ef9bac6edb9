//! CLI argument definitions using clap derive

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// attachd - volume attach/detach reconciler
///
/// Reconciles the volumes that should be attached to each node against the
/// volumes that are attached, and drives attach/detach operations to close
/// the gap.
#[derive(Parser, Debug)]
#[command(name = "attachd")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "ATTACHD_CONFIG")]
    pub config: Option<PathBuf>,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the reconciler against a topology with the simulated backend
    Run(RunArgs),

    /// Show what a single reconcile pass would do, without running operations
    Plan(PlanArgs),

    /// Show or edit configuration
    Config(ConfigArgs),
}

/// Arguments for the run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Topology file seeding desired and actual state
    #[arg(short, long)]
    pub topology: PathBuf,

    /// Stop after this many seconds (runs until Ctrl-C if omitted)
    #[arg(short, long)]
    pub duration: Option<u64>,

    /// Override reconciler.loop_period_ms
    #[arg(long)]
    pub loop_period_ms: Option<u64>,

    /// Override reconciler.max_safe_to_detach_secs
    #[arg(long)]
    pub max_safe_to_detach_secs: Option<u64>,

    /// Output format for the final state
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the plan command
#[derive(Parser, Debug)]
pub struct PlanArgs {
    /// Topology file seeding desired and actual state
    #[arg(short, long)]
    pub topology: PathBuf,

    /// Output format
    #[arg(short, long, default_value = "table")]
    pub format: OutputFormat,
}

/// Arguments for the config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Subcommand for config
    #[command(subcommand)]
    pub action: Option<ConfigAction>,
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration
    Show,

    /// Show configuration file path
    Path,

    /// Initialize default configuration
    Init {
        /// Overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },

    /// Set a configuration value
    Set {
        /// Configuration key (e.g., reconciler.loop_period_ms)
        key: String,
        /// Value to set
        value: String,
    },
}

/// Output format for state listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable table
    Table,
    /// JSON output
    Json,
}

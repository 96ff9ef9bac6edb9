//! attachd - volume attach/detach reconciler
//!
//! CLI entry point that dispatches to subcommands.

use attachd::cli::{Cli, Commands};
use attachd::config::{Config, ConfigManager};
use attachd::error::{AttachdError, AttachdResult};
use clap::Parser;
use console::style;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", style("Error:").red().bold(), e);
            if let Some(hint) = e.hint() {
                eprintln!("{} {}", style("Hint:").yellow(), hint);
            }
            ExitCode::FAILURE
        }
    }
}

async fn run() -> AttachdResult<()> {
    let cli = Cli::parse();

    let config_manager = match cli.config {
        Some(ref path) => ConfigManager::with_path(path.clone()),
        None => ConfigManager::new(),
    };

    // An explicitly named config must exist before we reconcile with it
    if cli.config.is_some()
        && !config_manager.path().exists()
        && matches!(cli.command, Commands::Run(_) | Commands::Plan(_))
    {
        return Err(AttachdError::ConfigNotFound(
            config_manager.path().to_path_buf(),
        ));
    }

    // Config subcommands must still run against a file that fails validation
    let config = match cli.command {
        Commands::Config(_) => config_manager.load_unchecked().await.unwrap_or_default(),
        _ => config_manager.load().await?,
    };
    init_logging(cli.verbose, &config);
    debug!("Using config {}", config_manager.path().display());

    match cli.command {
        Commands::Run(args) => attachd::cli::commands::run(args, &config).await,
        Commands::Plan(args) => attachd::cli::commands::plan(args, &config).await,
        Commands::Config(args) => attachd::cli::commands::config(args, &config_manager).await,
    }
}

/// Initialize logging: 0 = warn, 1 = info, 2 = debug, 3+ = trace.
/// `RUST_LOG` takes precedence when set.
fn init_logging(verbose: u8, config: &Config) {
    let level = match verbose {
        0 => "attachd=warn",
        1 => "attachd=info",
        2 => "attachd=debug",
        _ => "attachd=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if config.general.log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }
}

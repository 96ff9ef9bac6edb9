//! Config command - show or edit configuration

use crate::cli::args::{ConfigAction, ConfigArgs};
use crate::config::{Config, ConfigManager};
use crate::error::{AttachdError, AttachdResult};
use console::style;
use std::str::FromStr;

/// Execute the config command
///
/// The file is read without validation so that `set` and `init --force`
/// can repair a file the other commands refuse to load.
pub async fn execute(args: ConfigArgs, manager: &ConfigManager) -> AttachdResult<()> {
    match args.action {
        None | Some(ConfigAction::Show) => show_config(manager).await?,
        Some(ConfigAction::Path) => show_path(manager),
        Some(ConfigAction::Init { force }) => init_config(manager, force).await?,
        Some(ConfigAction::Set { key, value }) => set_value(manager, &key, &value).await?,
    }

    Ok(())
}

async fn show_config(manager: &ConfigManager) -> AttachdResult<()> {
    let config = manager.load_unchecked().await?;
    println!("{}", toml::to_string_pretty(&config)?);

    if let Err(e) = config.validate(manager.path()) {
        eprintln!("{} {}", style("!").yellow(), e);
    }
    Ok(())
}

fn show_path(manager: &ConfigManager) {
    println!("{}", manager.path().display());
}

async fn init_config(manager: &ConfigManager, force: bool) -> AttachdResult<()> {
    let path = manager.path();

    if path.exists() && !force {
        println!(
            "{} Config already exists at {}",
            style("!").yellow(),
            path.display()
        );
        println!("  Use --force to overwrite");
        return Ok(());
    }

    manager.save(&Config::default()).await?;
    println!(
        "{} Configuration initialized at {}",
        style("✓").green(),
        path.display()
    );

    Ok(())
}

async fn set_value(manager: &ConfigManager, key: &str, value: &str) -> AttachdResult<()> {
    let mut config = manager.load_unchecked().await?;
    apply_value(&mut config, key, value)?;
    config.validate(manager.path())?;

    manager.save(&config).await?;
    println!("{} Set {} = {}", style("✓").green(), key, value);

    Ok(())
}

/// Set a dot-separated key on the configuration
fn apply_value(config: &mut Config, key: &str, value: &str) -> AttachdResult<()> {
    let parts: Vec<&str> = key.split('.').collect();

    match parts.as_slice() {
        ["general", "log_format"] => config.general.log_format = value.to_string(),
        ["general", "audit_log"] => config.general.audit_log = parse_bool(value)?,
        ["general", "audit_path"] => config.general.audit_path = Some(value.into()),

        ["reconciler", "loop_period_ms"] => config.reconciler.loop_period_ms = parse_number(value)?,
        ["reconciler", "max_safe_to_detach_secs"] => {
            config.reconciler.max_safe_to_detach_secs = parse_number(value)?
        }

        ["executor", "max_concurrent_operations"] => {
            config.executor.max_concurrent_operations = parse_number(value)?
        }
        ["executor", "backoff_initial_ms"] => config.executor.backoff_initial_ms = parse_number(value)?,
        ["executor", "backoff_max_secs"] => config.executor.backoff_max_secs = parse_number(value)?,

        ["simulation", "attach_latency_ms"] => {
            config.simulation.attach_latency_ms = parse_number(value)?
        }
        ["simulation", "detach_latency_ms"] => {
            config.simulation.detach_latency_ms = parse_number(value)?
        }

        _ => {
            return Err(AttachdError::User(format!(
                "Unknown config key: {}. Valid keys: {}",
                key,
                VALID_KEYS.join(", ")
            )))
        }
    }
    Ok(())
}

const VALID_KEYS: &[&str] = &[
    "general.log_format",
    "general.audit_log",
    "general.audit_path",
    "reconciler.loop_period_ms",
    "reconciler.max_safe_to_detach_secs",
    "executor.max_concurrent_operations",
    "executor.backoff_initial_ms",
    "executor.backoff_max_secs",
    "simulation.attach_latency_ms",
    "simulation.detach_latency_ms",
];

fn parse_bool(value: &str) -> AttachdResult<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(AttachdError::User(format!(
            "Invalid boolean value: {}. Use true/false",
            value
        ))),
    }
}

fn parse_number<T: FromStr>(value: &str) -> AttachdResult<T> {
    value
        .parse()
        .map_err(|_| AttachdError::User(format!("Invalid number: {}", value)))
}

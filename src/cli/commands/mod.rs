//! CLI command implementations

pub mod config;
pub mod plan;
pub mod run;

pub use config::execute as config;
pub use plan::execute as plan;
pub use run::execute as run;

use crate::cache::AttachedVolume;
use crate::cli::args::OutputFormat;
use crate::error::AttachdResult;
use console::style;

/// Print attachments as a table or JSON
pub(crate) fn print_attachments(
    attachments: &mut [AttachedVolume],
    format: OutputFormat,
) -> AttachdResult<()> {
    attachments.sort_by(|a, b| a.key().cmp(&b.key()));

    match format {
        OutputFormat::Json => {
            let rows: Vec<serde_json::Value> = attachments
                .iter()
                .map(|a| {
                    serde_json::json!({
                        "volume": a.volume_name,
                        "node": a.node_name,
                        "driver": a.volume_spec.driver,
                        "safe_to_detach": a.safe_to_detach,
                        "detach_pending": a.desire_to_detach_since.is_some(),
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }
        OutputFormat::Table => {
            if attachments.is_empty() {
                println!("No attached volumes");
                return Ok(());
            }

            println!(
                "{:<24} {:<16} {:<12} {:<10}",
                style("VOLUME").bold(),
                style("NODE").bold(),
                style("SAFE").bold(),
                style("DETACH").bold()
            );
            println!("{}", "-".repeat(64));

            for a in attachments.iter() {
                let safe = if a.safe_to_detach {
                    style("yes").green()
                } else {
                    style("no").yellow()
                };
                let pending = if a.desire_to_detach_since.is_some() {
                    style("pending").red()
                } else {
                    style("-").dim()
                };
                println!(
                    "{:<24} {:<16} {:<12} {:<10}",
                    a.volume_name, a.node_name, safe, pending
                );
            }

            println!();
            println!("{} attachment(s)", attachments.len());
        }
    }
    Ok(())
}

//! Plan command - dry-run a single reconcile pass

use crate::cache::{InMemoryActualState, InMemoryDesiredState};
use crate::cli::args::{OutputFormat, PlanArgs};
use crate::config::Config;
use crate::error::AttachdResult;
use crate::operation::{RecordingExecutor, Submission};
use crate::reconciler::{ReconcileSummary, Reconciler};
use crate::topology::Topology;
use console::style;
use std::sync::Arc;

/// Execute the plan command
pub async fn execute(args: PlanArgs, config: &Config) -> AttachdResult<()> {
    let topology = Topology::load(&args.topology).await?;
    let (summary, mut submissions) = plan(&topology, config)?;
    submissions.sort_by_key(|s| match s {
        Submission::Attach(key) | Submission::Detach(key, _) => key.clone(),
    });

    match args.format {
        OutputFormat::Json => print_json(&summary, &submissions)?,
        OutputFormat::Table => print_table(&summary, &submissions),
    }
    Ok(())
}

/// Reconcile the topology once against a recording executor
pub fn plan(
    topology: &Topology,
    config: &Config,
) -> AttachdResult<(ReconcileSummary, Vec<Submission>)> {
    let desired = Arc::new(InMemoryDesiredState::new());
    let actual = Arc::new(InMemoryActualState::new());
    topology.apply(&desired, &actual)?;

    let executor = Arc::new(RecordingExecutor::new());
    let reconciler = Reconciler::new(
        config.reconciler.loop_period(),
        config.reconciler.max_safe_to_detach(),
        desired,
        actual,
        executor.clone(),
    );

    let summary = reconciler.reconcile();
    Ok((summary, executor.take()))
}

fn print_table(summary: &ReconcileSummary, submissions: &[Submission]) {
    if submissions.is_empty() {
        println!("Nothing to do");
    } else {
        println!(
            "{:<16} {:<24} {:<16}",
            style("ACTION").bold(),
            style("VOLUME").bold(),
            style("NODE").bold()
        );
        println!("{}", "-".repeat(56));

        for submission in submissions {
            let (action, key) = match submission {
                Submission::Attach(key) => (style("attach").green(), key),
                Submission::Detach(key, reason) if reason.is_forced() => {
                    (style("detach (forced)").red(), key)
                }
                Submission::Detach(key, _) => (style("detach").yellow(), key),
            };
            println!("{:<16} {:<24} {:<16}", action, key.volume, key.node);
        }
        println!();
    }

    println!(
        "{} attach, {} detach, {} forced detach, {} waiting for grace period, {} up to date",
        summary.attach_requested,
        summary.detach_requested,
        summary.forced_detach_requested,
        summary.detach_deferred,
        summary.touched
    );
}

fn print_json(summary: &ReconcileSummary, submissions: &[Submission]) -> AttachdResult<()> {
    let actions: Vec<serde_json::Value> = submissions
        .iter()
        .map(|s| match s {
            Submission::Attach(key) => serde_json::json!({
                "action": "attach",
                "volume": key.volume,
                "node": key.node,
            }),
            Submission::Detach(key, reason) => serde_json::json!({
                "action": "detach",
                "reason": reason,
                "volume": key.volume,
                "node": key.node,
            }),
        })
        .collect();

    let output = serde_json::json!({
        "actions": actions,
        "summary": summary,
    });
    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}

//! Run command - reconcile a topology with the simulated backend

use crate::cache::ActualStateOfWorld;
use crate::cli::args::RunArgs;
use crate::cli::commands::print_attachments;
use crate::config::Config;
use crate::controller::{create_simulated_backend, AttachDetachController};
use crate::error::AttachdResult;
use crate::topology::Topology;
use console::style;
use std::path::Path;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Execute the run command
pub async fn execute(args: RunArgs, config: &Config) -> AttachdResult<()> {
    let mut config = config.clone();
    if let Some(ms) = args.loop_period_ms {
        config.reconciler.loop_period_ms = ms;
    }
    if let Some(secs) = args.max_safe_to_detach_secs {
        config.reconciler.max_safe_to_detach_secs = secs;
    }
    config.validate(Path::new("command line"))?;

    let topology = Topology::load(&args.topology).await?;
    let backend = create_simulated_backend(&config);
    let controller = AttachDetachController::new(&config, backend)?;
    topology.apply(controller.desired(), controller.actual())?;

    println!(
        "Reconciling {} ({} desired, {} attached)...",
        style(args.topology.display()).cyan(),
        controller.desired().len(),
        controller.actual().len()
    );

    let stop = CancellationToken::new();
    let stopper = tokio::spawn(stop_after(stop.clone(), args.duration));

    controller.run(stop).await;
    stopper.abort();

    let mut attachments = controller.actual().attached_volumes();
    print_attachments(&mut attachments, args.format)?;

    Ok(())
}

/// Cancel `stop` on Ctrl-C or once `duration_secs` have passed
async fn stop_after(stop: CancellationToken, duration_secs: Option<u64>) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Could not listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    match duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = ctrl_c => info!("Interrupted"),
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            }
        }
        None => {
            ctrl_c.await;
            info!("Interrupted");
        }
    }
    stop.cancel();
}

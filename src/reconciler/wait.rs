//! Periodic execution until cancelled

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Run `f` now, then again `period` after each run returns, until `stop`
/// is cancelled
///
/// Runs never overlap. Cancellation is observed between runs, so a run that
/// has started always completes.
pub async fn until<F>(mut f: F, period: Duration, stop: &CancellationToken)
where
    F: FnMut(),
{
    loop {
        if stop.is_cancelled() {
            return;
        }

        f();

        tokio::select! {
            biased;
            _ = stop.cancelled() => return,
            _ = tokio::time::sleep(period) => {}
        }
    }
}

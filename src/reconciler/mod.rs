//! Attach/detach reconciliation loop
//!
//! Each pass compares the desired state of world with the actual state of
//! world and submits operations to close the gap:
//!
//! | Desired | Actual | Safe to detach | Action |
//! |---------|--------|----------------|--------|
//! | yes | no | - | attach |
//! | yes | yes | - | touch (clears detach timer) |
//! | no | yes | yes | detach |
//! | no | yes | no | start/continue detach timer, forced detach once it reaches the limit |
//!
//! The reconciler keeps no state of its own. Operations are resubmitted on
//! every pass until the caches show them complete; the executor drops
//! duplicates.

pub mod wait;

use crate::cache::{ActualStateOfWorld, DesiredStateOfWorld};
use crate::operation::{DetachReason, OperationExecutor};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// What a single reconcile pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    /// Desired attachments already in place
    pub touched: usize,
    /// Attach operations submitted
    pub attach_requested: usize,
    /// Detach operations submitted for volumes safe to detach
    pub detach_requested: usize,
    /// Detach operations submitted after the grace period ran out
    pub forced_detach_requested: usize,
    /// Unwanted attachments still inside their grace period
    pub detach_deferred: usize,
    /// Cache mutator failures
    pub errors: usize,
}

impl ReconcileSummary {
    /// True when the pass submitted nothing and deferred nothing
    pub fn is_idle(&self) -> bool {
        self.attach_requested == 0
            && self.detach_requested == 0
            && self.forced_detach_requested == 0
            && self.detach_deferred == 0
            && self.errors == 0
    }
}

/// Periodic reconciler driving attach/detach operations
pub struct Reconciler {
    loop_period: Duration,
    max_safe_to_detach_duration: Duration,
    desired: Arc<dyn DesiredStateOfWorld>,
    actual: Arc<dyn ActualStateOfWorld>,
    executor: Arc<dyn OperationExecutor>,
}

impl Reconciler {
    /// Create a reconciler that pauses `loop_period` between passes
    ///
    /// An attachment that is not desired but also not safe to detach is
    /// detached anyway once it has been unwanted for
    /// `max_safe_to_detach_duration`, on the assumption that its node is
    /// unreachable. If the volume becomes desired again first, the timer is
    /// cleared and no detach happens.
    pub fn new(
        loop_period: Duration,
        max_safe_to_detach_duration: Duration,
        desired: Arc<dyn DesiredStateOfWorld>,
        actual: Arc<dyn ActualStateOfWorld>,
        executor: Arc<dyn OperationExecutor>,
    ) -> Self {
        Self {
            loop_period,
            max_safe_to_detach_duration,
            desired,
            actual,
            executor,
        }
    }

    /// Reconcile now and then every loop period until `stop` is cancelled
    ///
    /// Operations already handed to the executor keep running after stop.
    pub async fn run(&self, stop: CancellationToken) {
        info!(
            "Reconciler started (loop period {:?}, max safe-to-detach {:?})",
            self.loop_period, self.max_safe_to_detach_duration
        );

        wait::until(
            || {
                let summary = self.reconcile();
                if !summary.is_idle() {
                    debug!("Reconcile pass: {:?}", summary);
                }
            },
            self.loop_period,
            &stop,
        )
        .await;

        info!("Reconciler stopped");
    }

    /// Run a single reconcile pass
    pub fn reconcile(&self) -> ReconcileSummary {
        let mut summary = ReconcileSummary::default();

        // Ensure volumes that should be attached are attached
        for to_attach in self.desired.volumes_to_attach() {
            let (volume, node) = (&to_attach.volume_name, &to_attach.node_name);

            if self.actual.volume_node_exists(volume, node) {
                trace!("Volume {} is attached to node {}, touching", volume, node);
                match self.actual.touch(volume, node) {
                    Ok(()) => summary.touched += 1,
                    Err(e) => {
                        warn!("Failed to touch volume {} on node {}: {}", volume, node, e);
                        summary.errors += 1;
                    }
                }
            } else {
                info!("Triggering attach of volume {} to node {}", volume, node);
                self.executor.attach_volume(&to_attach);
                summary.attach_requested += 1;
            }
        }

        // Ensure volumes that should be detached are detached
        for attached in self.actual.attached_volumes() {
            let (volume, node) = (&attached.volume_name, &attached.node_name);

            if self.desired.volume_exists(volume, node) {
                continue;
            }

            if attached.safe_to_detach {
                info!("Triggering detach of volume {} from node {}", volume, node);
                self.executor.detach_volume(&attached, DetachReason::Safe);
                summary.detach_requested += 1;
                continue;
            }

            let elapsed = match self.actual.mark_desire_to_detach(volume, node) {
                Ok(elapsed) => elapsed,
                Err(e) => {
                    warn!(
                        "Failed to mark volume {} on node {} for detach: {}",
                        volume, node, e
                    );
                    summary.errors += 1;
                    continue;
                }
            };

            if elapsed >= self.max_safe_to_detach_duration {
                info!(
                    "Triggering detach of volume {} from node {}: not safe to detach, but waited {:?}",
                    volume, node, elapsed
                );
                self.executor
                    .detach_volume(&attached, DetachReason::GraceExpired);
                summary.forced_detach_requested += 1;
            } else {
                trace!(
                    "Volume {} on node {} not safe to detach, waited {:?} of {:?}",
                    volume,
                    node,
                    elapsed,
                    self.max_safe_to_detach_duration
                );
                summary.detach_deferred += 1;
            }
        }

        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{
        AttachedVolume, EdgeKey, InMemoryActualState, InMemoryDesiredState, NodeName, PodName,
        VolumeName, VolumeSpec,
    };
    use crate::error::{AttachdError, AttachdResult};
    use crate::operation::{RecordingExecutor, Submission};

    struct Harness {
        desired: Arc<InMemoryDesiredState>,
        actual: Arc<InMemoryActualState>,
        executor: Arc<RecordingExecutor>,
        reconciler: Reconciler,
    }

    fn harness(max_safe_to_detach: Duration) -> Harness {
        let desired = Arc::new(InMemoryDesiredState::new());
        let actual = Arc::new(InMemoryActualState::new());
        let executor = Arc::new(RecordingExecutor::new());
        let reconciler = Reconciler::new(
            Duration::from_secs(1),
            max_safe_to_detach,
            desired.clone(),
            actual.clone(),
            executor.clone(),
        );
        Harness {
            desired,
            actual,
            executor,
            reconciler,
        }
    }

    fn key(volume: &str, node: &str) -> EdgeKey {
        EdgeKey::new(VolumeName::from(volume), NodeName::from(node))
    }

    fn desire(h: &Harness, pod: &str, volume: &str, node: &str) {
        h.desired.add_node(NodeName::from(node));
        h.desired
            .add_pod(PodName::from(pod), VolumeSpec::new(volume), &NodeName::from(node))
            .unwrap();
    }

    fn attach(h: &Harness, volume: &str, node: &str, safe: bool) {
        let node = NodeName::from(node);
        h.actual.add_volume_node(&VolumeSpec::new(volume), &node).unwrap();
        h.actual
            .set_safe_to_detach(&VolumeName::from(volume), &node, safe)
            .unwrap();
    }

    #[test]
    fn attaches_missing_volume_every_pass() {
        let h = harness(Duration::from_secs(5));
        desire(&h, "pod-1", "vol-a", "node-1");

        for _ in 0..3 {
            let summary = h.reconciler.reconcile();
            assert_eq!(summary.attach_requested, 1);
        }
        assert_eq!(h.executor.attaches(), vec![key("vol-a", "node-1"); 3]);

        attach(&h, "vol-a", "node-1", false);
        h.executor.take();
        let summary = h.reconciler.reconcile();
        assert_eq!(summary.attach_requested, 0);
        assert!(h.executor.submissions().is_empty());
    }

    #[test]
    fn steady_state_touches_each_attachment_once() {
        let h = harness(Duration::from_secs(5));
        desire(&h, "pod-1", "vol-a", "node-1");
        desire(&h, "pod-2", "vol-b", "node-2");
        attach(&h, "vol-a", "node-1", false);
        attach(&h, "vol-b", "node-2", true);

        for _ in 0..3 {
            let summary = h.reconciler.reconcile();
            assert_eq!(summary.touched, 2);
            assert!(summary.is_idle());
        }
        assert!(h.executor.submissions().is_empty());
    }

    #[test]
    fn safe_volume_detached_on_first_pass() {
        let h = harness(Duration::from_secs(5));
        attach(&h, "vol-a", "node-1", true);

        let summary = h.reconciler.reconcile();

        assert_eq!(summary.detach_requested, 1);
        assert_eq!(
            h.executor.detaches(),
            vec![(key("vol-a", "node-1"), DetachReason::Safe)]
        );
        // No grace timer for safe detaches
        let entry = h
            .actual
            .get(&VolumeName::from("vol-a"), &NodeName::from("node-1"))
            .unwrap();
        assert!(entry.desire_to_detach_since.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unsafe_volume_force_detached_after_grace_period() {
        let h = harness(Duration::from_secs(5));
        attach(&h, "vol-a", "node-1", false);

        for _ in 0..5 {
            let summary = h.reconciler.reconcile();
            assert_eq!(summary.detach_deferred, 1);
            assert!(h.executor.detaches().is_empty());
            tokio::time::advance(Duration::from_secs(1)).await;
        }

        // t = 5s
        let summary = h.reconciler.reconcile();
        assert_eq!(summary.forced_detach_requested, 1);
        assert_eq!(
            h.executor.detaches(),
            vec![(key("vol-a", "node-1"), DetachReason::GraceExpired)]
        );

        // Resubmitted every pass until the attachment disappears
        tokio::time::advance(Duration::from_secs(1)).await;
        h.reconciler.reconcile();
        assert_eq!(h.executor.detaches().len(), 2);

        h.actual
            .delete_volume_node(&VolumeName::from("vol-a"), &NodeName::from("node-1"));
        h.reconciler.reconcile();
        assert_eq!(h.executor.detaches().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn redesired_volume_is_never_detached() {
        let h = harness(Duration::from_secs(5));
        attach(&h, "vol-a", "node-1", false);

        for _ in 0..4 {
            h.reconciler.reconcile();
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        let entry = h
            .actual
            .get(&VolumeName::from("vol-a"), &NodeName::from("node-1"))
            .unwrap();
        assert!(entry.desire_to_detach_since.is_some());

        // Wanted again at t = 4s
        desire(&h, "pod-1", "vol-a", "node-1");
        let summary = h.reconciler.reconcile();
        assert_eq!(summary.touched, 1);

        for _ in 0..10 {
            tokio::time::advance(Duration::from_secs(1)).await;
            h.reconciler.reconcile();
        }
        assert!(h.executor.detaches().is_empty());
        assert!(h.executor.attaches().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn grace_period_restarts_after_redesire() {
        let h = harness(Duration::from_secs(5));
        attach(&h, "vol-a", "node-1", false);
        h.reconciler.reconcile();
        tokio::time::advance(Duration::from_secs(4)).await;

        desire(&h, "pod-1", "vol-a", "node-1");
        h.reconciler.reconcile();
        h.desired.delete_pod(
            &PodName::from("pod-1"),
            &VolumeName::from("vol-a"),
            &NodeName::from("node-1"),
        );

        // A fresh 5s window, not the 1s left over from before
        h.reconciler.reconcile();
        tokio::time::advance(Duration::from_secs(4)).await;
        h.reconciler.reconcile();
        assert!(h.executor.detaches().is_empty());

        tokio::time::advance(Duration::from_secs(1)).await;
        h.reconciler.reconcile();
        assert_eq!(h.executor.detaches().len(), 1);
    }

    #[test]
    fn zero_grace_period_forces_immediately() {
        let h = harness(Duration::ZERO);
        attach(&h, "vol-a", "node-1", false);

        let summary = h.reconciler.reconcile();
        assert_eq!(summary.forced_detach_requested, 1);
    }

    /// Actual state whose mutators always fail
    struct FailingActual(InMemoryActualState);

    impl ActualStateOfWorld for FailingActual {
        fn attached_volumes(&self) -> Vec<AttachedVolume> {
            self.0.attached_volumes()
        }

        fn volume_node_exists(&self, volume: &VolumeName, node: &NodeName) -> bool {
            self.0.volume_node_exists(volume, node)
        }

        fn touch(&self, _volume: &VolumeName, _node: &NodeName) -> AttachdResult<()> {
            Err(AttachdError::Internal("touch failed".into()))
        }

        fn mark_desire_to_detach(
            &self,
            _volume: &VolumeName,
            _node: &NodeName,
        ) -> AttachdResult<Duration> {
            Err(AttachdError::Internal("mark failed".into()))
        }

        fn add_volume_node(
            &self,
            spec: &VolumeSpec,
            node: &NodeName,
        ) -> AttachdResult<VolumeName> {
            self.0.add_volume_node(spec, node)
        }

        fn delete_volume_node(&self, volume: &VolumeName, node: &NodeName) {
            self.0.delete_volume_node(volume, node)
        }

        fn set_safe_to_detach(
            &self,
            volume: &VolumeName,
            node: &NodeName,
            safe: bool,
        ) -> AttachdResult<()> {
            self.0.set_safe_to_detach(volume, node, safe)
        }
    }

    #[test]
    fn mutator_failures_do_not_stop_the_pass() {
        let desired = Arc::new(InMemoryDesiredState::new());
        let actual = Arc::new(FailingActual(InMemoryActualState::new()));
        let executor = Arc::new(RecordingExecutor::new());

        let node = NodeName::from("node-1");
        desired.add_node(node.clone());
        for (pod, volume) in [("pod-1", "vol-a"), ("pod-2", "vol-b")] {
            desired
                .add_pod(PodName::from(pod), VolumeSpec::new(volume), &node)
                .unwrap();
        }
        actual.add_volume_node(&VolumeSpec::new("vol-a"), &node).unwrap();
        actual.add_volume_node(&VolumeSpec::new("vol-c"), &node).unwrap();
        actual.add_volume_node(&VolumeSpec::new("vol-d"), &node).unwrap();
        actual
            .set_safe_to_detach(&VolumeName::from("vol-d"), &node, true)
            .unwrap();

        let reconciler = Reconciler::new(
            Duration::from_secs(1),
            Duration::ZERO,
            desired,
            actual,
            executor.clone(),
        );
        let summary = reconciler.reconcile();

        // vol-a touch fails, vol-c mark fails (so no forced detach even with
        // a zero grace period), vol-b attaches, vol-d detaches
        assert_eq!(summary.errors, 2);
        assert_eq!(summary.attach_requested, 1);
        assert_eq!(summary.detach_requested, 1);
        assert_eq!(summary.forced_detach_requested, 0);

        let mut submissions = executor.submissions();
        submissions.sort_by_key(|s| format!("{:?}", s));
        assert_eq!(
            submissions,
            vec![
                Submission::Attach(key("vol-b", "node-1")),
                Submission::Detach(key("vol-d", "node-1"), DetachReason::Safe),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_reconciles_every_period_until_stopped() {
        let h = harness(Duration::from_secs(5));
        desire(&h, "pod-1", "vol-a", "node-1");

        let reconciler = Arc::new(h.reconciler);
        let stop = CancellationToken::new();
        let task = {
            let reconciler = reconciler.clone();
            let stop = stop.clone();
            tokio::spawn(async move { reconciler.run(stop).await })
        };

        tokio::time::sleep(Duration::from_millis(3500)).await;
        stop.cancel();
        task.await.unwrap();

        // Passes at t = 0s, 1s, 2s, 3s
        assert_eq!(h.executor.attaches().len(), 4);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(h.executor.attaches().len(), 4);
    }
}

//! Attach/detach controller assembly
//!
//! Wires the in-memory caches, the operation executor and the reconciler
//! together from configuration.

use crate::audit::AuditLog;
use crate::cache::{InMemoryActualState, InMemoryDesiredState};
use crate::config::Config;
use crate::error::AttachdResult;
use crate::operation::{AttacherDetacher, SimulatedBackend, VolumeBackend};
use crate::reconciler::Reconciler;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Create the simulated backend described by the `[simulation]` section
pub fn create_simulated_backend(config: &Config) -> Arc<SimulatedBackend> {
    Arc::new(SimulatedBackend::new(
        Duration::from_millis(config.simulation.attach_latency_ms),
        Duration::from_millis(config.simulation.detach_latency_ms),
    ))
}

/// Caches, executor and reconciler sharing one configuration
pub struct AttachDetachController {
    desired: Arc<InMemoryDesiredState>,
    actual: Arc<InMemoryActualState>,
    executor: Arc<AttacherDetacher>,
    reconciler: Reconciler,
}

impl AttachDetachController {
    /// Build a controller around `backend`
    ///
    /// Must be called from within a tokio runtime; the executor spawns its
    /// operations there.
    pub fn new(config: &Config, backend: Arc<dyn VolumeBackend>) -> AttachdResult<Self> {
        Self::with_audit(config, backend, Arc::new(AuditLog::new(config)))
    }

    /// Build a controller with an explicit audit logger
    pub fn with_audit(
        config: &Config,
        backend: Arc<dyn VolumeBackend>,
        audit: Arc<AuditLog>,
    ) -> AttachdResult<Self> {
        let desired = Arc::new(InMemoryDesiredState::new());
        let actual = Arc::new(InMemoryActualState::new());

        let executor = Arc::new(AttacherDetacher::new(
            backend,
            actual.clone(),
            config.executor.max_concurrent_operations,
            config.executor.backoff(),
            audit,
        )?);

        let reconciler = Reconciler::new(
            config.reconciler.loop_period(),
            config.reconciler.max_safe_to_detach(),
            desired.clone(),
            actual.clone(),
            executor.clone(),
        );

        Ok(Self {
            desired,
            actual,
            executor,
            reconciler,
        })
    }

    pub fn desired(&self) -> &Arc<InMemoryDesiredState> {
        &self.desired
    }

    pub fn actual(&self) -> &Arc<InMemoryActualState> {
        &self.actual
    }

    pub fn executor(&self) -> &Arc<AttacherDetacher> {
        &self.executor
    }

    /// Reconcile until `stop` is cancelled
    pub async fn run(&self, stop: CancellationToken) {
        self.reconciler.run(stop).await;
        let in_flight = self.executor.in_flight();
        if in_flight > 0 {
            info!("{} operation(s) still in flight at shutdown", in_flight);
        }
    }
}

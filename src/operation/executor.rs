//! Asynchronous attach/detach executor
//!
//! Each accepted submission becomes a tokio task that calls the storage
//! backend and writes the outcome into the actual state cache. A dedupe
//! table keyed by edge keeps at most one operation in flight per
//! `(volume, node)`, and failed edges back off exponentially before the
//! next submission is accepted. A failure record is forgotten once its edge
//! has gone a full backoff cap past its retry time without a new attempt.

use super::{DetachReason, ExponentialBackoff, OperationExecutor, VolumeBackend};
use crate::audit::AuditLog;
use crate::cache::{ActualStateOfWorld, AttachedVolume, EdgeKey, VolumeSpec, VolumeToAttach};
use crate::error::{AttachdError, AttachdResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn, Instrument};
use uuid::Uuid;

#[derive(Debug, Clone)]
enum Operation {
    Attach(VolumeSpec),
    Detach(DetachReason),
}

impl Operation {
    fn kind(&self) -> &'static str {
        match self {
            Self::Attach(_) => "attach",
            Self::Detach(_) => "detach",
        }
    }
}

#[derive(Debug)]
struct EdgeFailures {
    count: u32,
    retry_after: Instant,
}

impl EdgeFailures {
    fn expired(&self, now: Instant, max: Duration) -> bool {
        now >= self.retry_after + max
    }
}

#[derive(Debug, Default)]
struct Tables {
    /// Edges with an operation in flight, mapped to the operation id
    pending: Mutex<HashMap<EdgeKey, Uuid>>,
    /// Consecutive failures per edge
    failures: Mutex<HashMap<EdgeKey, EdgeFailures>>,
}

/// Releases an edge's dedupe entry when its task ends, including on panic
struct PendingGuard {
    tables: Arc<Tables>,
    key: EdgeKey,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.tables.pending.lock().remove(&self.key);
    }
}

/// Executor running operations against a [`VolumeBackend`]
pub struct AttacherDetacher {
    backend: Arc<dyn VolumeBackend>,
    actual: Arc<dyn ActualStateOfWorld>,
    audit: Arc<AuditLog>,
    backoff: ExponentialBackoff,
    permits: Arc<Semaphore>,
    tables: Arc<Tables>,
    runtime: Handle,
}

impl AttacherDetacher {
    /// Create an executor bound to the current tokio runtime
    ///
    /// At most `max_concurrent` backend calls run at once; further accepted
    /// operations queue for a permit without blocking the submitter.
    pub fn new(
        backend: Arc<dyn VolumeBackend>,
        actual: Arc<dyn ActualStateOfWorld>,
        max_concurrent: usize,
        backoff: ExponentialBackoff,
        audit: Arc<AuditLog>,
    ) -> AttachdResult<Self> {
        let runtime = Handle::try_current().map_err(|e| AttachdError::NoRuntime(e.to_string()))?;
        debug!(
            "Executor using {} backend, {} concurrent operations",
            backend.backend_name(),
            max_concurrent
        );

        Ok(Self {
            backend,
            actual,
            audit,
            backoff,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            tables: Arc::new(Tables::default()),
            runtime,
        })
    }

    /// Number of operations currently in flight
    pub fn in_flight(&self) -> usize {
        self.tables.pending.lock().len()
    }

    /// Whether an operation for the edge is in flight
    pub fn is_pending(&self, key: &EdgeKey) -> bool {
        self.tables.pending.lock().contains_key(key)
    }

    /// Consecutive failures recorded for the edge
    pub fn failure_count(&self, key: &EdgeKey) -> u32 {
        let now = Instant::now();
        self.tables
            .failures
            .lock()
            .get(key)
            .filter(|f| !f.expired(now, self.backoff.max))
            .map(|f| f.count)
            .unwrap_or(0)
    }

    /// Number of edges with a live failure record
    pub fn tracked_failures(&self) -> usize {
        let mut failures = self.tables.failures.lock();
        self.prune_failures(&mut failures);
        failures.len()
    }

    fn prune_failures(&self, failures: &mut HashMap<EdgeKey, EdgeFailures>) {
        let now = Instant::now();
        let before = failures.len();
        failures.retain(|_, f| !f.expired(now, self.backoff.max));
        let dropped = before - failures.len();
        if dropped > 0 {
            trace!("Forgot {} stale failure record(s)", dropped);
        }
    }

    /// Reserve the edge for a new operation
    ///
    /// Returns `None` while another operation for the edge is in flight or
    /// the edge is still backing off from a failure.
    fn reserve(&self, key: &EdgeKey, kind: &str) -> Option<Uuid> {
        {
            let mut failures = self.tables.failures.lock();
            self.prune_failures(&mut failures);
            if let Some(entry) = failures.get(key) {
                if Instant::now() < entry.retry_after {
                    trace!("Skipping {} of {}: backing off", kind, key);
                    return None;
                }
            }
        }

        let mut pending = self.tables.pending.lock();
        if let Some(existing) = pending.get(key) {
            trace!("Skipping {} of {}: operation {} in flight", kind, key, existing);
            return None;
        }
        let id = Uuid::new_v4();
        pending.insert(key.clone(), id);
        Some(id)
    }

    fn dispatch(&self, key: EdgeKey, operation: Operation) {
        let Some(id) = self.reserve(&key, operation.kind()) else {
            return;
        };
        debug!("Dispatching {} {} for {}", operation.kind(), id, key);

        let guard = PendingGuard {
            tables: Arc::clone(&self.tables),
            key: key.clone(),
        };
        let backend = Arc::clone(&self.backend);
        let actual = Arc::clone(&self.actual);
        let audit = Arc::clone(&self.audit);
        let permits = Arc::clone(&self.permits);
        let tables = Arc::clone(&self.tables);
        let backoff = self.backoff;
        let span = tracing::info_span!("operation", %id, kind = operation.kind(), edge = %key);

        self.runtime.spawn(
            async move {
                let _guard = guard;
                let Ok(_permit) = permits.acquire_owned().await else {
                    warn!("Executor shut down before {} could run", id);
                    return;
                };

                let result = match &operation {
                    Operation::Attach(spec) => backend.attach(spec, &key.node).await,
                    Operation::Detach(_) => backend.detach(&key.volume, &key.node).await,
                };

                let mut data = serde_json::json!({
                    "operation_id": id.to_string(),
                    "volume": key.volume,
                    "node": key.node,
                });
                if let Operation::Detach(reason) = &operation {
                    data["reason"] = serde_json::json!(reason);
                }

                match result {
                    Ok(()) => {
                        match &operation {
                            Operation::Attach(spec) => {
                                if let Err(e) = actual.add_volume_node(spec, &key.node) {
                                    warn!("Attached {} but could not record it: {}", key, e);
                                }
                            }
                            Operation::Detach(_) => actual.delete_volume_node(&key.volume, &key.node),
                        }
                        tables.failures.lock().remove(&key);
                        info!("{} of {} succeeded", operation.kind(), key);
                        data["outcome"] = "succeeded".into();
                    }
                    Err(e) => {
                        let (count, delay) = {
                            let mut failures = tables.failures.lock();
                            let entry = failures.entry(key.clone()).or_insert(EdgeFailures {
                                count: 0,
                                retry_after: Instant::now(),
                            });
                            entry.count += 1;
                            // Errors other than a failed backend call wait out the full cap
                            let delay = if e.is_retryable() {
                                backoff.delay(entry.count)
                            } else {
                                backoff.max
                            };
                            entry.retry_after = Instant::now() + delay;
                            (entry.count, delay)
                        };
                        warn!(
                            "{} of {} failed (attempt {}, retry in {:?}): {}",
                            operation.kind(),
                            key,
                            count,
                            delay,
                            e
                        );
                        data["outcome"] = "failed".into();
                        data["error"] = e.to_string().into();
                    }
                }

                audit
                    .log(&format!("volume.{}", operation.kind()), &data)
                    .await;
            }
            .instrument(span),
        );
    }
}

impl OperationExecutor for AttacherDetacher {
    fn attach_volume(&self, volume: &VolumeToAttach) {
        self.dispatch(volume.key(), Operation::Attach(volume.volume_spec.clone()));
    }

    fn detach_volume(&self, volume: &AttachedVolume, reason: DetachReason) {
        self.dispatch(volume.key(), Operation::Detach(reason));
    }
}

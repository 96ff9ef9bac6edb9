//! In-process storage backend
//!
//! Sleeps for a configurable latency instead of calling a storage API,
//! records every call, and can be told to fail specific edges. Used by the
//! `run` command and by tests.

use super::VolumeBackend;
use crate::cache::{EdgeKey, NodeName, VolumeName, VolumeSpec};
use crate::error::{AttachdError, AttachdResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// A call received by the simulated backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    Attach(EdgeKey),
    Detach(EdgeKey),
}

/// Backend that simulates attach/detach latency and failures
#[derive(Debug, Default)]
pub struct SimulatedBackend {
    attach_latency: Duration,
    detach_latency: Duration,
    calls: Mutex<Vec<BackendCall>>,
    failures: Mutex<HashMap<EdgeKey, u32>>,
}

impl SimulatedBackend {
    pub fn new(attach_latency: Duration, detach_latency: Duration) -> Self {
        Self {
            attach_latency,
            detach_latency,
            ..Self::default()
        }
    }

    /// Make the next `count` calls for the edge fail
    pub fn fail_next(&self, key: EdgeKey, count: u32) {
        self.failures.lock().insert(key, count);
    }

    /// All calls received so far, in order
    pub fn calls(&self) -> Vec<BackendCall> {
        self.calls.lock().clone()
    }

    fn record(&self, call: BackendCall) -> bool {
        let key = match &call {
            BackendCall::Attach(key) | BackendCall::Detach(key) => key.clone(),
        };
        self.calls.lock().push(call);

        let mut failures = self.failures.lock();
        match failures.get_mut(&key) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl VolumeBackend for SimulatedBackend {
    async fn attach(&self, spec: &VolumeSpec, node: &NodeName) -> AttachdResult<()> {
        let key = EdgeKey::new(spec.name.clone(), node.clone());
        let fail = self.record(BackendCall::Attach(key));
        tokio::time::sleep(self.attach_latency).await;

        if fail {
            return Err(AttachdError::AttachFailed {
                volume: spec.name.clone(),
                node: node.clone(),
                reason: "injected failure".to_string(),
            });
        }
        debug!("Simulated attach of {} ({}) to {}", spec.name, spec.driver, node);
        Ok(())
    }

    async fn detach(&self, volume: &VolumeName, node: &NodeName) -> AttachdResult<()> {
        let key = EdgeKey::new(volume.clone(), node.clone());
        let fail = self.record(BackendCall::Detach(key));
        tokio::time::sleep(self.detach_latency).await;

        if fail {
            return Err(AttachdError::DetachFailed {
                volume: volume.clone(),
                node: node.clone(),
                reason: "injected failure".to_string(),
            });
        }
        debug!("Simulated detach of {} from {}", volume, node);
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "simulated"
    }
}

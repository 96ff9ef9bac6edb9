//! Attach/detach operation dispatch
//!
//! The reconciler hands operations to an [`OperationExecutor`] and never
//! waits for them. Executors deduplicate per edge, so resubmitting the same
//! operation on every reconcile pass is expected and cheap.

mod backend;
mod backoff;
mod executor;
mod recording;
mod simulated;

pub use backend::VolumeBackend;
pub use backoff::ExponentialBackoff;
pub use executor::AttacherDetacher;
pub use recording::{RecordingExecutor, Submission};
pub use simulated::{BackendCall, SimulatedBackend};

use crate::cache::{AttachedVolume, VolumeToAttach};
use serde::Serialize;
use std::fmt;

/// Why a detach was requested
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DetachReason {
    /// The node reported the volume as no longer in use
    Safe,
    /// The volume was never reported safe and the grace period ran out
    GraceExpired,
}

impl DetachReason {
    pub fn is_forced(&self) -> bool {
        matches!(self, Self::GraceExpired)
    }
}

impl fmt::Display for DetachReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Safe => f.write_str("safe"),
            Self::GraceExpired => f.write_str("grace-expired"),
        }
    }
}

/// Non-blocking sink for attach/detach operations
///
/// Implementations must return immediately and must tolerate the same edge
/// being submitted repeatedly. Outcomes are reported through the actual
/// state cache, never to the caller.
pub trait OperationExecutor: Send + Sync {
    /// Request that the volume be attached to the node
    fn attach_volume(&self, volume: &VolumeToAttach);

    /// Request that the volume be detached from the node
    fn detach_volume(&self, volume: &AttachedVolume, reason: DetachReason);
}

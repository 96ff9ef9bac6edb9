//! Storage backend abstraction
//!
//! Provides a trait for the physical attach/detach calls that can be
//! implemented by different storage drivers.

use crate::cache::{NodeName, VolumeName, VolumeSpec};
use crate::error::AttachdResult;
use async_trait::async_trait;

/// Abstract storage backend interface
///
/// Calls may be arbitrarily slow. The executor runs them off the
/// reconcile loop and never issues two calls for the same edge at once.
#[async_trait]
pub trait VolumeBackend: Send + Sync {
    /// Attach the volume to the node
    async fn attach(&self, spec: &VolumeSpec, node: &NodeName) -> AttachdResult<()>;

    /// Detach the volume from the node
    async fn detach(&self, volume: &VolumeName, node: &NodeName) -> AttachdResult<()>;

    /// Get the human-readable backend name for display
    fn backend_name(&self) -> &'static str;
}

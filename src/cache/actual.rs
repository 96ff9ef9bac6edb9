//! Actual state of world: which volumes are attached to which nodes
//!
//! Besides membership, each attachment carries the detach-safety bookkeeping
//! the reconciler reads (`safe_to_detach`) and drives (`desire_to_detach_since`).

use crate::cache::types::{AttachedVolume, EdgeKey, NodeName, VolumeName, VolumeSpec};
use crate::error::{AttachdError, AttachdResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Observed topology, shared by the reconciler and the operation executor
pub trait ActualStateOfWorld: Send + Sync {
    /// Snapshot of every tracked attachment
    fn attached_volumes(&self) -> Vec<AttachedVolume>;

    /// Whether the volume is tracked as attached to the node
    fn volume_node_exists(&self, volume: &VolumeName, node: &NodeName) -> bool;

    /// Re-affirm that the attachment is still wanted, clearing any running
    /// detach timer. Fails if the attachment is not tracked.
    fn touch(&self, volume: &VolumeName, node: &NodeName) -> AttachdResult<()>;

    /// Start the detach timer unless it is already running and return the
    /// time elapsed since it started
    fn mark_desire_to_detach(&self, volume: &VolumeName, node: &NodeName)
        -> AttachdResult<Duration>;

    /// Record a completed attach. Touches the attachment if already tracked.
    fn add_volume_node(&self, spec: &VolumeSpec, node: &NodeName) -> AttachdResult<VolumeName>;

    /// Forget an attachment after its detach completed
    fn delete_volume_node(&self, volume: &VolumeName, node: &NodeName);

    /// Update the externally derived liveness signal for an attachment
    fn set_safe_to_detach(
        &self,
        volume: &VolumeName,
        node: &NodeName,
        safe: bool,
    ) -> AttachdResult<()>;
}

/// Lock-guarded in-memory actual state
///
/// New attachments start out unsafe to detach: the volume is assumed in use
/// until the node reports otherwise through [`ActualStateOfWorld::set_safe_to_detach`].
#[derive(Debug, Default)]
pub struct InMemoryActualState {
    attachments: RwLock<HashMap<EdgeKey, AttachedVolume>>,
}

impl InMemoryActualState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attachments tracked for a single node
    pub fn attached_volumes_for_node(&self, node: &NodeName) -> Vec<AttachedVolume> {
        self.attachments
            .read()
            .values()
            .filter(|a| &a.node_name == node)
            .cloned()
            .collect()
    }

    /// Number of tracked attachments
    pub fn len(&self) -> usize {
        self.attachments.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.attachments.read().is_empty()
    }

    /// Look up a single attachment
    pub fn get(&self, volume: &VolumeName, node: &NodeName) -> Option<AttachedVolume> {
        self.attachments
            .read()
            .get(&EdgeKey::new(volume.clone(), node.clone()))
            .cloned()
    }

    /// Keys of every tracked attachment, sorted
    pub fn keys(&self) -> Vec<EdgeKey> {
        let mut keys: Vec<EdgeKey> = self.attachments.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl ActualStateOfWorld for InMemoryActualState {
    fn attached_volumes(&self) -> Vec<AttachedVolume> {
        self.attachments.read().values().cloned().collect()
    }

    fn volume_node_exists(&self, volume: &VolumeName, node: &NodeName) -> bool {
        self.attachments
            .read()
            .contains_key(&EdgeKey::new(volume.clone(), node.clone()))
    }

    fn touch(&self, volume: &VolumeName, node: &NodeName) -> AttachdResult<()> {
        let mut attachments = self.attachments.write();
        let attached = attachments
            .get_mut(&EdgeKey::new(volume.clone(), node.clone()))
            .ok_or_else(|| AttachdError::edge_not_found(volume, node))?;

        if attached.desire_to_detach_since.take().is_some() {
            debug!("Detach timer cleared for volume {} on node {}", volume, node);
        }
        Ok(())
    }

    fn mark_desire_to_detach(
        &self,
        volume: &VolumeName,
        node: &NodeName,
    ) -> AttachdResult<Duration> {
        let mut attachments = self.attachments.write();
        let attached = attachments
            .get_mut(&EdgeKey::new(volume.clone(), node.clone()))
            .ok_or_else(|| AttachdError::edge_not_found(volume, node))?;

        let now = Instant::now();
        let since = *attached.desire_to_detach_since.get_or_insert_with(|| {
            debug!("Detach timer started for volume {} on node {}", volume, node);
            now
        });
        Ok(now.saturating_duration_since(since))
    }

    fn add_volume_node(&self, spec: &VolumeSpec, node: &NodeName) -> AttachdResult<VolumeName> {
        let key = EdgeKey::new(spec.name.clone(), node.clone());
        let mut attachments = self.attachments.write();
        match attachments.get_mut(&key) {
            Some(attached) => {
                trace!("Volume {} already tracked on node {}", spec.name, node);
                attached.desire_to_detach_since = None;
            }
            None => {
                debug!("Volume {} attached to node {}", spec.name, node);
                attachments.insert(
                    key,
                    AttachedVolume {
                        volume_name: spec.name.clone(),
                        volume_spec: spec.clone(),
                        node_name: node.clone(),
                        safe_to_detach: false,
                        desire_to_detach_since: None,
                    },
                );
            }
        }
        Ok(spec.name.clone())
    }

    fn delete_volume_node(&self, volume: &VolumeName, node: &NodeName) {
        if self
            .attachments
            .write()
            .remove(&EdgeKey::new(volume.clone(), node.clone()))
            .is_some()
        {
            debug!("Volume {} detached from node {}", volume, node);
        }
    }

    fn set_safe_to_detach(
        &self,
        volume: &VolumeName,
        node: &NodeName,
        safe: bool,
    ) -> AttachdResult<()> {
        let mut attachments = self.attachments.write();
        let attached = attachments
            .get_mut(&EdgeKey::new(volume.clone(), node.clone()))
            .ok_or_else(|| AttachdError::edge_not_found(volume, node))?;
        attached.safe_to_detach = safe;
        Ok(())
    }
}

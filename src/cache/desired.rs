//! Desired state of world: which volumes should be attached to which nodes
//!
//! The desired set is derived from pod bindings. An edge is desired while at
//! least one pod scheduled to a managed node references the volume.

use crate::cache::types::{EdgeKey, NodeName, PodName, VolumeName, VolumeSpec, VolumeToAttach};
use crate::error::{AttachdError, AttachdResult};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use tracing::debug;

/// Read-only view of the desired topology consumed by the reconciler
pub trait DesiredStateOfWorld: Send + Sync {
    /// Snapshot of every edge that should be attached
    fn volumes_to_attach(&self) -> Vec<VolumeToAttach>;

    /// Whether the volume should be attached to the node
    fn volume_exists(&self, volume: &VolumeName, node: &NodeName) -> bool;
}

#[derive(Debug)]
struct DesiredVolume {
    spec: VolumeSpec,
    pods: BTreeSet<PodName>,
}

#[derive(Debug, Default)]
struct DesiredNode {
    volumes: HashMap<VolumeName, DesiredVolume>,
}

/// Lock-guarded in-memory desired state
#[derive(Debug, Default)]
pub struct InMemoryDesiredState {
    nodes: RwLock<HashMap<NodeName, DesiredNode>>,
}

impl InMemoryDesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start managing attachments for a node. Adding a known node is a no-op.
    pub fn add_node(&self, node: NodeName) {
        let mut nodes = self.nodes.write();
        if !nodes.contains_key(&node) {
            debug!("Managing node {}", node);
            nodes.insert(node, DesiredNode::default());
        }
    }

    /// Stop managing a node
    ///
    /// Fails while pods on the node still reference volumes; those pods must
    /// be removed first so their volumes get detached.
    pub fn delete_node(&self, node: &NodeName) -> AttachdResult<()> {
        let mut nodes = self.nodes.write();
        let Some(entry) = nodes.get(node) else {
            return Ok(());
        };
        if !entry.volumes.is_empty() {
            return Err(AttachdError::NodeHasVolumes {
                node: node.clone(),
                count: entry.volumes.len(),
            });
        }
        nodes.remove(node);
        debug!("Stopped managing node {}", node);
        Ok(())
    }

    pub fn node_exists(&self, node: &NodeName) -> bool {
        self.nodes.read().contains_key(node)
    }

    /// Record that `pod` on `node` uses the volume described by `spec`
    pub fn add_pod(
        &self,
        pod: PodName,
        spec: VolumeSpec,
        node: &NodeName,
    ) -> AttachdResult<VolumeName> {
        let mut nodes = self.nodes.write();
        let entry = nodes
            .get_mut(node)
            .ok_or_else(|| AttachdError::NodeNotManaged(node.clone()))?;

        let volume_name = spec.name.clone();
        let volume = entry
            .volumes
            .entry(volume_name.clone())
            .or_insert_with(|| DesiredVolume {
                spec,
                pods: BTreeSet::new(),
            });
        if volume.pods.insert(pod.clone()) {
            debug!("Pod {} uses volume {} on node {}", pod, volume_name, node);
        }
        Ok(volume_name)
    }

    /// Remove a pod's reference to a volume. The edge stops being desired
    /// once its last pod is gone.
    pub fn delete_pod(&self, pod: &PodName, volume: &VolumeName, node: &NodeName) {
        let mut nodes = self.nodes.write();
        let Some(entry) = nodes.get_mut(node) else {
            return;
        };
        let Some(desired) = entry.volumes.get_mut(volume) else {
            return;
        };
        desired.pods.remove(pod);
        if desired.pods.is_empty() {
            entry.volumes.remove(volume);
            debug!("Volume {} no longer desired on node {}", volume, node);
        }
    }

    /// Number of desired edges
    pub fn len(&self) -> usize {
        self.nodes.read().values().map(|n| n.volumes.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys of every desired edge, sorted
    pub fn keys(&self) -> Vec<EdgeKey> {
        let mut keys: Vec<EdgeKey> = self
            .volumes_to_attach()
            .into_iter()
            .map(|v| v.key())
            .collect();
        keys.sort();
        keys
    }
}

impl DesiredStateOfWorld for InMemoryDesiredState {
    fn volumes_to_attach(&self) -> Vec<VolumeToAttach> {
        let nodes = self.nodes.read();
        nodes
            .iter()
            .flat_map(|(node_name, node)| {
                node.volumes.iter().map(move |(volume_name, volume)| VolumeToAttach {
                    volume_name: volume_name.clone(),
                    volume_spec: volume.spec.clone(),
                    node_name: node_name.clone(),
                })
            })
            .collect()
    }

    fn volume_exists(&self, volume: &VolumeName, node: &NodeName) -> bool {
        self.nodes
            .read()
            .get(node)
            .is_some_and(|n| n.volumes.contains_key(volume))
    }
}

//! Topology files seeding the in-memory caches
//!
//! A topology file declares the nodes under management, the pods that bind
//! volumes to them (the desired state), and the attachments already present
//! on the cluster (the actual state):
//!
//! ```toml
//! [[nodes]]
//! name = "node-1"
//!
//! [[pods]]
//! name = "db-0"
//! node = "node-1"
//! volume = "pvc-db"
//!
//! [[attached]]
//! volume = "pvc-logs"
//! node = "node-1"
//! safe_to_detach = false
//! ```

use crate::cache::{
    ActualStateOfWorld, InMemoryActualState, InMemoryDesiredState, NodeName, PodName, VolumeName,
    VolumeSpec,
};
use crate::error::{AttachdError, AttachdResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// Parsed topology file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Topology {
    pub nodes: Vec<NodeEntry>,
    pub pods: Vec<PodEntry>,
    pub attached: Vec<AttachedEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeEntry {
    pub name: NodeName,
}

/// A pod using a volume on a node
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PodEntry {
    pub name: PodName,
    pub node: NodeName,
    pub volume: VolumeName,
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default)]
    pub read_only: bool,
}

/// An attachment already present on the cluster
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttachedEntry {
    pub volume: VolumeName,
    pub node: NodeName,
    #[serde(default = "default_driver")]
    pub driver: String,
    #[serde(default)]
    pub safe_to_detach: bool,
}

fn default_driver() -> String {
    "simulated".to_string()
}

impl Topology {
    /// Read and parse a topology file
    pub async fn load(path: &Path) -> AttachdResult<Self> {
        let content = fs::read_to_string(path).await.map_err(|e| {
            AttachdError::io(format!("reading topology from {}", path.display()), e)
        })?;

        Self::parse(&content, path)
    }

    /// Parse topology text read from `origin`, checking that every pod lands
    /// on a declared node
    pub fn parse(content: &str, origin: &Path) -> AttachdResult<Self> {
        let invalid = |reason: String| AttachdError::TopologyInvalid {
            path: origin.to_path_buf(),
            reason,
        };

        let topology: Topology = toml::from_str(content).map_err(|e| invalid(e.to_string()))?;

        for pod in &topology.pods {
            if !topology.nodes.iter().any(|n| n.name == pod.node) {
                return Err(invalid(format!(
                    "pod {} is scheduled to undeclared node {}",
                    pod.name, pod.node
                )));
            }
        }
        Ok(topology)
    }

    /// Populate the caches from this topology
    pub fn apply(
        &self,
        desired: &InMemoryDesiredState,
        actual: &InMemoryActualState,
    ) -> AttachdResult<()> {
        for node in &self.nodes {
            desired.add_node(node.name.clone());
        }

        for pod in &self.pods {
            let spec = VolumeSpec {
                read_only: pod.read_only,
                ..VolumeSpec::new(pod.volume.clone()).with_driver(pod.driver.clone())
            };
            desired.add_pod(pod.name.clone(), spec, &pod.node)?;
        }

        for entry in &self.attached {
            let spec = VolumeSpec::new(entry.volume.clone()).with_driver(entry.driver.clone());
            actual.add_volume_node(&spec, &entry.node)?;
            actual.set_safe_to_detach(&entry.volume, &entry.node, entry.safe_to_detach)?;
        }

        debug!(
            "Loaded topology: {} nodes, {} pods, {} attachments",
            self.nodes.len(),
            self.pods.len(),
            self.attached.len()
        );
        Ok(())
    }
}

//! Edge and volume identity types shared by both state caches

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tokio::time::Instant;

/// Unique name of a volume within the cluster
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VolumeName(String);

/// Name of a node volumes can be attached to
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeName(String);

/// Name of a pod referencing a volume
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PodName(String);

macro_rules! string_name {
    ($ty:ident) => {
        impl $ty {
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $ty {
            fn from(name: &str) -> Self {
                Self(name.to_string())
            }
        }

        impl From<String> for $ty {
            fn from(name: String) -> Self {
                Self(name)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.pad(&self.0)
            }
        }
    };
}

string_name!(VolumeName);
string_name!(NodeName);
string_name!(PodName);

/// Identity of an attachment: a `(volume, node)` pair
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeKey {
    pub volume: VolumeName,
    pub node: NodeName,
}

impl EdgeKey {
    pub fn new(volume: VolumeName, node: NodeName) -> Self {
        Self { volume, node }
    }
}

impl fmt::Display for EdgeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.volume, self.node)
    }
}

/// Description of a volume, handed to the backend on attach
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Volume name
    pub name: VolumeName,

    /// Storage driver responsible for the volume
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Attach read-only
    #[serde(default)]
    pub read_only: bool,

    /// Driver-specific attributes
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

fn default_driver() -> String {
    "simulated".to_string()
}

impl VolumeSpec {
    /// Create a spec for the given volume with default driver settings
    pub fn new(name: impl Into<VolumeName>) -> Self {
        Self {
            name: name.into(),
            driver: default_driver(),
            read_only: false,
            attributes: BTreeMap::new(),
        }
    }

    /// Set the storage driver
    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = driver.into();
        self
    }
}

/// A desired edge: this volume should be attached to this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeToAttach {
    pub volume_name: VolumeName,
    pub volume_spec: VolumeSpec,
    pub node_name: NodeName,
}

impl VolumeToAttach {
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.volume_name.clone(), self.node_name.clone())
    }
}

/// An actual edge: this volume is (or was last known to be) attached to this node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachedVolume {
    pub volume_name: VolumeName,
    pub volume_spec: VolumeSpec,
    pub node_name: NodeName,

    /// No workload on the node still uses the volume
    pub safe_to_detach: bool,

    /// First time the edge was observed missing from the desired set
    pub desire_to_detach_since: Option<Instant>,
}

impl AttachedVolume {
    pub fn key(&self) -> EdgeKey {
        EdgeKey::new(self.volume_name.clone(), self.node_name.clone())
    }
}

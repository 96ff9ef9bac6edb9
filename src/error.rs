//! Error types for attachd
//!
//! All modules use `AttachdResult<T>` as their return type.

use crate::cache::{NodeName, VolumeName};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for attachd operations
pub type AttachdResult<T> = Result<T, AttachdError>;

/// All errors that can occur in attachd
#[derive(Error, Debug)]
pub enum AttachdError {
    // State cache errors
    #[error("Volume {volume} is not attached to node {node}")]
    EdgeNotFound { volume: VolumeName, node: NodeName },

    #[error("Node is not managed by the controller: {0}")]
    NodeNotManaged(NodeName),

    #[error("Node {node} still has {count} volume(s) to attach")]
    NodeHasVolumes { node: NodeName, count: usize },

    // Operation errors
    #[error("Attach of volume {volume} to node {node} failed: {reason}")]
    AttachFailed {
        volume: VolumeName,
        node: NodeName,
        reason: String,
    },

    #[error("Detach of volume {volume} from node {node} failed: {reason}")]
    DetachFailed {
        volume: VolumeName,
        node: NodeName,
        reason: String,
    },

    #[error("No async runtime available: {0}")]
    NoRuntime(String),

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Configuration file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid topology at {path}: {reason}")]
    TopologyInvalid { path: PathBuf, reason: String },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl AttachdError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an edge-not-found error
    pub fn edge_not_found(volume: &VolumeName, node: &NodeName) -> Self {
        Self::EdgeNotFound {
            volume: volume.clone(),
            node: node.clone(),
        }
    }

    /// Check if error is retryable
    ///
    /// Failed backend calls back off exponentially in the executor. Anything
    /// else a backend returns holds the edge for the full backoff cap.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::AttachFailed { .. } | Self::DetachFailed { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::ConfigInvalid { .. } => {
                Some("Repair it with: attachd config set <key> <value>, or reset with: attachd config init --force")
            }
            Self::ConfigNotFound(_) => Some("Run: attachd config init"),
            Self::TopologyInvalid { .. } => {
                Some("Topology files list [[nodes]], [[pods]] and [[attached]] tables")
            }
            Self::NodeNotManaged(_) => Some("Declare the node under [[nodes]] first"),
            _ => None,
        }
    }
}

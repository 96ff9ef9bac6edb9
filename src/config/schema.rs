//! Configuration schema for attachd
//!
//! Configuration is stored at `~/.config/attachd/config.toml`

use crate::error::{AttachdError, AttachdResult};
use crate::operation::ExponentialBackoff;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// General settings
    pub general: GeneralConfig,

    /// Reconcile loop timing
    pub reconciler: ReconcilerConfig,

    /// Operation executor settings
    pub executor: ExecutorConfig,

    /// Simulated backend used by `attachd run`
    pub simulation: SimulationConfig,
}

impl Config {
    /// Reject settings the controller cannot run with
    pub fn validate(&self, path: &Path) -> AttachdResult<()> {
        let invalid = |reason: &str| AttachdError::ConfigInvalid {
            path: path.to_path_buf(),
            reason: reason.to_string(),
        };

        if self.reconciler.loop_period_ms == 0 {
            return Err(invalid("reconciler.loop_period_ms must be greater than 0"));
        }
        if self.executor.max_concurrent_operations == 0 {
            return Err(invalid(
                "executor.max_concurrent_operations must be greater than 0",
            ));
        }
        if self.executor.backoff_initial_ms == 0 {
            return Err(invalid("executor.backoff_initial_ms must be greater than 0"));
        }
        if self.executor.backoff_initial() > self.executor.backoff_max() {
            return Err(invalid(
                "executor.backoff_initial_ms must not exceed executor.backoff_max_secs",
            ));
        }
        if !matches!(self.general.log_format.as_str(), "text" | "json") {
            return Err(invalid("general.log_format must be \"text\" or \"json\""));
        }
        Ok(())
    }
}

/// General application settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log format: "text" or "json"
    pub log_format: String,

    /// Enable audit logging
    pub audit_log: bool,

    /// Audit log location (defaults to the state directory)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_path: Option<PathBuf>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_format: "text".to_string(),
            audit_log: true,
            audit_path: None,
        }
    }
}

/// Reconcile loop settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcilerConfig {
    /// Pause between reconcile passes in milliseconds
    pub loop_period_ms: u64,

    /// How long a volume that is not safe to detach may linger before it
    /// is detached anyway
    pub max_safe_to_detach_secs: u64,
}

impl ReconcilerConfig {
    pub fn loop_period(&self) -> Duration {
        Duration::from_millis(self.loop_period_ms)
    }

    pub fn max_safe_to_detach(&self) -> Duration {
        Duration::from_secs(self.max_safe_to_detach_secs)
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            loop_period_ms: 100,
            max_safe_to_detach_secs: 360,
        }
    }
}

/// Operation executor settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Backend calls allowed to run at once
    pub max_concurrent_operations: usize,

    /// Delay after the first failure on an edge
    pub backoff_initial_ms: u64,

    /// Upper bound for the backoff delay
    pub backoff_max_secs: u64,
}

impl ExecutorConfig {
    pub fn backoff_initial(&self) -> Duration {
        Duration::from_millis(self.backoff_initial_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_secs(self.backoff_max_secs)
    }

    pub fn backoff(&self) -> ExponentialBackoff {
        ExponentialBackoff::new(self.backoff_initial(), self.backoff_max())
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_operations: 16,
            backoff_initial_ms: 500,
            backoff_max_secs: 122,
        }
    }
}

/// Simulated backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Latency of a simulated attach in milliseconds
    pub attach_latency_ms: u64,

    /// Latency of a simulated detach in milliseconds
    pub detach_latency_ms: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            attach_latency_ms: 200,
            detach_latency_ms: 200,
        }
    }
}

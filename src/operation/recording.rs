//! Executor that records submissions without running them

use super::{DetachReason, OperationExecutor};
use crate::cache::{AttachedVolume, EdgeKey, VolumeToAttach};
use parking_lot::Mutex;

/// An operation handed to an executor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    Attach(EdgeKey),
    Detach(EdgeKey, DetachReason),
}

/// Dry-run executor used by `attachd plan` and in tests
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    submissions: Mutex<Vec<Submission>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every submission so far, in order
    pub fn submissions(&self) -> Vec<Submission> {
        self.submissions.lock().clone()
    }

    /// Keys of attach submissions
    pub fn attaches(&self) -> Vec<EdgeKey> {
        self.submissions
            .lock()
            .iter()
            .filter_map(|s| match s {
                Submission::Attach(key) => Some(key.clone()),
                Submission::Detach(..) => None,
            })
            .collect()
    }

    /// Keys and reasons of detach submissions
    pub fn detaches(&self) -> Vec<(EdgeKey, DetachReason)> {
        self.submissions
            .lock()
            .iter()
            .filter_map(|s| match s {
                Submission::Detach(key, reason) => Some((key.clone(), *reason)),
                Submission::Attach(_) => None,
            })
            .collect()
    }

    /// Drain recorded submissions
    pub fn take(&self) -> Vec<Submission> {
        std::mem::take(&mut *self.submissions.lock())
    }
}

impl OperationExecutor for RecordingExecutor {
    fn attach_volume(&self, volume: &VolumeToAttach) {
        self.submissions.lock().push(Submission::Attach(volume.key()));
    }

    fn detach_volume(&self, volume: &AttachedVolume, reason: DetachReason) {
        self.submissions
            .lock()
            .push(Submission::Detach(volume.key(), reason));
    }
}

//! Desired and actual state caches
//!
//! Both caches are thread-safe: the reconciler and the operation executor's
//! completion tasks call into them concurrently. Each call holds a short
//! internal lock and snapshots are returned as owned copies, so no lock
//! outlives a call.
//!
//! # Detach timer
//!
//! | State | `desire_to_detach_since` | Entered by |
//! |-------|--------------------------|------------|
//! | Not pending | `None` | attach, `touch` |
//! | Pending | `Some(t)` | first `mark_desire_to_detach` |

pub mod actual;
pub mod desired;
pub mod types;

pub use actual::{ActualStateOfWorld, InMemoryActualState};
pub use desired::{DesiredStateOfWorld, InMemoryDesiredState};
pub use types::{AttachedVolume, EdgeKey, NodeName, PodName, VolumeName, VolumeSpec, VolumeToAttach};

//! attachd - Volume Attach/Detach Reconciler
//!
//! Keeps the volumes attached to each node in line with the volumes the
//! node's workloads need. A periodic [`reconciler::Reconciler`] compares the
//! desired and actual state caches and hands attach/detach operations to an
//! [`operation::OperationExecutor`]; volumes that are no longer wanted but
//! not yet safe to detach are given a bounded grace period before being
//! detached anyway.

pub mod audit;
pub mod cache;
pub mod cli;
pub mod config;
pub mod controller;
pub mod error;
pub mod operation;
pub mod reconciler;
pub mod topology;

pub use error::{AttachdError, AttachdResult};

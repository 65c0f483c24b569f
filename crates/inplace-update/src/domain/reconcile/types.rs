use core::error::Error;
use std::time::Duration;

use crate::infrastructure::k8s::ObjectKey;

/// What the runtime should do once a pass returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Wait for the next change to the request
    Done,
    RequeueAfter(Duration),
}

/// Errors surfaced by a reconcile pass to the runtime.
#[derive(Debug, derive_more::Display)]
pub enum ReconcileError {
    #[display("Failed to load InplaceUpdate {key}")]
    Load { key: ObjectKey },
    #[display("Failed to read target Deployment of {key}")]
    Target { key: ObjectKey },
    #[display("Failed to commit status of InplaceUpdate {key}")]
    StatusCommit { key: ObjectKey },
}

impl Error for ReconcileError {}

/// Reasons a consistent pod snapshot could not be taken.
#[derive(Debug, derive_more::Display)]
pub enum SnapshotError {
    #[display("Cluster request failed while taking the pod snapshot")]
    Store,
    #[display("Deployment {deployment} has no new ReplicaSet")]
    NoCurrentReplicaSet { deployment: ObjectKey },
    #[display("Deployment {deployment} has updated replicas, expect {expected}, got {actual}")]
    ReplicaSetOutOfSync {
        deployment: ObjectKey,
        expected: i32,
        actual: i32,
    },
    #[display("ReplicaSet {replica_set} has {actual} pods, expect {expected}")]
    PodCountMismatch {
        replica_set: ObjectKey,
        expected: i32,
        actual: usize,
    },
    #[display("{failed} pod(s) could not be patched: {details}")]
    Aborted { failed: usize, details: String },
}

impl Error for SnapshotError {}

/// Reasons a single pod could not be patched.
#[derive(Debug, Clone, PartialEq, Eq, derive_more::Display)]
pub enum PatchError {
    #[display("Pod {pod} has no spec")]
    MissingSpec { pod: String },
    #[display("Container {container} not found in pod {pod}")]
    ContainerNotFound { pod: String, container: String },
    #[display("Failed to encode update state of pod {pod}")]
    EncodeState { pod: String },
}

impl Error for PatchError {}

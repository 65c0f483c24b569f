//! Shared API type definitions
//!
//! This crate contains the `InplaceUpdate` custom resource and the annotation
//! payloads shared by the operator components: the request spec submitted by
//! users, the status written back by the controller, and the per-pod update
//! state blob stamped on every patched pod.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::ContainerStatus;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::Deserialize;
use serde::Serialize;

/// Pod annotation holding the serialized [`UpdateState`].
pub const ANNOTATION_STATE_KEY: &str = "inplace-update.io/state";

/// Request annotation holding the comma-joined names of finished pods.
pub const ANNOTATION_FINISHED_KEY: &str = "inplace-update.io/finished";

/// Request annotation holding the comma-joined names of failed pods.
pub const ANNOTATION_FAILED_KEY: &str = "inplace-update.io/failed";

/// Identifies the workload an update request targets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TargetReference {
    pub api_version: String,
    pub kind: String,
    pub name: String,
}

/// A container and the image it should run after the update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ContainerImage {
    pub name: String,
    pub image: String,
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, derive_more::Display,
)]
pub enum ReclaimPolicy {
    Delete,
    #[default]
    Retain,
}

/// How a single pod failure affects the whole update pass.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, derive_more::Display,
)]
pub enum FailurePolicy {
    /// Count the failure and keep going with the remaining pods
    #[default]
    Ignore,
    /// Fail the request as soon as any pod cannot be patched
    Abort,
}

/// Desired state of an in-place image update.
#[derive(CustomResource, Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "apps.inplace-update.io",
    version = "v1",
    kind = "InplaceUpdate",
    namespaced,
    status = "InplaceUpdateStatus",
    shortname = "ipu",
    derive = "PartialEq",
    printcolumn = r#"{"name":"Phase", "type":"string", "jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Replicas", "type":"integer", "jsonPath":".status.replicas"}"#,
    printcolumn = r#"{"name":"Updated", "type":"integer", "jsonPath":".status.updatedReplicas"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct InplaceUpdateSpec {
    /// Workload whose pods are updated; immutable after admission
    pub target_ref: TargetReference,
    /// Containers to update, names unique within the list
    pub containers: Vec<ContainerImage>,
    /// Rolling update flag, carried but not consumed yet
    #[serde(default)]
    pub rolling_update: bool,
    /// Maximum number of unavailable pods, absolute or percentage
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,
    #[serde(default)]
    pub reclaim_policy: ReclaimPolicy,
    /// Seconds to wait after the request is first observed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay: Option<i32>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl InplaceUpdateSpec {
    /// Names of the requested containers, in request order.
    pub fn container_names(&self) -> Vec<String> {
        self.containers.iter().map(|c| c.name.clone()).collect()
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema, derive_more::Display,
)]
pub enum Phase {
    #[default]
    Pending,
    Running,
    Finished,
    Failed,
}

impl Phase {
    /// Finished and Failed never transition again.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Phase::Finished | Phase::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, derive_more::Display)]
pub enum ConditionType {
    /// The target workload is missing or not ready
    FailedOwnerRef,
    /// Pods could not be selected or patched
    FailedPods,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema, derive_more::Display)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InplaceUpdateCondition {
    #[serde(rename = "type")]
    pub type_: ConditionType,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<Time>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub message: String,
}

impl InplaceUpdateCondition {
    /// Whether two conditions describe the same observation, ignoring when it happened.
    pub fn same_observation(&self, other: &Self) -> bool {
        self.type_ == other.type_
            && self.status == other.status
            && self.reason == other.reason
            && self.message == other.message
    }
}

/// Observed state of an in-place image update.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct InplaceUpdateStatus {
    /// Pods included in the latest snapshot
    #[serde(default)]
    pub replicas: i32,
    #[serde(default)]
    pub updated_replicas: i32,
    #[serde(default)]
    pub unavailable_replicas: i32,
    /// Containers targeted across the snapshot
    #[serde(default)]
    pub container_number: i32,
    #[serde(default)]
    pub updated_container_number: i32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<InplaceUpdateCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<Time>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<Time>,
    #[serde(default)]
    pub phase: Phase,
}

impl InplaceUpdate {
    pub fn phase(&self) -> Phase {
        self.status.as_ref().map(|s| s.phase).unwrap_or_default()
    }

    /// Whether the request reached Finished or Failed.
    pub fn is_completed(&self) -> bool {
        self.phase().is_terminal()
    }

    pub fn is_running(&self) -> bool {
        self.phase() == Phase::Running
    }
}

/// Per-pod record of an in-place update, stored under [`ANNOTATION_STATE_KEY`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateState {
    /// Revision of the workload the pod belonged to when patched
    pub revision: String,
    pub update_timestamp: Time,
    /// Container statuses captured before the update, keyed by container name
    pub last_container_statuses: BTreeMap<String, ContainerStatus>,
}

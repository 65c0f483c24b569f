//! Deployment bookkeeping helpers mirroring the built-in deployment controller

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::Resource;
use kube::ResourceExt;

/// Revision stamped by the deployment controller on replica sets.
pub const REVISION_ANNOTATION: &str = "deployment.kubernetes.io/revision";

const POD_TEMPLATE_HASH_LABEL: &str = "pod-template-hash";

/// Desired replica count, defaulting to one like the API server does.
pub fn desired_replicas(deployment: &Deployment) -> i32 {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(1)
}

pub fn is_paused(deployment: &Deployment) -> bool {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.paused)
        .unwrap_or(false)
}

/// Total replicas the deployment reports in its status.
pub fn observed_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or_default()
}

/// Whether every desired replica is updated and available and the latest
/// generation has been observed.
pub fn deployment_complete(deployment: &Deployment) -> bool {
    let desired = desired_replicas(deployment);
    let Some(status) = deployment.status.as_ref() else {
        return false;
    };
    status.updated_replicas.unwrap_or_default() == desired
        && status.replicas.unwrap_or_default() == desired
        && status.available_replicas.unwrap_or_default() == desired
        && status.observed_generation.unwrap_or_default()
            >= deployment.meta().generation.unwrap_or_default()
}

pub fn is_deleting<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

/// The owner reference flagged as managing controller, if any.
pub fn controller_of<K: Resource>(obj: &K) -> Option<&OwnerReference> {
    obj.meta()
        .owner_references
        .as_ref()?
        .iter()
        .find(|r| r.controller == Some(true))
}

/// Whether `obj` is controlled by the object with `owner_uid` and not being deleted.
pub fn is_controlled_by<K: Resource>(obj: &K, owner_uid: &str) -> bool {
    controller_of(obj).is_some_and(|r| r.uid == owner_uid) && !is_deleting(obj)
}

/// The oldest replica set whose pod template matches the deployment's,
/// ignoring the pod template hash label.
pub fn find_new_replica_set<'a>(
    deployment: &Deployment,
    replica_sets: &'a [ReplicaSet],
) -> Option<&'a ReplicaSet> {
    let template = &deployment.spec.as_ref()?.template;
    let mut ordered: Vec<&ReplicaSet> = replica_sets.iter().collect();
    ordered.sort_by(|a, b| {
        a.creation_timestamp()
            .map(|t| t.0)
            .cmp(&b.creation_timestamp().map(|t| t.0))
            .then_with(|| a.name_any().cmp(&b.name_any()))
    });
    ordered.into_iter().find(|rs| {
        rs.spec
            .as_ref()
            .and_then(|s| s.template.as_ref())
            .is_some_and(|t| equal_ignore_hash(t, template))
    })
}

pub fn replica_set_revision(replica_set: &ReplicaSet) -> String {
    replica_set
        .annotations()
        .get(REVISION_ANNOTATION)
        .cloned()
        .unwrap_or_default()
}

fn equal_ignore_hash(a: &PodTemplateSpec, b: &PodTemplateSpec) -> bool {
    strip_hash(a) == strip_hash(b)
}

fn strip_hash(template: &PodTemplateSpec) -> PodTemplateSpec {
    let mut stripped = template.clone();
    if let Some(labels) = stripped
        .metadata
        .as_mut()
        .and_then(|m| m.labels.as_mut())
    {
        labels.remove(POD_TEMPLATE_HASH_LABEL);
    }
    stripped
}

//! Pure patch functions applied to pods and to the request object
//!
//! Neither function talks to the cluster; they compute the new object and the
//! caller decides how it is written.

use std::collections::BTreeMap;

use api_types::ContainerImage;
use api_types::InplaceUpdate;
use api_types::UpdateState;
use api_types::ANNOTATION_FAILED_KEY;
use api_types::ANNOTATION_FINISHED_KEY;
use api_types::ANNOTATION_STATE_KEY;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::ContainerStatus;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

use crate::domain::reconcile::types::PatchError;
use crate::domain::reconcile::workload::REVISION_ANNOTATION;

/// Desired images for one pod.
#[derive(Debug, Clone, Copy)]
pub struct PodPatchSpec<'a> {
    pub desired: &'a [ContainerImage],
    /// Revision used when the pod carries no revision annotation
    pub fallback_revision: &'a str,
}

/// Compute the patched definition of `pod`.
///
/// Containers whose live image already matches are left alone, so applying
/// the same spec twice yields the same container list. Changed containers
/// replace their namesake in place; all others keep their position and
/// content. The pod is stamped with an [`UpdateState`] recording the
/// revision, `now` and the captured container statuses.
///
/// # Errors
///
/// - [`PatchError::MissingSpec`] if the pod has no spec
/// - [`PatchError::ContainerNotFound`] if a requested container is absent
/// - [`PatchError::EncodeState`] if the update state cannot be serialized
pub fn patch_pod(
    pod: &Pod,
    latest_statuses: BTreeMap<String, ContainerStatus>,
    spec: PodPatchSpec<'_>,
    now: Time,
) -> Result<Pod, Report<PatchError>> {
    let pod_name = pod.name_any();
    let pod_spec = pod.spec.as_ref().ok_or_else(|| {
        Report::new(PatchError::MissingSpec {
            pod: pod_name.clone(),
        })
    })?;

    let mut changed = Vec::new();
    for target in spec.desired {
        let container = find_container(&target.name, pod_spec).ok_or_else(|| {
            Report::new(PatchError::ContainerNotFound {
                pod: pod_name.clone(),
                container: target.name.clone(),
            })
        })?;
        if container.image.as_deref() == Some(target.image.as_str()) {
            continue;
        }
        changed.push(Container {
            image: Some(target.image.clone()),
            ..container.clone()
        });
    }

    let revision = pod
        .annotations()
        .get(REVISION_ANNOTATION)
        .cloned()
        .unwrap_or_else(|| spec.fallback_revision.to_string());
    let state = UpdateState {
        revision,
        update_timestamp: now,
        last_container_statuses: latest_statuses,
    };
    let encoded = serde_json::to_string(&state).change_context(PatchError::EncodeState {
        pod: pod_name.clone(),
    })?;

    let mut patched = pod.clone();
    if let Some(patched_spec) = patched.spec.as_mut() {
        merge_containers(&mut patched_spec.containers, changed);
    }
    patched
        .annotations_mut()
        .insert(ANNOTATION_STATE_KEY.to_string(), encoded);
    Ok(patched)
}

/// Copy of `update` carrying the finished and failed pod names.
///
/// Status is left untouched.
pub fn patch_process(update: &InplaceUpdate, finished: &[Pod], failed: &[Pod]) -> InplaceUpdate {
    let mut patched = update.clone();
    let annotations = patched.annotations_mut();
    annotations.insert(ANNOTATION_FINISHED_KEY.to_string(), pod_names(finished));
    annotations.insert(ANNOTATION_FAILED_KEY.to_string(), pod_names(failed));
    patched
}

/// Annotations that are new or changed in `after` compared to `before`.
pub fn annotation_delta(before: &InplaceUpdate, after: &InplaceUpdate) -> BTreeMap<String, String> {
    let previous = before.annotations();
    after
        .annotations()
        .iter()
        .filter(|(key, value)| previous.get(*key) != Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

pub fn find_container<'a>(name: &str, spec: &'a PodSpec) -> Option<&'a Container> {
    spec.containers.iter().find(|c| c.name == name)
}

/// Containers of `spec` named in `names`, in request order.
pub fn find_containers<'a>(names: &[String], spec: &'a PodSpec) -> Vec<&'a Container> {
    names
        .iter()
        .filter_map(|name| find_container(name, spec))
        .collect()
}

/// Current statuses of the named containers, keyed by container name.
pub fn latest_container_statuses(pod: &Pod, names: &[String]) -> BTreeMap<String, ContainerStatus> {
    pod.status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .into_iter()
        .flatten()
        .filter(|status| names.contains(&status.name))
        .map(|status| (status.name.clone(), status.clone()))
        .collect()
}

pub fn pod_names(pods: &[Pod]) -> String {
    pods.iter()
        .map(|pod| pod.name_any())
        .collect::<Vec<_>>()
        .join(",")
}

/// Replace containers of `current` by name with `updates`.
fn merge_containers(current: &mut [Container], updates: Vec<Container>) {
    for update in updates {
        if let Some(slot) = current.iter_mut().find(|c| c.name == update.name) {
            *slot = update;
        }
    }
}

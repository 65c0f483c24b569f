//! In-memory [`ObjectStore`] used by the reconciler tests
//!
//! Writes bump `resourceVersion` the way the API server does, and failures can
//! be injected per operation to drive the error paths.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Mutex;

use api_types::ContainerImage;
use api_types::FailurePolicy;
use api_types::InplaceUpdate;
use api_types::InplaceUpdateSpec;
use api_types::TargetReference;
use async_trait::async_trait;
use chrono::Duration as ChronoDuration;
use chrono::Utc;
use error_stack::Report;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::DeploymentSpec;
use k8s_openapi::api::apps::v1::DeploymentStatus;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::apps::v1::ReplicaSetSpec;
use k8s_openapi::api::apps::v1::ReplicaSetStatus;
use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::ContainerStatus;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodSpec;
use k8s_openapi::api::core::v1::PodStatus;
use k8s_openapi::api::core::v1::PodTemplateSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;

use crate::infrastructure::k8s::ObjectKey;
use crate::infrastructure::k8s::ObjectStore;
use crate::infrastructure::k8s::StoreError;

pub(crate) const REVISION: &str = "3";

#[derive(Default)]
struct State {
    updates: BTreeMap<ObjectKey, InplaceUpdate>,
    deployments: BTreeMap<ObjectKey, Deployment>,
    replica_sets: BTreeMap<ObjectKey, ReplicaSet>,
    pods: BTreeMap<ObjectKey, Pod>,
    /// Remaining injected failures per pod name
    pod_failures: HashMap<String, u32>,
    status_conflicts: u32,
    status_writes: u32,
    pause_calls: Vec<bool>,
    replaced_pods: Vec<String>,
    fail_resume: bool,
    fail_annotation_patch: bool,
    next_version: u64,
}

impl State {
    fn next_version(&mut self) -> String {
        self.next_version += 1;
        (self.next_version + 100).to_string()
    }
}

#[derive(Default)]
pub(crate) struct FakeStore {
    state: Mutex<State>,
}

impl FakeStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert_update(&self, update: InplaceUpdate) {
        let mut state = self.state.lock().unwrap();
        state.updates.insert(ObjectKey::of(&update), update);
    }

    pub(crate) fn insert_deployment(&self, deployment: Deployment) {
        let mut state = self.state.lock().unwrap();
        state.deployments.insert(ObjectKey::of(&deployment), deployment);
    }

    pub(crate) fn insert_replica_set(&self, replica_set: ReplicaSet) {
        let mut state = self.state.lock().unwrap();
        state
            .replica_sets
            .insert(ObjectKey::of(&replica_set), replica_set);
    }

    pub(crate) fn insert_pod(&self, pod: Pod) {
        let mut state = self.state.lock().unwrap();
        state.pods.insert(ObjectKey::of(&pod), pod);
    }

    /// Make the next `times` replacements of the named pod fail.
    pub(crate) fn fail_pod_replace(&self, name: &str, times: u32) {
        let mut state = self.state.lock().unwrap();
        state.pod_failures.insert(name.to_string(), times);
    }

    /// Make the next `times` status writes lose a version race.
    pub(crate) fn conflict_status_writes(&self, times: u32) {
        self.state.lock().unwrap().status_conflicts = times;
    }

    pub(crate) fn fail_resume(&self) {
        self.state.lock().unwrap().fail_resume = true;
    }

    pub(crate) fn fail_annotation_patch(&self) {
        self.state.lock().unwrap().fail_annotation_patch = true;
    }

    pub(crate) fn update(&self, key: &ObjectKey) -> Option<InplaceUpdate> {
        self.state.lock().unwrap().updates.get(key).cloned()
    }

    pub(crate) fn deployment(&self, key: &ObjectKey) -> Option<Deployment> {
        self.state.lock().unwrap().deployments.get(key).cloned()
    }

    pub(crate) fn pod(&self, key: &ObjectKey) -> Option<Pod> {
        self.state.lock().unwrap().pods.get(key).cloned()
    }

    /// Names of successfully replaced pods, in submission order.
    pub(crate) fn replaced_pods(&self) -> Vec<String> {
        self.state.lock().unwrap().replaced_pods.clone()
    }

    /// Every `paused` value written to a deployment, in call order.
    pub(crate) fn pause_calls(&self) -> Vec<bool> {
        self.state.lock().unwrap().pause_calls.clone()
    }

    pub(crate) fn status_writes(&self) -> u32 {
        self.state.lock().unwrap().status_writes
    }
}

fn not_found(kind: &'static str, key: &ObjectKey) -> Report<StoreError> {
    Report::new(StoreError::NotFound {
        kind,
        key: key.to_string(),
    })
}

fn conflict(kind: &'static str, key: &ObjectKey) -> Report<StoreError> {
    Report::new(StoreError::Conflict {
        kind,
        key: key.to_string(),
    })
}

fn injected(kind: &'static str, key: &ObjectKey) -> Report<StoreError> {
    Report::new(StoreError::Api {
        kind,
        key: key.to_string(),
        message: "injected failure".to_string(),
    })
}

/// Whether `labels` satisfy every requirement of `selector`.
pub(crate) fn selector_matches(
    selector: &LabelSelector,
    labels: &BTreeMap<String, String>,
) -> bool {
    let labels_match = selector
        .match_labels
        .iter()
        .flatten()
        .all(|(k, v)| labels.get(k) == Some(v));
    let expressions_match = selector.match_expressions.iter().flatten().all(|req| {
        let values = req.values.as_deref().unwrap_or_default();
        let current = labels.get(&req.key);
        match req.operator.as_str() {
            "In" => current.is_some_and(|v| values.contains(v)),
            "NotIn" => !current.is_some_and(|v| values.contains(v)),
            "Exists" => current.is_some(),
            "DoesNotExist" => current.is_none(),
            _ => false,
        }
    });
    labels_match && expressions_match
}

#[async_trait]
impl ObjectStore for FakeStore {
    async fn get_inplace_update(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<InplaceUpdate>, Report<StoreError>> {
        Ok(self.update(key))
    }

    async fn patch_inplace_update_annotations(
        &self,
        key: &ObjectKey,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), Report<StoreError>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_annotation_patch {
            return Err(injected("InplaceUpdate", key));
        }
        let version = state.next_version();
        let update = state
            .updates
            .get_mut(key)
            .ok_or_else(|| not_found("InplaceUpdate", key))?;
        update
            .annotations_mut()
            .extend(annotations.iter().map(|(k, v)| (k.clone(), v.clone())));
        update.metadata.resource_version = Some(version);
        Ok(())
    }

    async fn replace_inplace_update_status(
        &self,
        update: &InplaceUpdate,
    ) -> Result<(), Report<StoreError>> {
        let key = ObjectKey::of(update);
        let mut state = self.state.lock().unwrap();
        if state.status_conflicts > 0 {
            state.status_conflicts -= 1;
            // an external writer got there first
            let version = state.next_version();
            if let Some(stored) = state.updates.get_mut(&key) {
                stored.metadata.resource_version = Some(version);
            }
            return Err(conflict("InplaceUpdate", &key));
        }
        let version = state.next_version();
        let stored = state
            .updates
            .get_mut(&key)
            .ok_or_else(|| not_found("InplaceUpdate", &key))?;
        if stored.metadata.resource_version != update.metadata.resource_version {
            return Err(conflict("InplaceUpdate", &key));
        }
        stored.status = update.status.clone();
        stored.metadata.resource_version = Some(version);
        state.status_writes += 1;
        Ok(())
    }

    async fn get_deployment(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<Deployment>, Report<StoreError>> {
        Ok(self.deployment(key))
    }

    async fn set_deployment_paused(
        &self,
        key: &ObjectKey,
        paused: bool,
    ) -> Result<(), Report<StoreError>> {
        let mut state = self.state.lock().unwrap();
        state.pause_calls.push(paused);
        if !paused && state.fail_resume {
            return Err(injected("Deployment", key));
        }
        let deployment = state
            .deployments
            .get_mut(key)
            .ok_or_else(|| not_found("Deployment", key))?;
        deployment.spec.get_or_insert_with(Default::default).paused = Some(paused);
        Ok(())
    }

    async fn list_replica_sets(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ReplicaSet>, Report<StoreError>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .replica_sets
            .iter()
            .filter(|(key, rs)| key.namespace == namespace && selector_matches(selector, rs.labels()))
            .map(|(_, rs)| rs.clone())
            .collect())
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Pod>, Report<StoreError>> {
        let state = self.state.lock().unwrap();
        Ok(state
            .pods
            .iter()
            .filter(|(key, pod)| key.namespace == namespace && selector_matches(selector, pod.labels()))
            .map(|(_, pod)| pod.clone())
            .collect())
    }

    async fn replace_pod(&self, pod: &Pod) -> Result<(), Report<StoreError>> {
        let key = ObjectKey::of(pod);
        let mut state = self.state.lock().unwrap();
        if let Some(remaining) = state.pod_failures.get_mut(&key.name) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(injected("Pod", &key));
            }
        }
        let version = state.next_version();
        let stored = state
            .pods
            .get_mut(&key)
            .ok_or_else(|| not_found("Pod", &key))?;
        // pods accept unconditional updates
        if pod.metadata.resource_version.is_some()
            && stored.metadata.resource_version != pod.metadata.resource_version
        {
            return Err(conflict("Pod", &key));
        }
        let mut replaced = pod.clone();
        replaced.metadata.resource_version = Some(version);
        *stored = replaced;
        state.replaced_pods.push(key.name);
        Ok(())
    }
}

fn containers(images: &[(&str, &str)]) -> Vec<Container> {
    images
        .iter()
        .map(|(name, image)| Container {
            name: name.to_string(),
            image: Some(image.to_string()),
            ..Default::default()
        })
        .collect()
}

fn controller_ref(kind: &str, name: &str, uid: &str) -> OwnerReference {
    OwnerReference {
        api_version: "apps/v1".to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: uid.to_string(),
        controller: Some(true),
        block_owner_deletion: Some(true),
    }
}

/// A settled deployment in `default` whose pods carry `app=<name>`.
pub(crate) fn deployment(name: &str, replicas: i32, images: &[(&str, &str)]) -> Deployment {
    let labels = BTreeMap::from([("app".to_string(), name.to_string())]);
    Deployment {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some("default".to_string()),
            uid: Some(format!("uid-{name}")),
            generation: Some(1),
            annotations: Some(BTreeMap::from([(
                "deployment.kubernetes.io/revision".to_string(),
                REVISION.to_string(),
            )])),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(replicas),
            selector: LabelSelector {
                match_labels: Some(labels.clone()),
                match_expressions: None,
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: containers(images),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        status: Some(DeploymentStatus {
            observed_generation: Some(1),
            replicas: Some(replicas),
            updated_replicas: Some(replicas),
            available_replicas: Some(replicas),
            ready_replicas: Some(replicas),
            ..Default::default()
        }),
    }
}

/// The replica set `deployment` produced for its current template.
pub(crate) fn replica_set_for(deployment: &Deployment, hash: &str, age_secs: i64) -> ReplicaSet {
    let name = deployment.name_any();
    let spec = deployment.spec.clone().unwrap_or_default();
    let mut template = spec.template.clone();
    let template_meta = template.metadata.get_or_insert_with(Default::default);
    template_meta
        .labels
        .get_or_insert_with(Default::default)
        .insert("pod-template-hash".to_string(), hash.to_string());
    let labels = template_meta.labels.clone();
    let replicas = spec.replicas.unwrap_or(1);
    let rs_name = format!("{name}-{hash}");

    ReplicaSet {
        metadata: ObjectMeta {
            name: Some(rs_name.clone()),
            namespace: deployment.namespace(),
            uid: Some(format!("uid-{rs_name}")),
            labels,
            annotations: Some(BTreeMap::from([(
                "deployment.kubernetes.io/revision".to_string(),
                REVISION.to_string(),
            )])),
            owner_references: Some(vec![controller_ref(
                "Deployment",
                &name,
                deployment.uid().as_deref().unwrap_or_default(),
            )]),
            creation_timestamp: Some(Time(Utc::now() - ChronoDuration::seconds(age_secs))),
            ..Default::default()
        },
        spec: Some(ReplicaSetSpec {
            replicas: Some(replicas),
            selector: spec.selector.clone(),
            template: Some(template),
            ..Default::default()
        }),
        status: Some(ReplicaSetStatus {
            replicas,
            ..Default::default()
        }),
    }
}

/// Running pod number `index` of `replica_set`.
pub(crate) fn pod_for(replica_set: &ReplicaSet, index: usize) -> Pod {
    let rs_name = replica_set.name_any();
    let template = replica_set
        .spec
        .as_ref()
        .and_then(|s| s.template.clone())
        .unwrap_or_default();
    let pod_spec = template.spec.unwrap_or_default();
    let statuses = pod_spec
        .containers
        .iter()
        .map(|c| ContainerStatus {
            name: c.name.clone(),
            image: c.image.clone().unwrap_or_default(),
            image_id: format!("sha256:{}", c.name),
            ready: true,
            restart_count: 0,
            ..Default::default()
        })
        .collect();

    Pod {
        metadata: ObjectMeta {
            name: Some(format!("{rs_name}-{index}")),
            namespace: replica_set.namespace(),
            uid: Some(format!("uid-{rs_name}-{index}")),
            labels: template.metadata.and_then(|m| m.labels),
            owner_references: Some(vec![controller_ref(
                "ReplicaSet",
                &rs_name,
                replica_set.uid().as_deref().unwrap_or_default(),
            )]),
            resource_version: Some("1".to_string()),
            ..Default::default()
        },
        spec: Some(pod_spec),
        status: Some(PodStatus {
            phase: Some("Running".to_string()),
            container_statuses: Some(statuses),
            ..Default::default()
        }),
    }
}

/// A fresh request in `default` targeting the named deployment.
pub(crate) fn inplace_update(
    name: &str,
    target: &str,
    images: &[(&str, &str)],
    failure_policy: FailurePolicy,
) -> InplaceUpdate {
    let mut update = InplaceUpdate::new(
        name,
        InplaceUpdateSpec {
            target_ref: TargetReference {
                api_version: "apps/v1".to_string(),
                kind: "Deployment".to_string(),
                name: target.to_string(),
            },
            containers: images
                .iter()
                .map(|(name, image)| ContainerImage {
                    name: name.to_string(),
                    image: image.to_string(),
                })
                .collect(),
            rolling_update: false,
            max_unavailable: None,
            reclaim_policy: Default::default(),
            delay: None,
            failure_policy,
        },
    );
    update.metadata.namespace = Some("default".to_string());
    update.metadata.resource_version = Some("1".to_string());
    update
}

/// Seed a settled deployment with `replicas` pods under one replica set.
pub(crate) fn seed_workload(
    store: &FakeStore,
    name: &str,
    replicas: usize,
    images: &[(&str, &str)],
) -> (Deployment, ReplicaSet, Vec<Pod>) {
    let deployment = deployment(name, replicas as i32, images);
    let replica_set = replica_set_for(&deployment, "5d8f7b", 60);
    let pods: Vec<Pod> = (0..replicas).map(|i| pod_for(&replica_set, i)).collect();
    store.insert_deployment(deployment.clone());
    store.insert_replica_set(replica_set.clone());
    for pod in &pods {
        store.insert_pod(pod.clone());
    }
    (deployment, replica_set, pods)
}

#[cfg(test)]
mod tests {
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelectorRequirement;

    use super::*;

    #[test]
    fn selector_matching_honours_expressions() {
        let labels = BTreeMap::from([
            ("app".to_string(), "web".to_string()),
            ("env".to_string(), "prod".to_string()),
        ]);
        let selector = LabelSelector {
            match_labels: Some(BTreeMap::from([("app".to_string(), "web".to_string())])),
            match_expressions: Some(vec![
                LabelSelectorRequirement {
                    key: "env".to_string(),
                    operator: "In".to_string(),
                    values: Some(vec!["prod".to_string()]),
                },
                LabelSelectorRequirement {
                    key: "canary".to_string(),
                    operator: "DoesNotExist".to_string(),
                    values: None,
                },
            ]),
        };

        assert!(selector_matches(&selector, &labels));
        assert!(!selector_matches(
            &selector,
            &BTreeMap::from([("app".to_string(), "web".to_string())])
        ));
    }

    #[tokio::test]
    async fn stale_status_write_conflicts() {
        let store = FakeStore::new();
        let update = inplace_update("roll-web", "web", &[("app", "nginx:2")], FailurePolicy::Ignore);
        store.insert_update(update.clone());
        store
            .patch_inplace_update_annotations(&ObjectKey::of(&update), &BTreeMap::new())
            .await
            .unwrap();

        let err = store.replace_inplace_update_status(&update).await.unwrap_err();
        assert!(err.current_context().is_conflict());
    }
}

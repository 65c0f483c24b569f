//! Reconciliation of update requests that target a Deployment
//!
//! One pass walks the request through its state machine:
//! - Pending while the deployment is missing its rollout or being deleted
//! - Running once pods were submitted but not all replicas are updated
//! - Finished or Failed, after which the request is never touched again

use std::sync::Arc;
use std::time::Duration;

use api_types::ConditionStatus;
use api_types::ConditionType;
use api_types::FailurePolicy;
use api_types::InplaceUpdate;
use api_types::InplaceUpdateCondition;
use api_types::InplaceUpdateStatus;
use api_types::Phase;
use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use tokio::time::Instant;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::domain::reconcile::dispatcher::WorkloadControl;
use crate::domain::reconcile::patch::annotation_delta;
use crate::domain::reconcile::patch::find_container;
use crate::domain::reconcile::patch::find_containers;
use crate::domain::reconcile::patch::latest_container_statuses;
use crate::domain::reconcile::patch::patch_pod;
use crate::domain::reconcile::patch::patch_process;
use crate::domain::reconcile::patch::PodPatchSpec;
use crate::domain::reconcile::pod_updater::PodUpdater;
use crate::domain::reconcile::status_updater::StatusUpdater;
use crate::domain::reconcile::types::ReconcileError;
use crate::domain::reconcile::types::ReconcileOutcome;
use crate::domain::reconcile::types::SnapshotError;
use crate::domain::reconcile::workload::desired_replicas;
use crate::domain::reconcile::workload::deployment_complete;
use crate::domain::reconcile::workload::find_new_replica_set;
use crate::domain::reconcile::workload::is_controlled_by;
use crate::domain::reconcile::workload::is_deleting;
use crate::domain::reconcile::workload::is_paused;
use crate::domain::reconcile::workload::observed_replicas;
use crate::domain::reconcile::workload::replica_set_revision;
use crate::infrastructure::k8s::ObjectKey;
use crate::infrastructure::k8s::ObjectStore;
use crate::infrastructure::k8s::StoreError;

/// Tunables of a reconcile pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Backoff before revisiting a request that is waiting on its target
    pub requeue_after: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            requeue_after: Duration::from_secs(30),
        }
    }
}

/// Drives update requests whose target is a Deployment.
pub struct DeploymentControl {
    store: Arc<dyn ObjectStore>,
    pod_updater: PodUpdater,
    status_updater: StatusUpdater,
    config: ReconcileConfig,
    /// When each delayed request was first observed
    first_seen: DashMap<ObjectKey, Instant>,
}

impl DeploymentControl {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        pod_updater: PodUpdater,
        status_updater: StatusUpdater,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            store,
            pod_updater,
            status_updater,
            config,
            first_seen: DashMap::new(),
        }
    }

    /// Time left before a delayed request may start, if any.
    fn delay_remaining(&self, key: &ObjectKey, delay: Option<i32>, started: bool) -> Option<Duration> {
        let secs = delay.filter(|d| *d > 0)?;
        if started {
            self.first_seen.remove(key);
            return None;
        }
        let delay = Duration::from_secs(secs.unsigned_abs().into());
        let now = Instant::now();
        let first_seen = *self.first_seen.entry(key.clone()).or_insert(now);
        let remaining = delay.saturating_sub(now.duration_since(first_seen));
        if remaining.is_zero() {
            self.first_seen.remove(key);
            return None;
        }
        Some(remaining)
    }

    async fn commit(
        &self,
        key: &ObjectKey,
        status: &InplaceUpdateStatus,
    ) -> Result<(), Report<ReconcileError>> {
        self.status_updater
            .update(key, status)
            .await
            .change_context(ReconcileError::StatusCommit { key: key.clone() })
    }

    /// Take a consistent snapshot of the deployment's current pods and patch
    /// each of them.
    ///
    /// The deployment is paused while pods are listed, unless it already was,
    /// and resumed on every exit path.
    ///
    /// # Errors
    ///
    /// - [`SnapshotError::NoCurrentReplicaSet`] if no replica set matches the template
    /// - [`SnapshotError::ReplicaSetOutOfSync`] if a rollout is in flight
    /// - [`SnapshotError::PodCountMismatch`] if the pod list is stale
    /// - [`SnapshotError::Aborted`] if a pod failed to patch under the Abort policy
    /// - [`SnapshotError::Store`] if a cluster request failed
    async fn acquire_pods(
        &self,
        update: &InplaceUpdate,
        deployment: &Deployment,
        status: &mut InplaceUpdateStatus,
    ) -> Result<Vec<Pod>, Report<SnapshotError>> {
        let deployment_key = ObjectKey::of(deployment);
        let selector = deployment
            .spec
            .as_ref()
            .map(|s| s.selector.clone())
            .unwrap_or_default();
        let uid = deployment.uid().unwrap_or_default();
        let replica_sets: Vec<ReplicaSet> = self
            .store
            .list_replica_sets(&deployment_key.namespace, &selector)
            .await
            .change_context(SnapshotError::Store)?
            .into_iter()
            .filter(|rs| is_controlled_by(rs, &uid))
            .collect();

        let current = find_new_replica_set(deployment, &replica_sets).ok_or_else(|| {
            Report::new(SnapshotError::NoCurrentReplicaSet {
                deployment: deployment_key.clone(),
            })
        })?;
        let expected = desired_replicas(deployment);
        let actual = current
            .spec
            .as_ref()
            .and_then(|s| s.replicas)
            .unwrap_or(1);
        if actual != expected {
            return Err(Report::new(SnapshotError::ReplicaSetOutOfSync {
                deployment: deployment_key,
                expected,
                actual,
            }));
        }

        if is_paused(deployment) {
            return self.collect_patched_pods(update, current, status).await;
        }

        self.store
            .set_deployment_paused(&deployment_key, true)
            .await
            .change_context(SnapshotError::Store)?;
        debug!(deployment = %deployment_key, "paused deployment");

        let result = self.collect_patched_pods(update, current, status).await;

        match self.store.set_deployment_paused(&deployment_key, false).await {
            Ok(()) => debug!(deployment = %deployment_key, "resumed deployment"),
            Err(err) => error!(deployment = %deployment_key, "failed to resume deployment: {err:?}"),
        }
        result
    }

    async fn collect_patched_pods(
        &self,
        update: &InplaceUpdate,
        replica_set: &ReplicaSet,
        status: &mut InplaceUpdateStatus,
    ) -> Result<Vec<Pod>, Report<SnapshotError>> {
        let replica_set_key = ObjectKey::of(replica_set);
        let selector = replica_set
            .spec
            .as_ref()
            .map(|s| s.selector.clone())
            .unwrap_or_default();
        let uid = replica_set.uid().unwrap_or_default();
        let pods: Vec<Pod> = self
            .store
            .list_pods(&replica_set_key.namespace, &selector)
            .await
            .change_context(SnapshotError::Store)?
            .into_iter()
            .filter(|pod| is_controlled_by(pod, &uid))
            .collect();

        let observed = replica_set
            .status
            .as_ref()
            .map(|s| s.replicas)
            .unwrap_or_default();
        if i32::try_from(pods.len()).ok() != Some(observed) {
            return Err(Report::new(SnapshotError::PodCountMismatch {
                replica_set: replica_set_key,
                expected: observed,
                actual: pods.len(),
            }));
        }

        let names = update.spec.container_names();
        let revision = replica_set_revision(replica_set);
        let spec = PodPatchSpec {
            desired: &update.spec.containers,
            fallback_revision: &revision,
        };
        let now = Time(Utc::now());

        let mut patched = Vec::with_capacity(pods.len());
        let mut failures = Vec::new();
        for pod in &pods {
            let latest = latest_container_statuses(pod, &names);
            status.container_number += targeted_containers(pod, &names);
            match patch_pod(pod, latest, spec, now.clone()) {
                Ok(new_pod) => patched.push(new_pod),
                Err(err) => {
                    warn!(pod = %pod.name_any(), "failed to patch pod: {err:?}");
                    status.unavailable_replicas += 1;
                    failures.push(err.current_context().to_string());
                }
            }
        }
        status.replicas = patched.len() as i32;

        if !failures.is_empty() && update.spec.failure_policy == FailurePolicy::Abort {
            return Err(Report::new(SnapshotError::Aborted {
                failed: failures.len(),
                details: failures.join("; "),
            }));
        }
        Ok(patched)
    }

    /// Submit the patched pods and record which of them landed.
    async fn sync(
        &self,
        update: &InplaceUpdate,
        pods: Vec<Pod>,
        status: &mut InplaceUpdateStatus,
    ) -> Result<(), Report<StoreError>> {
        let outcome = self.pod_updater.update(pods).await;

        let names = update.spec.container_names();
        for pod in &outcome.finished {
            status.updated_container_number += targeted_containers(pod, &names);
        }

        let processed = patch_process(update, &outcome.finished, &outcome.failed);
        let changes = annotation_delta(update, &processed);
        if !changes.is_empty() {
            self.store
                .patch_inplace_update_annotations(&ObjectKey::of(update), &changes)
                .await?;
        }
        status.updated_replicas += outcome.finished.len() as i32;
        Ok(())
    }
}

#[async_trait]
impl WorkloadControl for DeploymentControl {
    #[tracing::instrument(skip_all, fields(request = %ObjectKey::of(update), target = %update.spec.target_ref.name))]
    async fn reconcile(
        &self,
        update: &InplaceUpdate,
    ) -> Result<ReconcileOutcome, Report<ReconcileError>> {
        let key = ObjectKey::of(update);
        if update.is_completed() {
            self.first_seen.remove(&key);
            debug!(phase = %update.phase(), "request already completed");
            return Ok(ReconcileOutcome::Done);
        }

        let previous = update.status.clone().unwrap_or_default();
        if let Some(wait) = self.delay_remaining(&key, update.spec.delay, previous.start_time.is_some()) {
            info!("request delayed, revisiting in {wait:?}");
            return Ok(ReconcileOutcome::RequeueAfter(wait));
        }

        let mut status = InplaceUpdateStatus {
            conditions: previous.conditions,
            start_time: previous.start_time.or_else(|| Some(Time(Utc::now()))),
            ..Default::default()
        };

        let deployment_key = ObjectKey::new(&key.namespace, &update.spec.target_ref.name);
        let Some(deployment) = self
            .store
            .get_deployment(&deployment_key)
            .await
            .change_context(ReconcileError::Target { key: key.clone() })?
        else {
            warn!(deployment = %deployment_key, "target deployment not found");
            fail(
                &mut status,
                ConditionType::FailedOwnerRef,
                "NotFound",
                format!("Deployment {deployment_key} not found"),
            );
            self.commit(&key, &status).await?;
            return Ok(ReconcileOutcome::Done);
        };

        if let Some(message) = precheck(&deployment) {
            info!(deployment = %deployment_key, "{message}, waiting");
            if update.is_running() {
                status.phase = Phase::Running;
                status.replicas = previous.replicas;
                status.updated_replicas = previous.updated_replicas;
                status.unavailable_replicas = previous.unavailable_replicas;
                status.container_number = previous.container_number;
                status.updated_container_number = previous.updated_container_number;
            } else {
                status.phase = Phase::Pending;
            }
            push_condition(
                &mut status,
                condition(ConditionType::FailedOwnerRef, "OwnerUnavailable", message),
            );
            self.commit(&key, &status).await?;
            return Ok(ReconcileOutcome::RequeueAfter(self.config.requeue_after));
        }

        let missing = missing_containers(update, &deployment);
        if !missing.is_empty() {
            warn!(deployment = %deployment_key, ?missing, "requested containers not in template");
            let message = missing
                .iter()
                .map(|name| format!("container {name} not found in deployment {deployment_key}"))
                .collect::<Vec<_>>()
                .join("; ");
            fail(&mut status, ConditionType::FailedPods, "NotFound", message);
            self.commit(&key, &status).await?;
            return Ok(ReconcileOutcome::Done);
        }

        let pods = match self.acquire_pods(update, &deployment, &mut status).await {
            Ok(pods) => pods,
            Err(err) => {
                warn!(deployment = %deployment_key, "pod snapshot failed: {err:?}");
                fail(&mut status, ConditionType::FailedPods, "Failed", format!("{err:#}"));
                self.commit(&key, &status).await?;
                return Ok(ReconcileOutcome::Done);
            }
        };

        let synced = self.sync(update, pods, &mut status).await;

        let total = observed_replicas(&deployment);
        if status.updated_replicas == total {
            status.phase = Phase::Finished;
            status.completion_time = Some(Time(Utc::now()));
        } else {
            status.phase = Phase::Running;
        }
        self.commit(&key, &status).await?;
        info!(
            phase = %status.phase,
            updated = status.updated_replicas,
            total,
            "reconcile pass committed"
        );

        if let Err(err) = synced {
            warn!("failed to record pod outcome: {err:?}");
            return Ok(ReconcileOutcome::RequeueAfter(self.config.requeue_after));
        }
        match status.phase {
            Phase::Finished => Ok(ReconcileOutcome::Done),
            _ => Ok(ReconcileOutcome::RequeueAfter(self.config.requeue_after)),
        }
    }

    fn forget(&self, key: &ObjectKey) {
        self.first_seen.remove(key);
    }
}

/// Reason the deployment cannot be operated on yet, if any.
fn precheck(deployment: &Deployment) -> Option<String> {
    if is_deleting(deployment) {
        return Some("deployment is being deleted".to_string());
    }
    if !deployment_complete(deployment) {
        return Some("deployment is not complete".to_string());
    }
    None
}

/// Requested container names absent from the deployment's pod template.
fn missing_containers(update: &InplaceUpdate, deployment: &Deployment) -> Vec<String> {
    let template = deployment
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref());
    update
        .spec
        .containers
        .iter()
        .filter(|target| template.and_then(|t| find_container(&target.name, t)).is_none())
        .map(|target| target.name.clone())
        .collect()
}

fn targeted_containers(pod: &Pod, names: &[String]) -> i32 {
    pod.spec
        .as_ref()
        .map(|spec| find_containers(names, spec).len() as i32)
        .unwrap_or_default()
}

fn condition(type_: ConditionType, reason: &str, message: String) -> InplaceUpdateCondition {
    InplaceUpdateCondition {
        type_,
        status: ConditionStatus::True,
        last_transition_time: Some(Time(Utc::now())),
        reason: reason.to_string(),
        message,
    }
}

/// Append `condition` unless it repeats the last recorded observation.
fn push_condition(status: &mut InplaceUpdateStatus, condition: InplaceUpdateCondition) {
    if status
        .conditions
        .last()
        .is_some_and(|last| last.same_observation(&condition))
    {
        return;
    }
    status.conditions.push(condition);
}

fn fail(status: &mut InplaceUpdateStatus, type_: ConditionType, reason: &str, message: String) {
    status.phase = Phase::Failed;
    status.completion_time = Some(Time(Utc::now()));
    push_condition(status, condition(type_, reason, message));
}

use std::collections::BTreeMap;

use api_types::InplaceUpdate;
use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::ReplicaSet;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::api::ListParams;
use kube::api::Patch;
use kube::api::PatchParams;
use kube::api::PostParams;
use kube::Api;
use kube::Client;
use serde_json::json;
use tracing::debug;

use crate::infrastructure::k8s::selector;
use crate::infrastructure::k8s::types::kube_report;
use crate::infrastructure::k8s::ObjectKey;
use crate::infrastructure::k8s::StoreError;

const INPLACE_UPDATE_KIND: &str = "InplaceUpdate";
const DEPLOYMENT_KIND: &str = "Deployment";
const REPLICA_SET_KIND: &str = "ReplicaSet";
const POD_KIND: &str = "Pod";

/// The cluster object store, the only I/O boundary of the reconciler.
///
/// Gets return `Ok(None)` for absent objects. Writes that lose an optimistic
/// concurrency race fail with [`StoreError::Conflict`].
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get_inplace_update(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<InplaceUpdate>, Report<StoreError>>;

    /// Merge the given annotations into the request's metadata.
    async fn patch_inplace_update_annotations(
        &self,
        key: &ObjectKey,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), Report<StoreError>>;

    /// Replace the status subresource, guarded by the object's resourceVersion.
    async fn replace_inplace_update_status(
        &self,
        update: &InplaceUpdate,
    ) -> Result<(), Report<StoreError>>;

    async fn get_deployment(&self, key: &ObjectKey)
        -> Result<Option<Deployment>, Report<StoreError>>;

    async fn set_deployment_paused(
        &self,
        key: &ObjectKey,
        paused: bool,
    ) -> Result<(), Report<StoreError>>;

    async fn list_replica_sets(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ReplicaSet>, Report<StoreError>>;

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Pod>, Report<StoreError>>;

    /// Replace a pod definition, guarded by the pod's resourceVersion.
    async fn replace_pod(&self, pod: &Pod) -> Result<(), Report<StoreError>>;
}

/// [`ObjectStore`] backed by the Kubernetes API server.
#[derive(Clone)]
pub struct KubeObjectStore {
    client: Client,
}

impl KubeObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn list_params(selector: &LabelSelector) -> Result<ListParams, Report<StoreError>> {
        let query = selector::to_query(selector)?;
        let params = ListParams::default();
        if query.is_empty() {
            Ok(params)
        } else {
            Ok(params.labels(&query))
        }
    }
}

#[async_trait]
impl ObjectStore for KubeObjectStore {
    async fn get_inplace_update(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<InplaceUpdate>, Report<StoreError>> {
        let api: Api<InplaceUpdate> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get_opt(&key.name)
            .await
            .map_err(|e| kube_report(e, INPLACE_UPDATE_KIND, key))
    }

    async fn patch_inplace_update_annotations(
        &self,
        key: &ObjectKey,
        annotations: &BTreeMap<String, String>,
    ) -> Result<(), Report<StoreError>> {
        let api: Api<InplaceUpdate> = Api::namespaced(self.client.clone(), &key.namespace);
        let patch = json!({ "metadata": { "annotations": annotations } });
        api.patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| kube_report(e, INPLACE_UPDATE_KIND, key))?;
        debug!(request = %key, count = annotations.len(), "patched request annotations");
        Ok(())
    }

    async fn replace_inplace_update_status(
        &self,
        update: &InplaceUpdate,
    ) -> Result<(), Report<StoreError>> {
        let key = ObjectKey::of(update);
        let api: Api<InplaceUpdate> = Api::namespaced(self.client.clone(), &key.namespace);
        let data = serde_json::to_vec(update).change_context(StoreError::Encode {
            kind: INPLACE_UPDATE_KIND,
            key: key.to_string(),
        })?;
        api.replace_status(&key.name, &PostParams::default(), data)
            .await
            .map_err(|e| kube_report(e, INPLACE_UPDATE_KIND, &key))?;
        Ok(())
    }

    async fn get_deployment(
        &self,
        key: &ObjectKey,
    ) -> Result<Option<Deployment>, Report<StoreError>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &key.namespace);
        api.get_opt(&key.name)
            .await
            .map_err(|e| kube_report(e, DEPLOYMENT_KIND, key))
    }

    async fn set_deployment_paused(
        &self,
        key: &ObjectKey,
        paused: bool,
    ) -> Result<(), Report<StoreError>> {
        let api: Api<Deployment> = Api::namespaced(self.client.clone(), &key.namespace);
        let patch = json!({ "spec": { "paused": paused } });
        api.patch(&key.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map_err(|e| kube_report(e, DEPLOYMENT_KIND, key))?;
        Ok(())
    }

    async fn list_replica_sets(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<ReplicaSet>, Report<StoreError>> {
        let api: Api<ReplicaSet> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&Self::list_params(selector)?)
            .await
            .map_err(|e| {
                kube_report(
                    e,
                    REPLICA_SET_KIND,
                    &ObjectKey::new(namespace, "*"),
                )
            })?;
        Ok(list.items)
    }

    async fn list_pods(
        &self,
        namespace: &str,
        selector: &LabelSelector,
    ) -> Result<Vec<Pod>, Report<StoreError>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        let list = api
            .list(&Self::list_params(selector)?)
            .await
            .map_err(|e| {
                kube_report(
                    e,
                    POD_KIND,
                    &ObjectKey::new(namespace, "*"),
                )
            })?;
        Ok(list.items)
    }

    async fn replace_pod(&self, pod: &Pod) -> Result<(), Report<StoreError>> {
        let key = ObjectKey::of(pod);
        let api: Api<Pod> = Api::namespaced(self.client.clone(), &key.namespace);
        api.replace(&key.name, &PostParams::default(), pod)
            .await
            .map_err(|e| kube_report(e, POD_KIND, &key))?;
        Ok(())
    }
}

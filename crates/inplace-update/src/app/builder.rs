use std::sync::Arc;

use anyhow::Result;

use crate::app::Application;
use crate::config::ControllerArgs;
use crate::domain::reconcile::DeploymentControl;
use crate::domain::reconcile::Dispatcher;
use crate::domain::reconcile::PodUpdater;
use crate::domain::reconcile::PodUpdaterConfig;
use crate::domain::reconcile::ReconcileConfig;
use crate::domain::reconcile::StatusBackoff;
use crate::domain::reconcile::StatusUpdater;
use crate::infrastructure::k8s::KubeObjectStore;
use crate::infrastructure::k8s::ObjectStore;
use crate::infrastructure::kube_client::init_kube_client;

/// Application builder
pub struct ApplicationBuilder {
    args: ControllerArgs,
}

impl ApplicationBuilder {
    pub fn new(args: ControllerArgs) -> Self {
        Self { args }
    }

    /// Build complete application
    pub async fn build(self) -> Result<Application> {
        tracing::info!("Building application components...");

        let client = init_kube_client(self.args.kubeconfig.clone())
            .await
            .map_err(|e| anyhow::anyhow!("{e:?}"))?;
        let store: Arc<dyn ObjectStore> = Arc::new(KubeObjectStore::new(client.clone()));
        let dispatcher = build_dispatcher(store, &self.args);

        Ok(Application::new(
            client,
            Arc::new(dispatcher),
            self.args.namespace.clone().filter(|ns| !ns.is_empty()),
            ReconcileConfig::from(&self.args),
        ))
    }
}

/// Registers one control per supported workload kind.
pub(crate) fn build_dispatcher(store: Arc<dyn ObjectStore>, args: &ControllerArgs) -> Dispatcher {
    let pod_updater = PodUpdater::new(store.clone(), PodUpdaterConfig::from(args));
    let status_updater = StatusUpdater::new(store.clone(), StatusBackoff::from(args));
    let deployment_control = DeploymentControl::new(
        store.clone(),
        pod_updater,
        status_updater,
        ReconcileConfig::from(args),
    );

    Dispatcher::new(store).with_control("Deployment", Arc::new(deployment_control))
}

use std::fmt;
use std::sync::Arc;

use anyhow::Result;
use api_types::InplaceUpdate;
use error_stack::Report;
use futures::StreamExt;
use kube::runtime::controller::Action;
use kube::runtime::watcher;
use kube::runtime::Controller;
use kube::Api;
use kube::Client;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::domain::reconcile::Dispatcher;
use crate::domain::reconcile::ReconcileConfig;
use crate::domain::reconcile::ReconcileError;
use crate::domain::reconcile::ReconcileOutcome;
use crate::infrastructure::k8s::ObjectKey;

/// Error handed to the kube runtime when a pass fails.
#[derive(Debug)]
pub struct ReconcileFailure(Report<ReconcileError>);

impl fmt::Display for ReconcileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#}", self.0)
    }
}

impl std::error::Error for ReconcileFailure {}

impl From<ReconcileOutcome> for Action {
    fn from(outcome: ReconcileOutcome) -> Self {
        match outcome {
            ReconcileOutcome::Done => Action::await_change(),
            ReconcileOutcome::RequeueAfter(delay) => Action::requeue(delay),
        }
    }
}

struct Context {
    dispatcher: Arc<Dispatcher>,
    config: ReconcileConfig,
}

async fn reconcile(update: Arc<InplaceUpdate>, ctx: Arc<Context>) -> Result<Action, ReconcileFailure> {
    let key = ObjectKey::of(update.as_ref());
    let outcome = ctx
        .dispatcher
        .reconcile(&key)
        .await
        .map_err(ReconcileFailure)?;
    Ok(outcome.into())
}

fn error_policy(update: Arc<InplaceUpdate>, error: &ReconcileFailure, ctx: Arc<Context>) -> Action {
    error!(
        request = %ObjectKey::of(update.as_ref()),
        "reconcile failed: {:?}",
        error.0
    );
    Action::requeue(ctx.config.requeue_after)
}

/// Application core structure with explicit dependencies
pub struct Application {
    client: Client,
    dispatcher: Arc<Dispatcher>,
    namespace: Option<String>,
    config: ReconcileConfig,
}

impl Application {
    pub fn new(
        client: Client,
        dispatcher: Arc<Dispatcher>,
        namespace: Option<String>,
        config: ReconcileConfig,
    ) -> Self {
        Self {
            client,
            dispatcher,
            namespace,
            config,
        }
    }

    /// Watch InplaceUpdate requests and reconcile them until SIGINT or SIGTERM.
    pub async fn run(&self) -> Result<()> {
        let api: Api<InplaceUpdate> = match &self.namespace {
            Some(namespace) => Api::namespaced(self.client.clone(), namespace),
            None => Api::all(self.client.clone()),
        };
        info!(namespace = ?self.namespace, "Starting InplaceUpdate controller");

        let context = Arc::new(Context {
            dispatcher: self.dispatcher.clone(),
            config: self.config,
        });
        Controller::new(api, watcher::Config::default())
            .shutdown_on_signal()
            .run(reconcile, error_policy, context)
            .for_each(|result| async move {
                match result {
                    Ok((object, action)) => {
                        debug!(request = %object.name, ?action, "reconciled");
                    }
                    Err(err) => warn!("controller event failed: {err}"),
                }
            })
            .await;

        info!("Controller stopped");
        Ok(())
    }
}

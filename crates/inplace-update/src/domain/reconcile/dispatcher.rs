use std::collections::HashMap;
use std::sync::Arc;

use api_types::InplaceUpdate;
use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use tracing::debug;
use tracing::warn;

use crate::domain::reconcile::types::ReconcileError;
use crate::domain::reconcile::types::ReconcileOutcome;
use crate::infrastructure::k8s::ObjectKey;
use crate::infrastructure::k8s::ObjectStore;

/// Reconciles update requests for one kind of workload.
#[async_trait]
pub trait WorkloadControl: Send + Sync {
    /// Run one reconcile pass for `update`.
    async fn reconcile(
        &self,
        update: &InplaceUpdate,
    ) -> Result<ReconcileOutcome, Report<ReconcileError>>;

    /// Drop any in-memory state kept for a request that no longer exists.
    fn forget(&self, _key: &ObjectKey) {}
}

/// Entry point of a reconcile pass: loads the request and hands it to the
/// control registered for its target kind.
pub struct Dispatcher {
    store: Arc<dyn ObjectStore>,
    controls: HashMap<String, Arc<dyn WorkloadControl>>,
}

impl Dispatcher {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            controls: HashMap::new(),
        }
    }

    /// Register `control` for requests targeting `kind`.
    pub fn with_control(mut self, kind: impl Into<String>, control: Arc<dyn WorkloadControl>) -> Self {
        self.controls.insert(kind.into(), control);
        self
    }

    /// # Errors
    ///
    /// - [`ReconcileError::Load`] if the request cannot be read
    /// - whatever the selected control reports
    #[tracing::instrument(skip(self), fields(request = %key))]
    pub async fn reconcile(&self, key: &ObjectKey) -> Result<ReconcileOutcome, Report<ReconcileError>> {
        let Some(update) = self
            .store
            .get_inplace_update(key)
            .await
            .change_context(ReconcileError::Load { key: key.clone() })?
        else {
            debug!("request no longer exists");
            for control in self.controls.values() {
                control.forget(key);
            }
            return Ok(ReconcileOutcome::Done);
        };

        let kind = update.spec.target_ref.kind.as_str();
        match self.controls.get(kind) {
            Some(control) => control.reconcile(&update).await,
            None => {
                warn!(kind, "no control registered for target kind, ignoring");
                Ok(ReconcileOutcome::Done)
            }
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use api_types::InplaceUpdateStatus;
use error_stack::Report;
use tracing::debug;

use crate::infrastructure::k8s::ObjectKey;
use crate::infrastructure::k8s::ObjectStore;
use crate::infrastructure::k8s::StoreError;

/// Exponential backoff between status write attempts that lost a version race.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusBackoff {
    /// Total attempts, including the first one
    pub steps: u32,
    pub initial: Duration,
    pub factor: f64,
}

impl Default for StatusBackoff {
    fn default() -> Self {
        Self {
            steps: 4,
            initial: Duration::from_millis(10),
            factor: 5.0,
        }
    }
}

/// Writes computed status through the status subresource.
pub struct StatusUpdater {
    store: Arc<dyn ObjectStore>,
    backoff: StatusBackoff,
}

impl StatusUpdater {
    pub fn new(store: Arc<dyn ObjectStore>, backoff: StatusBackoff) -> Self {
        Self { store, backoff }
    }

    /// Re-read the request, apply `status` and write it back.
    ///
    /// The whole read-modify-write cycle is retried on conflict until the
    /// backoff is exhausted.
    ///
    /// # Errors
    ///
    /// - [`StoreError::NotFound`] if the request disappeared
    /// - [`StoreError::Conflict`] if every attempt lost the race
    /// - any other store error, immediately
    #[tracing::instrument(skip(self, status), fields(request = %key, phase = %status.phase))]
    pub async fn update(
        &self,
        key: &ObjectKey,
        status: &InplaceUpdateStatus,
    ) -> Result<(), Report<StoreError>> {
        let mut delay = self.backoff.initial;
        let mut attempt = 1;
        loop {
            let mut current = self.store.get_inplace_update(key).await?.ok_or_else(|| {
                Report::new(StoreError::NotFound {
                    kind: "InplaceUpdate",
                    key: key.to_string(),
                })
            })?;
            current.status = Some(status.clone());

            match self.store.replace_inplace_update_status(&current).await {
                Ok(()) => return Ok(()),
                Err(err) if err.current_context().is_conflict() && attempt < self.backoff.steps => {
                    debug!(attempt, "status write conflicted, retrying in {delay:?}");
                    tokio::time::sleep(delay).await;
                    delay = delay.mul_f64(self.backoff.factor);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

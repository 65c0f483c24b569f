use std::sync::Arc;
use std::time::Duration;

use futures::stream;
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use tracing::debug;
use tracing::warn;

use crate::infrastructure::k8s::ObjectKey;
use crate::infrastructure::k8s::ObjectStore;

/// Tunables for [`PodUpdater`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PodUpdaterConfig {
    /// Total submission attempts per pod before it is counted as failed
    pub retry_limit: u32,
    /// Fixed pause between two attempts on the same pod
    pub retry_delay: Duration,
    /// Upper bound on concurrent submissions
    pub workers: usize,
}

impl Default for PodUpdaterConfig {
    fn default() -> Self {
        Self {
            retry_limit: 3,
            retry_delay: Duration::from_secs(5),
            workers: 16,
        }
    }
}

/// Partition of the submitted pods; together they hold every input pod.
#[derive(Debug, Default)]
pub struct UpdateOutcome {
    pub finished: Vec<Pod>,
    pub failed: Vec<Pod>,
}

/// Submits patched pods concurrently with bounded per-pod retry.
pub struct PodUpdater {
    store: Arc<dyn ObjectStore>,
    config: PodUpdaterConfig,
}

impl PodUpdater {
    pub fn new(store: Arc<dyn ObjectStore>, config: PodUpdaterConfig) -> Self {
        Self { store, config }
    }

    /// Replace every pod in the cluster and wait until each one either
    /// landed or ran out of attempts.
    ///
    /// Failures are only reported through [`UpdateOutcome::failed`].
    #[tracing::instrument(skip_all, fields(pods = pods.len()))]
    pub async fn update(&self, pods: Vec<Pod>) -> UpdateOutcome {
        let results: Vec<(Pod, bool)> = stream::iter(pods)
            .map(|pod| async move {
                let landed = self.submit(&pod).await;
                (pod, landed)
            })
            .buffered(self.config.workers.max(1))
            .collect()
            .await;

        let mut outcome = UpdateOutcome::default();
        for (pod, landed) in results {
            if landed {
                outcome.finished.push(pod);
            } else {
                outcome.failed.push(pod);
            }
        }
        debug!(
            finished = outcome.finished.len(),
            failed = outcome.failed.len(),
            "pod submission completed"
        );
        outcome
    }

    /// Attempts are counted per submission, so concurrent calls carrying the
    /// same pod each get the full retry budget.
    async fn submit(&self, pod: &Pod) -> bool {
        let key = ObjectKey::of(pod);
        let mut failures = 0;
        loop {
            let err = match self.store.replace_pod(pod).await {
                Ok(()) => {
                    debug!(pod = %key, "pod replaced");
                    return true;
                }
                Err(err) => err,
            };

            failures += 1;
            if failures >= self.config.retry_limit {
                warn!(pod = %key, attempts = failures, "giving up on pod: {err:?}");
                return false;
            }
            debug!(pod = %key, attempt = failures, "pod replace failed, retrying: {err}");
            tokio::time::sleep(self.config.retry_delay).await;
        }
    }
}

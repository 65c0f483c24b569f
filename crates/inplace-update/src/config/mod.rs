use std::time::Duration;

use crate::domain::reconcile::PodUpdaterConfig;
use crate::domain::reconcile::ReconcileConfig;
use crate::domain::reconcile::StatusBackoff;

pub mod cli;
pub mod controller;

impl From<&controller::ControllerArgs> for ReconcileConfig {
    fn from(args: &controller::ControllerArgs) -> Self {
        Self {
            requeue_after: Duration::from_secs(args.requeue_after_secs),
        }
    }
}

impl From<&controller::ControllerArgs> for PodUpdaterConfig {
    fn from(args: &controller::ControllerArgs) -> Self {
        Self {
            retry_limit: args.pod_retry_limit.max(1),
            retry_delay: Duration::from_secs(args.pod_retry_delay_secs),
            workers: args.update_workers.max(1),
        }
    }
}

impl From<&controller::ControllerArgs> for StatusBackoff {
    fn from(args: &controller::ControllerArgs) -> Self {
        Self {
            steps: args.status_retry_steps.max(1),
            initial: Duration::from_millis(args.status_retry_initial_ms),
            factor: args.status_retry_factor.max(1.0),
        }
    }
}

pub use cli::*;
pub use controller::*;

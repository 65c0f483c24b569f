//! Reconciliation of in-place update requests
//!
//! The main components are:
//! - [`Dispatcher`]: loads a request and routes it by target kind
//! - [`DeploymentControl`]: the state machine for Deployment targets
//! - [`PodUpdater`]: concurrent pod submission with bounded retry
//! - [`StatusUpdater`]: conflict-retrying status writes

pub mod deployment;
pub mod dispatcher;
pub mod patch;
pub mod pod_updater;
pub mod status_updater;
pub mod types;
pub mod workload;

pub use deployment::DeploymentControl;
pub use deployment::ReconcileConfig;
pub use dispatcher::Dispatcher;
pub use dispatcher::WorkloadControl;
pub use pod_updater::PodUpdater;
pub use pod_updater::PodUpdaterConfig;
pub use status_updater::StatusBackoff;
pub use status_updater::StatusUpdater;
pub use types::ReconcileError;
pub use types::ReconcileOutcome;

//! Kubernetes integration module.
//!
//! The main components are:
//! - [`ObjectStore`]: the async boundary through which the reconciler reads and writes cluster objects
//! - [`KubeObjectStore`]: the API server backed implementation
//! - [`StoreError`]: the error taxonomy shared by every store implementation

#[cfg(test)]
pub(crate) mod fake;
pub(crate) mod selector;
pub mod store;
pub mod types;

pub use store::KubeObjectStore;
pub use store::ObjectStore;
pub use types::ObjectKey;
pub use types::StoreError;

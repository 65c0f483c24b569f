//! Application module
//!
//! Wires the object store, the reconcile components and the kube-runtime
//! controller together and drives them until shutdown.

pub mod builder;
pub mod core;

pub use builder::ApplicationBuilder;
pub use core::Application;

use core::error::Error;
use std::fmt;

use error_stack::Report;
use kube::ResourceExt;

/// Namespaced identity of a Kubernetes object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub namespace: String,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Key of an existing object; cluster scoped objects get an empty namespace.
    pub fn of<K: ResourceExt>(obj: &K) -> Self {
        Self {
            namespace: obj.namespace().unwrap_or_default(),
            name: obj.name_any(),
        }
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Errors that can occur during Kubernetes operations.
#[derive(Debug, derive_more::Display)]
pub enum StoreError {
    #[display("Failed to connect to Kubernetes API: {message}")]
    ConnectionFailed { message: String },
    #[display("Resource version conflict on {kind} {key}")]
    Conflict { kind: &'static str, key: String },
    #[display("{kind} {key} not found")]
    NotFound { kind: &'static str, key: String },
    #[display("Request for {kind} {key} failed: {message}")]
    Api {
        kind: &'static str,
        key: String,
        message: String,
    },
    #[display("Invalid label selector: {message}")]
    InvalidSelector { message: String },
    #[display("Failed to encode {kind} {key}")]
    Encode { kind: &'static str, key: String },
}

impl StoreError {
    /// Whether the write lost an optimistic concurrency race and may be retried.
    pub const fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }

    /// Maps a client error onto the store error taxonomy.
    pub(crate) fn from_kube(err: &kube::Error, kind: &'static str, key: &ObjectKey) -> Self {
        let key = key.to_string();
        match err {
            kube::Error::Api(response) if response.code == 409 => StoreError::Conflict { kind, key },
            kube::Error::Api(response) if response.code == 404 => StoreError::NotFound { kind, key },
            other => StoreError::Api {
                kind,
                key,
                message: other.to_string(),
            },
        }
    }
}

impl Error for StoreError {}

/// Wraps a client error in a report whose context classifies it.
pub(crate) fn kube_report(err: kube::Error, kind: &'static str, key: &ObjectKey) -> Report<StoreError> {
    let context = StoreError::from_kube(&err, kind, key);
    Report::new(err).change_context(context)
}

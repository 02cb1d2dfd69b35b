//! Cluster store errors

use thiserror::Error;

/// Errors that can occur when reading or writing the persisted records
#[derive(Debug, Error)]
pub enum StoreError {
    /// Kubernetes API or transport error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Backend unreachable (raised by non-Kubernetes stores)
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Create raced with another writer that created the resource first
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Write rejected because the resource version is stale
    #[error("Conflict: {0}")]
    Conflict(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Server rejected the object or patch as invalid
    #[error("Invalid object: {0}")]
    InvalidObject(String),
}

impl StoreError {
    /// True for optimistic-concurrency conflicts, the only retryable write failure.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }

    /// True when a create lost the race to an existing object.
    #[must_use]
    pub fn is_already_exists(&self) -> bool {
        matches!(self, StoreError::AlreadyExists(_))
    }

    /// Sorts a raw kube error into the store taxonomy.
    ///
    /// 404 becomes `NotFound`, 409 `AlreadyExists` or `Conflict` depending on
    /// the status reason, 422 `InvalidObject`. Everything else (transport,
    /// auth, 5xx) stays a `Kube` error.
    pub(crate) fn from_kube(err: kube::Error, what: &str) -> Self {
        let (code, reason) = match &err {
            kube::Error::Api(status) => (status.code, status.reason.clone()),
            _ => (0, String::new()),
        };
        match code {
            404 => StoreError::NotFound(what.to_string()),
            409 if reason == "AlreadyExists" => StoreError::AlreadyExists(what.to_string()),
            409 => StoreError::Conflict(format!("{what}: {err}")),
            422 => StoreError::InvalidObject(format!("{what}: {err}")),
            _ => StoreError::Kube(err),
        }
    }
}

//! Controller-specific error types.
//!
//! This module defines the error taxonomy of the retention engine. Decode and
//! parse failures (`MalformedEntry`, `InvalidAddressLiteral`) are built only to
//! be logged; batch operations skip the offending entry and carry on.
//! Filtering an admission event out is not an error at all, see
//! `ReserveOutcome::FilteredOut`.

use cluster_store::StoreError;
use std::time::Duration;
use thiserror::Error;

/// Errors decoding a tracking token.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Token did not split into namespace, name, node and timestamp
    #[error("tracking token {token:?} has {fields} fields, expected 4")]
    MalformedToken { token: String, fields: usize },

    /// Timestamp segment does not follow the fixed layout
    #[error("tracking token timestamp {timestamp:?} is invalid: {reason}")]
    BadTimestamp { timestamp: String, reason: String },
}

/// Errors that can occur in the IP Reserve Controller.
#[derive(Debug, Error)]
pub enum ControllerError {
    /// Tracking entry could not be decoded (skipped for this cycle)
    #[error("Malformed tracking entry for {address}: {source}")]
    MalformedEntry {
        address: String,
        #[source]
        source: CodecError,
    },

    /// Address or CIDR literal could not be parsed (skipped)
    #[error("Invalid address literal: {0:?}")]
    InvalidAddressLiteral(String),

    /// Optimistic-concurrency conflict that outlived the retry schedule
    #[error("Concurrent modification after {attempts} attempt(s): {source}")]
    ConcurrentModification {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// Backing store failure other than a conflict
    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    /// Store call exceeded its deadline
    #[error("Store call timed out after {0:?}")]
    Timeout(Duration),

    /// The pod named by an admission request does not exist
    #[error("Instance not found: {0}")]
    InstanceNotFound(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Kubernetes client construction error
    #[error("Kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    /// Serving certificate could not be loaded
    #[error("TLS error: {0}")]
    Tls(String),

    /// Listener or socket error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Background task stopped
    #[error("Task failed: {0}")]
    Task(String),
}

impl From<StoreError> for ControllerError {
    fn from(err: StoreError) -> Self {
        if err.is_conflict() {
            ControllerError::ConcurrentModification {
                attempts: 1,
                source: err,
            }
        } else {
            ControllerError::StoreUnavailable(err)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_conflict_maps_to_concurrent_modification() {
        let err = ControllerError::from(StoreError::Conflict("stale".to_string()));
        assert!(matches!(err, ControllerError::ConcurrentModification { attempts: 1, .. }));
    }

    #[test]
    fn test_other_store_errors_map_to_unavailable() {
        let err = ControllerError::from(StoreError::Unavailable("refused".to_string()));
        assert!(matches!(err, ControllerError::StoreUnavailable(_)));
    }
}

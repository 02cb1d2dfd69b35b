//! ClusterStoreTrait for mocking
//!
//! This trait abstracts the Kubernetes-backed store to enable mocking in unit tests.
//! The concrete ClusterStore implements this trait, and tests use MockClusterStore.

use crate::error::StoreError;
use crate::models::{ReservationRecord, TrackingRecord, WorkloadInstance};
use std::collections::BTreeMap;

/// Backing store operations used by the retention engine
///
/// Both records are singletons whose identity is fixed when the store is built.
/// The reserve path only uses the append/merge verbs; the release path uses
/// whole-record updates guarded by the record's resource version.
/// All async methods must be `Send` to work with Tokio's work-stealing runtime.
#[async_trait::async_trait]
pub trait ClusterStoreTrait: Send + Sync {
    // Tracking record (address -> owner/timestamp token)
    async fn get_tracking(&self) -> Result<Option<TrackingRecord>, StoreError>;
    async fn create_tracking(&self, record: &TrackingRecord) -> Result<TrackingRecord, StoreError>;
    /// Merge patch that only touches the keys in `entries`
    async fn merge_tracking(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError>;
    async fn update_tracking(&self, record: &TrackingRecord) -> Result<TrackingRecord, StoreError>;

    // Reservation record (ordered do-not-reuse list)
    async fn get_reservation(&self) -> Result<Option<ReservationRecord>, StoreError>;
    async fn create_reservation(&self, record: &ReservationRecord) -> Result<ReservationRecord, StoreError>;
    /// Append-only JSON patch; never rewrites existing entries
    async fn append_reservation(&self, addresses: &[String]) -> Result<(), StoreError>;
    async fn update_reservation(&self, record: &ReservationRecord) -> Result<ReservationRecord, StoreError>;

    // Read-only lookups for admission filtering
    async fn namespace_labels(&self, namespace: &str) -> Result<Option<BTreeMap<String, String>>, StoreError>;
    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Option<WorkloadInstance>, StoreError>;
}

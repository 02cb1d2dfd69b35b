//! Mock ClusterStore for unit testing
//!
//! This module provides an in-memory implementation of ClusterStoreTrait that can be
//! used in unit tests without a running API server.
//!
//! The mock is organized into modules:
//! - `records.rs` - tracking and reservation record verbs
//! - `workloads.rs` - namespace and pod lookups
//!
//! Every write bumps a store-wide resource version, and whole-record updates
//! carrying a stale version are rejected with `StoreError::Conflict`, the same
//! way the API server behaves.

mod records;
mod workloads;

use crate::error::StoreError;
use crate::models::{ReservationRecord, TrackingRecord, WorkloadInstance};
use crate::store_trait::ClusterStoreTrait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

/// Merge and append patches from a concurrent reserve
#[derive(Debug, Clone, Default)]
pub(crate) struct InterleavedWrites {
    tracking: BTreeMap<String, String>,
    reserved: Vec<String>,
}

/// Mock ClusterStore for testing
///
/// Clones share state, so a test can keep a handle while the engine owns another.
#[derive(Clone, Debug, Default)]
pub struct MockClusterStore {
    pub(crate) tracking: Arc<Mutex<Option<TrackingRecord>>>,
    pub(crate) reservation: Arc<Mutex<Option<ReservationRecord>>>,
    pub(crate) namespaces: Arc<Mutex<HashMap<String, BTreeMap<String, String>>>>,
    pub(crate) instances: Arc<Mutex<HashMap<(String, String), WorkloadInstance>>>,
    // Counter for generating resource versions
    pub(crate) version: Arc<Mutex<u64>>,
    // Number of upcoming whole-record updates to reject with a conflict
    pub(crate) injected_conflicts: Arc<Mutex<u32>>,
    // Writes by another client, applied just before the next whole-record update
    pub(crate) interleaved: Arc<Mutex<Option<InterleavedWrites>>>,
    // When set, every call fails as if the API server were unreachable
    pub(crate) unavailable: Arc<Mutex<bool>>,
    // Verb log, e.g. "update_reservation"
    pub(crate) calls: Arc<Mutex<Vec<&'static str>>>,
}

impl MockClusterStore {
    /// Create an empty mock store (neither record exists yet)
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the tracking record (for test setup)
    pub fn set_tracking(&self, data: BTreeMap<String, String>) {
        let version = self.next_version();
        *self.tracking.lock().unwrap() = Some(TrackingRecord {
            data,
            resource_version: Some(version),
            ..TrackingRecord::default()
        });
    }

    /// Seed the reservation record (for test setup)
    pub fn set_reservation(&self, reserved_cidrs: Vec<String>) {
        let version = self.next_version();
        *self.reservation.lock().unwrap() = Some(ReservationRecord {
            reserved_cidrs,
            resource_version: Some(version),
            ..ReservationRecord::default()
        });
    }

    /// Add a namespace with labels (for test setup)
    pub fn add_namespace(&self, name: &str, labels: BTreeMap<String, String>) {
        self.namespaces.lock().unwrap().insert(name.to_string(), labels);
    }

    /// Add a workload instance (for test setup)
    pub fn add_instance(&self, instance: WorkloadInstance) {
        self.instances
            .lock()
            .unwrap()
            .insert((instance.namespace.clone(), instance.name.clone()), instance);
    }

    /// Reject the next `count` whole-record updates with a conflict
    pub fn inject_conflicts(&self, count: u32) {
        *self.injected_conflicts.lock().unwrap() = count;
    }

    /// Apply `tracking` as a merge and `reserved` as an append right before the
    /// next whole-record update, as if another writer got in between the
    /// caller's read and its write. Fires once.
    pub fn interleave_before_next_update(&self, tracking: BTreeMap<String, String>, reserved: Vec<String>) {
        *self.interleaved.lock().unwrap() = Some(InterleavedWrites { tracking, reserved });
    }

    /// Make every call fail with `StoreError::Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        *self.unavailable.lock().unwrap() = unavailable;
    }

    /// Current tracking data, if the record exists
    pub fn tracking_data(&self) -> Option<BTreeMap<String, String>> {
        self.tracking.lock().unwrap().as_ref().map(|r| r.data.clone())
    }

    /// Current reservation list, if the record exists
    pub fn reserved_cidrs(&self) -> Option<Vec<String>> {
        self.reservation
            .lock()
            .unwrap()
            .as_ref()
            .map(|r| r.reserved_cidrs.clone())
    }

    /// Number of times `verb` was called
    pub fn call_count(&self, verb: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| **c == verb).count()
    }

    /// Generate next resource version
    pub(crate) fn next_version(&self) -> String {
        let mut version = self.version.lock().unwrap();
        *version += 1;
        version.to_string()
    }

    /// Log the call and fail if the store is marked unavailable
    pub(crate) fn enter(&self, verb: &'static str) -> Result<(), StoreError> {
        self.calls.lock().unwrap().push(verb);
        if *self.unavailable.lock().unwrap() {
            return Err(StoreError::Unavailable(format!("{verb}: connection refused")));
        }
        Ok(())
    }

    /// Apply pending interleaved writes, if any, bumping each record's version
    pub(crate) fn run_interleaved_writes(&self) {
        let Some(writes) = self.interleaved.lock().unwrap().take() else {
            return;
        };
        if !writes.tracking.is_empty() {
            let version = self.next_version();
            if let Some(record) = self.tracking.lock().unwrap().as_mut() {
                record.data.extend(writes.tracking);
                record.resource_version = Some(version);
            }
        }
        if !writes.reserved.is_empty() {
            let version = self.next_version();
            if let Some(record) = self.reservation.lock().unwrap().as_mut() {
                record.reserved_cidrs.extend(writes.reserved);
                record.resource_version = Some(version);
            }
        }
    }

    /// Consume one injected conflict, if any are pending
    pub(crate) fn take_injected_conflict(&self) -> bool {
        let mut pending = self.injected_conflicts.lock().unwrap();
        if *pending > 0 {
            *pending -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait::async_trait]
impl ClusterStoreTrait for MockClusterStore {
    // Record verbs - delegated to records module
    async fn get_tracking(&self) -> Result<Option<TrackingRecord>, StoreError> {
        records::get_tracking(self).await
    }

    async fn create_tracking(&self, record: &TrackingRecord) -> Result<TrackingRecord, StoreError> {
        records::create_tracking(self, record).await
    }

    async fn merge_tracking(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        records::merge_tracking(self, entries).await
    }

    async fn update_tracking(&self, record: &TrackingRecord) -> Result<TrackingRecord, StoreError> {
        records::update_tracking(self, record).await
    }

    async fn get_reservation(&self) -> Result<Option<ReservationRecord>, StoreError> {
        records::get_reservation(self).await
    }

    async fn create_reservation(&self, record: &ReservationRecord) -> Result<ReservationRecord, StoreError> {
        records::create_reservation(self, record).await
    }

    async fn append_reservation(&self, addresses: &[String]) -> Result<(), StoreError> {
        records::append_reservation(self, addresses).await
    }

    async fn update_reservation(&self, record: &ReservationRecord) -> Result<ReservationRecord, StoreError> {
        records::update_reservation(self, record).await
    }

    // Lookups - delegated to workloads module
    async fn namespace_labels(&self, namespace: &str) -> Result<Option<BTreeMap<String, String>>, StoreError> {
        workloads::namespace_labels(self, namespace).await
    }

    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Option<WorkloadInstance>, StoreError> {
        workloads::get_instance(self, namespace, name).await
    }
}

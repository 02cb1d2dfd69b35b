//! Kubernetes-backed cluster store
//!
//! The tracking record is a ConfigMap, the reservation record a Calico
//! IPReservation. Both are addressed by fixed identities handed in at
//! construction time.

use crate::error::StoreError;
use crate::models::{RecordRef, ReservationRecord, TrackingRecord, WorkloadInstance};
use crate::store_trait::ClusterStoreTrait;
use crds::{IPReservation, RESERVED_CIDRS_PATH};
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Pod};
use kube::api::{Api, Patch, PatchParams, PostParams};
use kube::Client;
use std::collections::BTreeMap;
use tracing::debug;

/// Cluster store backed by the Kubernetes API
pub struct ClusterStore {
    client: Client,
    config_maps: Api<ConfigMap>,
    reservations: Api<IPReservation>,
    namespaces: Api<Namespace>,
    tracking: RecordRef,
    reservation_name: String,
}

impl ClusterStore {
    /// Create a new cluster store
    ///
    /// # Arguments
    /// * `client` - Kubernetes client
    /// * `tracking` - name/namespace of the tracking ConfigMap
    /// * `reservation_name` - name of the cluster-scoped IPReservation
    pub fn new(client: Client, tracking: RecordRef, reservation_name: impl Into<String>) -> Self {
        Self {
            config_maps: Api::namespaced(client.clone(), &tracking.namespace),
            reservations: Api::all(client.clone()),
            namespaces: Api::all(client.clone()),
            client,
            tracking,
            reservation_name: reservation_name.into(),
        }
    }

    /// Identity of the tracking ConfigMap
    pub fn tracking_ref(&self) -> &RecordRef {
        &self.tracking
    }

    fn reservation_what(&self) -> String {
        format!("IPReservation {}", self.reservation_name)
    }

    fn tracking_what(&self) -> String {
        format!("ConfigMap {}", self.tracking)
    }
}

/// Object sent when writing the tracking record.
///
/// Starts from the metadata the record was read with, so replacing the
/// ConfigMap only changes `data` and the identity fields it must carry.
pub fn tracking_object(tracking: &RecordRef, record: &TrackingRecord) -> ConfigMap {
    let mut metadata = record.metadata.clone();
    metadata.name = Some(tracking.name.clone());
    metadata.namespace = Some(tracking.namespace.clone());
    metadata.resource_version = record.resource_version.clone();
    ConfigMap {
        metadata,
        data: (!record.data.is_empty()).then(|| record.data.clone()),
        binary_data: record.binary_data.clone(),
        ..Default::default()
    }
}

/// Object sent when writing the reservation record; only the spec is rebuilt.
pub fn reservation_object(name: &str, record: &ReservationRecord) -> IPReservation {
    let mut reservation = IPReservation::with_cidrs(name, record.reserved_cidrs.clone());
    let mut metadata = record.metadata.clone();
    metadata.name = Some(name.to_string());
    metadata.resource_version = record.resource_version.clone();
    reservation.metadata = metadata;
    reservation
}

/// JSON patch appending each address to the end of the reserved list.
///
/// `add .../-` needs the list to exist, which is why the reservation record
/// always carries a sentinel entry.
pub fn append_patch(addresses: &[String]) -> serde_json::Value {
    let ops: Vec<serde_json::Value> = addresses
        .iter()
        .map(|address| {
            serde_json::json!({
                "op": "add",
                "path": format!("{RESERVED_CIDRS_PATH}/-"),
                "value": address,
            })
        })
        .collect();
    serde_json::Value::Array(ops)
}

#[async_trait::async_trait]
impl ClusterStoreTrait for ClusterStore {
    async fn get_tracking(&self) -> Result<Option<TrackingRecord>, StoreError> {
        debug!("GET {}", self.tracking_what());
        self.config_maps
            .get_opt(&self.tracking.name)
            .await
            .map(|found| found.map(TrackingRecord::from))
            .map_err(|e| StoreError::from_kube(e, &self.tracking_what()))
    }

    async fn create_tracking(&self, record: &TrackingRecord) -> Result<TrackingRecord, StoreError> {
        debug!("CREATE {}", self.tracking_what());
        let mut object = tracking_object(&self.tracking, record);
        object.metadata.resource_version = None;
        self.config_maps
            .create(&PostParams::default(), &object)
            .await
            .map(TrackingRecord::from)
            .map_err(|e| StoreError::from_kube(e, &self.tracking_what()))
    }

    async fn merge_tracking(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        debug!("PATCH {} ({} keys)", self.tracking_what(), entries.len());
        let patch = serde_json::json!({ "data": entries });
        self.config_maps
            .patch(&self.tracking.name, &PatchParams::default(), &Patch::Merge(&patch))
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(e, &self.tracking_what()))
    }

    async fn update_tracking(&self, record: &TrackingRecord) -> Result<TrackingRecord, StoreError> {
        debug!("UPDATE {} at version {:?}", self.tracking_what(), record.resource_version);
        let object = tracking_object(&self.tracking, record);
        self.config_maps
            .replace(&self.tracking.name, &PostParams::default(), &object)
            .await
            .map(TrackingRecord::from)
            .map_err(|e| StoreError::from_kube(e, &self.tracking_what()))
    }

    async fn get_reservation(&self) -> Result<Option<ReservationRecord>, StoreError> {
        debug!("GET {}", self.reservation_what());
        self.reservations
            .get_opt(&self.reservation_name)
            .await
            .map(|found| found.map(ReservationRecord::from))
            .map_err(|e| StoreError::from_kube(e, &self.reservation_what()))
    }

    async fn create_reservation(&self, record: &ReservationRecord) -> Result<ReservationRecord, StoreError> {
        debug!("CREATE {}", self.reservation_what());
        let mut object = reservation_object(&self.reservation_name, record);
        object.metadata.resource_version = None;
        self.reservations
            .create(&PostParams::default(), &object)
            .await
            .map(ReservationRecord::from)
            .map_err(|e| StoreError::from_kube(e, &self.reservation_what()))
    }

    async fn append_reservation(&self, addresses: &[String]) -> Result<(), StoreError> {
        if addresses.is_empty() {
            return Ok(());
        }
        debug!("PATCH {} appending {:?}", self.reservation_what(), addresses);
        let patch: json_patch::Patch = serde_json::from_value(append_patch(addresses))?;
        self.reservations
            .patch(&self.reservation_name, &PatchParams::default(), &Patch::Json::<()>(patch))
            .await
            .map(|_| ())
            .map_err(|e| StoreError::from_kube(e, &self.reservation_what()))
    }

    async fn update_reservation(&self, record: &ReservationRecord) -> Result<ReservationRecord, StoreError> {
        debug!("UPDATE {} at version {:?}", self.reservation_what(), record.resource_version);
        let object = reservation_object(&self.reservation_name, record);
        self.reservations
            .replace(&self.reservation_name, &PostParams::default(), &object)
            .await
            .map(ReservationRecord::from)
            .map_err(|e| StoreError::from_kube(e, &self.reservation_what()))
    }

    async fn namespace_labels(&self, namespace: &str) -> Result<Option<BTreeMap<String, String>>, StoreError> {
        let what = format!("Namespace {namespace}");
        self.namespaces
            .get_opt(namespace)
            .await
            .map(|found| found.map(|ns| ns.metadata.labels.unwrap_or_default()))
            .map_err(|e| StoreError::from_kube(e, &what))
    }

    async fn get_instance(&self, namespace: &str, name: &str) -> Result<Option<WorkloadInstance>, StoreError> {
        let what = format!("Pod {namespace}/{name}");
        let pods: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        pods.get_opt(name)
            .await
            .map(|found| found.map(WorkloadInstance::from))
            .map_err(|e| StoreError::from_kube(e, &what))
    }
}

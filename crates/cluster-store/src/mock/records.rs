//! Record verbs for MockClusterStore

use super::MockClusterStore;
use crate::error::StoreError;
use crate::models::{ReservationRecord, TrackingRecord};
use std::collections::BTreeMap;

const TRACKING: &str = "ConfigMap ip-reserve/ip-reserve-delay-release";
const RESERVATION: &str = "IPReservation ip-reserve-delay-release";

fn check_version(
    client: &MockClusterStore,
    current: Option<&String>,
    submitted: Option<&String>,
    what: &str,
) -> Result<(), StoreError> {
    if client.take_injected_conflict() {
        return Err(StoreError::Conflict(format!("{what}: injected conflict")));
    }
    match submitted {
        Some(version) if Some(version) != current => Err(StoreError::Conflict(format!(
            "{what}: the object has been modified; please apply your changes to the latest version and try again"
        ))),
        _ => Ok(()),
    }
}

pub async fn get_tracking(client: &MockClusterStore) -> Result<Option<TrackingRecord>, StoreError> {
    client.enter("get_tracking")?;
    Ok(client.tracking.lock().unwrap().clone())
}

pub async fn create_tracking(client: &MockClusterStore, record: &TrackingRecord) -> Result<TrackingRecord, StoreError> {
    client.enter("create_tracking")?;
    let mut slot = client.tracking.lock().unwrap();
    if slot.is_some() {
        return Err(StoreError::AlreadyExists(TRACKING.to_string()));
    }
    let created = TrackingRecord {
        resource_version: Some(client.next_version()),
        ..record.clone()
    };
    *slot = Some(created.clone());
    Ok(created)
}

pub async fn merge_tracking(client: &MockClusterStore, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
    client.enter("merge_tracking")?;
    let mut slot = client.tracking.lock().unwrap();
    let record = slot
        .as_mut()
        .ok_or_else(|| StoreError::NotFound(TRACKING.to_string()))?;
    // Merge patch semantics: listed keys are set, everything else is left alone
    record
        .data
        .extend(entries.iter().map(|(k, v)| (k.clone(), v.clone())));
    record.resource_version = Some(client.next_version());
    Ok(())
}

pub async fn update_tracking(client: &MockClusterStore, record: &TrackingRecord) -> Result<TrackingRecord, StoreError> {
    client.enter("update_tracking")?;
    client.run_interleaved_writes();
    let mut slot = client.tracking.lock().unwrap();
    let current = slot
        .as_ref()
        .ok_or_else(|| StoreError::NotFound(TRACKING.to_string()))?;
    check_version(
        client,
        current.resource_version.as_ref(),
        record.resource_version.as_ref(),
        TRACKING,
    )?;
    let updated = TrackingRecord {
        resource_version: Some(client.next_version()),
        ..record.clone()
    };
    *slot = Some(updated.clone());
    Ok(updated)
}

pub async fn get_reservation(client: &MockClusterStore) -> Result<Option<ReservationRecord>, StoreError> {
    client.enter("get_reservation")?;
    Ok(client.reservation.lock().unwrap().clone())
}

pub async fn create_reservation(client: &MockClusterStore, record: &ReservationRecord) -> Result<ReservationRecord, StoreError> {
    client.enter("create_reservation")?;
    let mut slot = client.reservation.lock().unwrap();
    if slot.is_some() {
        return Err(StoreError::AlreadyExists(RESERVATION.to_string()));
    }
    let created = ReservationRecord {
        resource_version: Some(client.next_version()),
        ..record.clone()
    };
    *slot = Some(created.clone());
    Ok(created)
}

pub async fn append_reservation(client: &MockClusterStore, addresses: &[String]) -> Result<(), StoreError> {
    if addresses.is_empty() {
        return Ok(());
    }
    client.enter("append_reservation")?;
    let mut slot = client.reservation.lock().unwrap();
    let record = slot
        .as_mut()
        .ok_or_else(|| StoreError::NotFound(RESERVATION.to_string()))?;
    // An omitted list has no path to append to, just like the API server
    if record.reserved_cidrs.is_empty() {
        return Err(StoreError::InvalidObject(format!(
            "{RESERVATION}: path /spec/reservedCIDRs does not exist"
        )));
    }
    record.reserved_cidrs.extend(addresses.iter().cloned());
    record.resource_version = Some(client.next_version());
    Ok(())
}

pub async fn update_reservation(client: &MockClusterStore, record: &ReservationRecord) -> Result<ReservationRecord, StoreError> {
    client.enter("update_reservation")?;
    client.run_interleaved_writes();
    let mut slot = client.reservation.lock().unwrap();
    let current = slot
        .as_ref()
        .ok_or_else(|| StoreError::NotFound(RESERVATION.to_string()))?;
    check_version(
        client,
        current.resource_version.as_ref(),
        record.resource_version.as_ref(),
        RESERVATION,
    )?;
    let updated = ReservationRecord {
        resource_version: Some(client.next_version()),
        ..record.clone()
    };
    *slot = Some(updated.clone());
    Ok(updated)
}

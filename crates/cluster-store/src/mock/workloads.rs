//! Namespace and pod lookups for MockClusterStore

use super::MockClusterStore;
use crate::error::StoreError;
use crate::models::WorkloadInstance;
use std::collections::BTreeMap;

pub async fn namespace_labels(client: &MockClusterStore, namespace: &str) -> Result<Option<BTreeMap<String, String>>, StoreError> {
    client.enter("namespace_labels")?;
    Ok(client.namespaces.lock().unwrap().get(namespace).cloned())
}

pub async fn get_instance(client: &MockClusterStore, namespace: &str, name: &str) -> Result<Option<WorkloadInstance>, StoreError> {
    client.enter("get_instance")?;
    Ok(client
        .instances
        .lock()
        .unwrap()
        .get(&(namespace.to_string(), name.to_string()))
        .cloned())
}

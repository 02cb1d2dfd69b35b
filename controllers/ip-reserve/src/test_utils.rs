//! Test utilities for engine-level tests
//!
//! Fixtures for building a `RetentionStore` on top of `MockClusterStore`.

use crate::backoff::RetryBackoff;
use crate::codec::encode;
use crate::config::{EngineConfig, NAMESPACE_OPT_IN_KEY, NAMESPACE_OPT_IN_VALUE, STATEFUL_IDENTITY_LABEL};
use crate::metrics::Metrics;
use crate::retention::RetentionStore;
use chrono::{DateTime, Local, TimeDelta, TimeZone};
use cluster_store::{MockClusterStore, WorkloadInstance};
use std::collections::BTreeMap;
use std::time::Duration;

pub const SENTINEL: &str = "1.1.1.1";

/// Fixed wall-clock instant used as "now"
pub fn fixed_now() -> DateTime<Local> {
    Local.with_ymd_and_hms(2024, 6, 15, 12, 0, 0).single().unwrap()
}

/// Tracking token of an address reserved `seconds` before `fixed_now()`
pub fn token_held_for(seconds: i64) -> String {
    encode("kafka", "broker-0", "node01", fixed_now() - TimeDelta::seconds(seconds))
}

pub fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

/// Engine with the given limits and a schedule that does not sleep long
pub fn create_test_engine(store: &MockClusterStore, max_retained_count: usize, retention: Duration) -> RetentionStore {
    let config = EngineConfig {
        max_retained_count,
        retention_duration: retention,
        ..EngineConfig::default()
    };
    RetentionStore::new(Box::new(store.clone()), &config, Metrics::new().unwrap())
        .unwrap()
        .with_retry(RetryBackoff::new(Duration::from_millis(1), 2, 4))
}

/// Engine with default configuration
pub fn create_default_engine(store: &MockClusterStore) -> RetentionStore {
    create_test_engine(store, 200, Duration::from_secs(30 * 60))
}

/// Namespace carrying the opt-in label
pub fn add_opted_in_namespace(store: &MockClusterStore, namespace: &str) {
    store.add_namespace(
        namespace,
        BTreeMap::from([(NAMESPACE_OPT_IN_KEY.to_string(), NAMESPACE_OPT_IN_VALUE.to_string())]),
    );
}

/// StatefulSet pod scheduled on `node01`
pub fn create_stateful_instance(namespace: &str, name: &str, addresses: &[&str]) -> WorkloadInstance {
    WorkloadInstance {
        namespace: namespace.to_string(),
        name: name.to_string(),
        node: "node01".to_string(),
        labels: BTreeMap::from([(STATEFUL_IDENTITY_LABEL.to_string(), name.to_string())]),
        addresses: strings(addresses),
    }
}

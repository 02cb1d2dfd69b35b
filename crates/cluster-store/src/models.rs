//! Record and workload models
//!
//! Plain views of the Kubernetes objects the retention engine works with.
//! Each record carries the resource version it was read at, so whole-record
//! updates fail with a conflict when another writer got there first.

use crds::IPReservation;
use k8s_openapi::ByteString;
use k8s_openapi::api::core::v1::{ConfigMap, Pod};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use std::collections::BTreeMap;

/// Identity of a namespaced object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordRef {
    pub name: String,
    pub namespace: String,
}

impl RecordRef {
    pub fn new(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: namespace.into(),
        }
    }
}

impl std::fmt::Display for RecordRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Address -> encoded tracking token, persisted as ConfigMap data
///
/// `metadata` and `binary_data` are kept as read so a whole-record update
/// leaves labels, annotations, owners and finalizers set by others in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrackingRecord {
    pub data: BTreeMap<String, String>,
    pub resource_version: Option<String>,
    pub metadata: ObjectMeta,
    pub binary_data: Option<BTreeMap<String, ByteString>>,
}

impl From<ConfigMap> for TrackingRecord {
    fn from(config_map: ConfigMap) -> Self {
        Self {
            data: config_map.data.unwrap_or_default(),
            resource_version: config_map.metadata.resource_version.clone(),
            metadata: config_map.metadata,
            binary_data: config_map.binary_data,
        }
    }
}

/// Ordered do-not-reuse list, persisted as IPReservation spec
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReservationRecord {
    pub reserved_cidrs: Vec<String>,
    pub resource_version: Option<String>,
    /// Metadata as read, carried into whole-record updates
    pub metadata: ObjectMeta,
}

impl ReservationRecord {
    /// A fresh record holding only `entries`, with no resource version.
    pub fn with_entries(entries: Vec<String>) -> Self {
        Self {
            reserved_cidrs: entries,
            ..Self::default()
        }
    }
}

impl From<IPReservation> for ReservationRecord {
    fn from(reservation: IPReservation) -> Self {
        Self {
            reserved_cidrs: reservation.spec.reserved_cidrs,
            resource_version: reservation.metadata.resource_version.clone(),
            metadata: reservation.metadata,
        }
    }
}

/// The parts of a Pod the reserve path looks at
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkloadInstance {
    pub namespace: String,
    pub name: String,
    /// Node the pod was placed on (empty if never scheduled)
    pub node: String,
    pub labels: BTreeMap<String, String>,
    /// Every address in `status.podIPs`
    pub addresses: Vec<String>,
}

impl From<Pod> for WorkloadInstance {
    fn from(pod: Pod) -> Self {
        let addresses = pod
            .status
            .and_then(|status| status.pod_ips)
            .unwrap_or_default()
            .into_iter()
            .map(|pod_ip| pod_ip.ip)
            .filter(|ip| !ip.is_empty())
            .collect();
        Self {
            namespace: pod.metadata.namespace.unwrap_or_default(),
            name: pod.metadata.name.unwrap_or_default(),
            node: pod.spec.and_then(|spec| spec.node_name).unwrap_or_default(),
            labels: pod.metadata.labels.unwrap_or_default(),
            addresses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::{PodIP, PodSpec, PodStatus};

    #[test]
    fn test_workload_instance_from_pod() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("redis-0".to_string()),
                namespace: Some("redis".to_string()),
                labels: Some(BTreeMap::from([(
                    "statefulset.kubernetes.io/pod-name".to_string(),
                    "redis-0".to_string(),
                )])),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some("node01".to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                pod_ips: Some(vec![
                    PodIP { ip: "10.1.1.2".to_string() },
                    PodIP { ip: "fd00::2".to_string() },
                ]),
                ..Default::default()
            }),
        };

        let instance = WorkloadInstance::from(pod);
        assert_eq!(instance.namespace, "redis");
        assert_eq!(instance.name, "redis-0");
        assert_eq!(instance.node, "node01");
        assert_eq!(instance.addresses, vec!["10.1.1.2", "fd00::2"]);
        assert_eq!(instance.labels.len(), 1);
    }

    #[test]
    fn test_unscheduled_pod_has_no_addresses() {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some("pending".to_string()),
                namespace: Some("redis".to_string()),
                ..Default::default()
            },
            spec: None,
            status: None,
        };

        let instance = WorkloadInstance::from(pod);
        assert!(instance.addresses.is_empty());
        assert!(instance.node.is_empty());
    }

    #[test]
    fn test_tracking_record_from_empty_config_map() {
        let record = TrackingRecord::from(ConfigMap::default());
        assert!(record.data.is_empty());
        assert!(record.resource_version.is_none());
    }
}

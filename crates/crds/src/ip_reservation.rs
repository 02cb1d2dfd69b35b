//! IPReservation CRD
//!
//! Mirror of the Calico `projectcalico.org/v3` IPReservation resource. The
//! retention engine only owns one object of this kind; its `reservedCIDRs`
//! list is the set of addresses and ranges Calico IPAM must never hand out.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// JSON pointer of the reserved list, used for append-only JSON patches.
pub const RESERVED_CIDRS_PATH: &str = "/spec/reservedCIDRs";

#[derive(CustomResource, Debug, Clone, Serialize, Deserialize, JsonSchema, Default, PartialEq, Eq)]
#[kube(
    group = "projectcalico.org",
    version = "v3",
    kind = "IPReservation",
    plural = "ipreservations",
    derive = "Default"
)]
pub struct IPReservationSpec {
    /// Addresses or CIDR ranges that must not be allocated
    #[serde(rename = "reservedCIDRs", default, skip_serializing_if = "Vec::is_empty")]
    pub reserved_cidrs: Vec<String>,
}

impl IPReservation {
    /// Builds an IPReservation named `name` holding `reserved_cidrs`.
    #[must_use]
    pub fn with_cidrs(name: &str, reserved_cidrs: Vec<String>) -> Self {
        IPReservation::new(name, IPReservationSpec { reserved_cidrs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_cidrs_wire_name() {
        let reservation = IPReservation::with_cidrs("keep", vec!["1.1.1.1".to_string()]);
        let value = serde_json::to_value(&reservation).unwrap();
        assert_eq!(value["spec"]["reservedCIDRs"][0], "1.1.1.1");
        assert_eq!(value["apiVersion"], "projectcalico.org/v3");
        assert_eq!(value["kind"], "IPReservation");
    }

    #[test]
    fn test_missing_list_deserializes_empty() {
        let value = serde_json::json!({
            "apiVersion": "projectcalico.org/v3",
            "kind": "IPReservation",
            "metadata": { "name": "keep" },
            "spec": {}
        });
        let reservation: IPReservation = serde_json::from_value(value).unwrap();
        assert!(reservation.spec.reserved_cidrs.is_empty());
    }
}

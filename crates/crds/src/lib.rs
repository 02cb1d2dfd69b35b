//! ip-reserve CRD Definitions
//!
//! Kubernetes resource types used by the ip-reserve controller.

pub mod ip_reservation;

pub use ip_reservation::*;

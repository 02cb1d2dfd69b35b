//! ip-reserve cluster store
//!
//! Reads and writes the two records the retention engine persists:
//!
//! - the **tracking record**, a ConfigMap mapping each held address to an
//!   encoded owner/timestamp token;
//! - the **reservation record**, a Calico IPReservation whose
//!   `reservedCIDRs` list Calico IPAM must never allocate from.
//!
//! It also exposes the two lookups the admission path needs (namespace labels
//! and the pod being removed).
//!
//! # Features
//!
//! - **Merge/append verbs** for the concurrent reserve path
//! - **Versioned updates** for the single-writer release path
//! - **`test-util`**: an in-memory `MockClusterStore` with optimistic concurrency

pub mod client;
pub mod error;
pub mod models;
#[path = "trait.rs"]
pub mod store_trait;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use client::ClusterStore;
pub use error::StoreError;
pub use models::*;
pub use store_trait::ClusterStoreTrait;
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockClusterStore;

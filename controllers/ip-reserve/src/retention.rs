//! Retention store
//!
//! Orchestrates the two persisted records for both entry points:
//!
//! - `reserve` runs once per qualifying pod removal and may run concurrently
//!   with itself, so it only uses merge/append patches.
//! - `release` runs from the single release task and rewrites both records
//!   under optimistic concurrency, retrying the whole load/decide/write
//!   sequence from a fresh read on conflict.
//!
//! Every store call is bounded by the configured store timeout.

use crate::backoff::RetryBackoff;
use crate::codec::encode;
use crate::config::{EngineConfig, NAMESPACE_OPT_IN_KEY, NAMESPACE_OPT_IN_VALUE};
use crate::coverage::{compute, uncovered};
use crate::error::ControllerError;
use crate::metrics::Metrics;
use crate::policy::RetentionPolicy;
use crate::selector::SelectorGate;
use chrono::{DateTime, Local};
use cluster_store::{ClusterStoreTrait, ReservationRecord, StoreError, TrackingRecord};
use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Why a removal event was not acted on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterReason {
    NamespaceNotFound,
    NamespaceNotOptedIn,
    SelectorMismatch,
}

/// Result of a reserve call that did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// Addresses recorded; counts are what was newly written
    Reserved { tracked: usize, appended: usize },
    /// Pod not eligible, nothing written
    FilteredOut(FilterReason),
    /// Pod never got an address, nothing written
    NoAddresses,
}

/// Summary of a successful release cycle
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseReport {
    pub released: Vec<String>,
    pub evicted: usize,
    pub covered_addresses: i64,
    pub reservation_updated: bool,
    /// Attempts used, including the successful one
    pub attempts: u32,
}

pub struct RetentionStore {
    store: Box<dyn ClusterStoreTrait>,
    policy: RetentionPolicy,
    gate: SelectorGate,
    metrics: Metrics,
    sentinel: String,
    store_timeout: Duration,
    retry: RetryBackoff,
}

impl std::fmt::Debug for RetentionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetentionStore")
            .field("policy", &self.policy)
            .field("gate", &self.gate)
            .field("sentinel", &self.sentinel)
            .field("store_timeout", &self.store_timeout)
            .finish_non_exhaustive()
    }
}

impl RetentionStore {
    /// Builds the engine, rejecting selectors it cannot evaluate.
    pub fn new(
        store: Box<dyn ClusterStoreTrait>,
        config: &EngineConfig,
        metrics: Metrics,
    ) -> Result<Self, ControllerError> {
        let gate = SelectorGate::from_label_selector(&config.selector)?;
        metrics
            .reserved_count_max
            .set(i64::try_from(config.max_retained_count).unwrap_or(i64::MAX));
        Ok(Self {
            store,
            policy: RetentionPolicy::new(config.max_retained_count, config.retention_duration),
            gate,
            metrics,
            sentinel: config.sentinel.clone(),
            store_timeout: config.store_timeout,
            retry: RetryBackoff::conflict_default(),
        })
    }

    /// Replaces the conflict retry schedule.
    #[cfg(test)]
    #[must_use]
    pub fn with_retry(mut self, retry: RetryBackoff) -> Self {
        self.retry = retry;
        self
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Ensures both records exist. Safe to call any number of times.
    pub async fn bootstrap(&self) -> Result<(), ControllerError> {
        match self.call(self.store.create_tracking(&TrackingRecord::default())).await {
            Ok(_) => info!("Created tracking record"),
            Err(e) if is_already_exists(&e) => debug!("Tracking record already exists"),
            Err(e) => return Err(e),
        }

        let reservation = ReservationRecord::with_entries(vec![self.sentinel.clone()]);
        match self.call(self.store.create_reservation(&reservation)).await {
            Ok(_) => info!("Created reservation record"),
            Err(e) if is_already_exists(&e) => debug!("Reservation record already exists"),
            Err(e) => return Err(e),
        }
        Ok(())
    }

    /// Records the addresses of a pod being removed.
    pub async fn reserve(&self, namespace: &str, name: &str) -> Result<ReserveOutcome, ControllerError> {
        self.reserve_at(namespace, name, Local::now()).await
    }

    /// `reserve` with an explicit reservation time.
    pub async fn reserve_at(
        &self,
        namespace: &str,
        name: &str,
        now: DateTime<Local>,
    ) -> Result<ReserveOutcome, ControllerError> {
        let Some(namespace_labels) = self.call(self.store.namespace_labels(namespace)).await? else {
            debug!(namespace, name, "Namespace not found, skipping");
            return Ok(ReserveOutcome::FilteredOut(FilterReason::NamespaceNotFound));
        };
        if namespace_labels.get(NAMESPACE_OPT_IN_KEY).map(String::as_str) != Some(NAMESPACE_OPT_IN_VALUE) {
            debug!(namespace, name, "Namespace not opted in, skipping");
            return Ok(ReserveOutcome::FilteredOut(FilterReason::NamespaceNotOptedIn));
        }

        let instance = self
            .call(self.store.get_instance(namespace, name))
            .await?
            .ok_or_else(|| ControllerError::InstanceNotFound(format!("{namespace}/{name}")))?;

        if !self.gate.matches(&instance.labels) {
            info!(namespace, name, "Pod does not match selector, skipping");
            return Ok(ReserveOutcome::FilteredOut(FilterReason::SelectorMismatch));
        }
        if instance.addresses.is_empty() {
            info!(namespace, name, "Pod has no IP, nothing to reserve");
            return Ok(ReserveOutcome::NoAddresses);
        }

        // Addresses already tracked keep their original reservation time
        let tracking = self.load_or_create_tracking().await?;
        let token = encode(namespace, name, &instance.node, now);
        let fresh: BTreeMap<String, String> = instance
            .addresses
            .iter()
            .filter(|address| !tracking.data.contains_key(*address))
            .map(|address| (address.clone(), token.clone()))
            .collect();
        if !fresh.is_empty() {
            self.call(self.store.merge_tracking(&fresh)).await?;
        }

        let reservation = self.load_or_create_reservation().await?;
        let missing = uncovered(&reservation.reserved_cidrs, &instance.addresses);
        if !missing.is_empty() {
            self.call(self.store.append_reservation(&missing)).await?;
        }

        info!(
            namespace,
            name,
            addresses = ?instance.addresses,
            tracked = fresh.len(),
            appended = missing.len(),
            "Reserved pod IPs"
        );
        Ok(ReserveOutcome::Reserved {
            tracked: fresh.len(),
            appended: missing.len(),
        })
    }

    /// Runs one release cycle at `now`, retrying on write conflicts.
    ///
    /// Metrics are only reported for the attempt that committed, so a retried
    /// cycle does not count its evictions twice.
    pub async fn release(&self, now: DateTime<Local>) -> Result<ReleaseReport, ControllerError> {
        let mut backoff = self.retry.clone();
        backoff.reset();
        let mut attempt: u32 = 1;

        loop {
            match self.release_once(now).await {
                Ok(mut report) => {
                    report.attempts = attempt;
                    self.metrics.reserved_count.set(report.covered_addresses);
                    self.metrics
                        .evictions
                        .inc_by(u64::try_from(report.evicted).unwrap_or(u64::MAX));
                    info!(
                        released = report.released.len(),
                        evicted = report.evicted,
                        covered = report.covered_addresses,
                        reservation_updated = report.reservation_updated,
                        attempts = attempt,
                        "Release cycle complete"
                    );
                    return Ok(report);
                }
                Err(ControllerError::ConcurrentModification { source, .. }) => match backoff.next_backoff() {
                    Some(delay) => {
                        debug!(attempt, ?delay, error = %source, "Release conflicted, retrying from a fresh read");
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => {
                        warn!(attempts = attempt, max_attempts = self.retry.steps(), "Release conflict retries exhausted");
                        return Err(ControllerError::ConcurrentModification {
                            attempts: attempt,
                            source,
                        });
                    }
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// A single load/decide/write pass with no retry.
    pub async fn release_once(&self, now: DateTime<Local>) -> Result<ReleaseReport, ControllerError> {
        let tracking = self.load_or_create_tracking().await?;
        let reservation = self.load_or_create_reservation().await?;

        let mut data = tracking.data;
        let decision = self.policy.select_for_release(&mut data, now);
        let coverage = compute(&reservation.reserved_cidrs, &decision.released, &self.sentinel);

        let reservation_updated = coverage.entries != reservation.reserved_cidrs;
        if reservation_updated {
            let updated = ReservationRecord {
                reserved_cidrs: coverage.entries,
                ..reservation
            };
            self.call(self.store.update_reservation(&updated)).await?;
        }

        let updated = TrackingRecord { data, ..tracking };
        self.call(self.store.update_tracking(&updated)).await?;

        Ok(ReleaseReport {
            released: decision.released,
            evicted: decision.evicted,
            covered_addresses: coverage.covered_addresses,
            reservation_updated,
            attempts: 1,
        })
    }

    async fn load_or_create_tracking(&self) -> Result<TrackingRecord, ControllerError> {
        if let Some(record) = self.call(self.store.get_tracking()).await? {
            return Ok(record);
        }
        match self.call(self.store.create_tracking(&TrackingRecord::default())).await {
            Ok(record) => {
                info!("Created tracking record");
                Ok(record)
            }
            Err(e) if is_already_exists(&e) => self
                .call(self.store.get_tracking())
                .await?
                .ok_or_else(|| ControllerError::StoreUnavailable(StoreError::NotFound("tracking record".to_string()))),
            Err(e) => Err(e),
        }
    }

    async fn load_or_create_reservation(&self) -> Result<ReservationRecord, ControllerError> {
        if let Some(record) = self.call(self.store.get_reservation()).await? {
            return Ok(record);
        }
        let initial = ReservationRecord::with_entries(vec![self.sentinel.clone()]);
        match self.call(self.store.create_reservation(&initial)).await {
            Ok(record) => {
                info!("Created reservation record");
                Ok(record)
            }
            Err(e) if is_already_exists(&e) => self
                .call(self.store.get_reservation())
                .await?
                .ok_or_else(|| ControllerError::StoreUnavailable(StoreError::NotFound("reservation record".to_string()))),
            Err(e) => Err(e),
        }
    }

    /// Runs one store call under the store timeout.
    async fn call<T, F>(&self, fut: F) -> Result<T, ControllerError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.store_timeout, fut).await {
            Ok(result) => result.map_err(ControllerError::from),
            Err(_elapsed) => Err(ControllerError::Timeout(self.store_timeout)),
        }
    }
}

fn is_already_exists(err: &ControllerError) -> bool {
    matches!(err, ControllerError::StoreUnavailable(source) if source.is_already_exists())
}

#[cfg(test)]
mod tests {
    use super::*;
    use cluster_store::MockClusterStore;

    #[tokio::test]
    async fn test_store_call_times_out() {
        let config = EngineConfig {
            store_timeout: Duration::from_millis(10),
            ..EngineConfig::default()
        };
        let engine = RetentionStore::new(Box::new(MockClusterStore::new()), &config, Metrics::new().unwrap()).unwrap();

        let result: Result<(), ControllerError> = engine.call(std::future::pending()).await;

        assert!(matches!(result, Err(ControllerError::Timeout(d)) if d == Duration::from_millis(10)));
    }

    #[test]
    fn test_invalid_selector_rejected() {
        let mut config = EngineConfig::default();
        if let Some(expressions) = config.selector.match_expressions.as_mut() {
            expressions[0].operator = "Near".to_string();
        }
        let result = RetentionStore::new(Box::new(MockClusterStore::new()), &config, Metrics::new().unwrap());
        assert!(matches!(result, Err(ControllerError::InvalidConfig(_))));
    }
}

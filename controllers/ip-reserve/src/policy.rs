//! Retention policy
//!
//! Two stages run over the tracking map each cycle:
//!
//! 1. Every entry held for at least the retention duration is released.
//! 2. If more than `max_retained_count` entries remain, the longest-held ones
//!    are evicted until the count fits. The sort is stable, so entries with
//!    equal hold times keep the map's (address) order and repeated runs over the
//!    same input give the same result.
//!
//! Entries whose token does not decode are left in the map and take part in
//! neither stage.

use crate::codec::{DecodedEntry, decode};
use crate::error::ControllerError;
use chrono::{DateTime, Local, TimeDelta};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Eviction thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub max_retained_count: usize,
    pub retention_duration: Duration,
}

/// Outcome of one policy run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseDecision {
    /// Expired addresses first (map order), then evictions (longest held first)
    pub released: Vec<String>,
    /// How many of `released` reached the retention duration
    pub expired: usize,
    /// How many of `released` were evicted for capacity
    pub evicted: usize,
    /// Entries left alone because their token did not decode
    pub skipped: usize,
}

impl RetentionPolicy {
    pub fn new(max_retained_count: usize, retention_duration: Duration) -> Self {
        Self {
            max_retained_count,
            retention_duration,
        }
    }

    /// Picks the addresses to release at `now` and removes them from `tracking`.
    pub fn select_for_release(
        &self,
        tracking: &mut BTreeMap<String, String>,
        now: DateTime<Local>,
    ) -> ReleaseDecision {
        let ttl = TimeDelta::from_std(self.retention_duration).unwrap_or(TimeDelta::MAX);
        let mut decision = ReleaseDecision::default();
        let mut retained: Vec<(&String, DecodedEntry)> = Vec::with_capacity(tracking.len());

        for (address, token) in tracking.iter() {
            match decode(token, now) {
                Ok(entry) if entry.held >= ttl => {
                    debug!(
                        address = %address,
                        namespace = %entry.namespace,
                        name = %entry.name,
                        node = %entry.node,
                        held_secs = entry.held.num_seconds(),
                        "Reservation expired"
                    );
                    decision.released.push(address.clone());
                }
                Ok(entry) => retained.push((address, entry)),
                Err(source) => {
                    let err = ControllerError::MalformedEntry {
                        address: address.clone(),
                        source,
                    };
                    warn!(error = %err, "Skipping tracking entry this cycle");
                    decision.skipped += 1;
                }
            }
        }
        decision.expired = decision.released.len();

        let overflow = retained.len().saturating_sub(self.max_retained_count);
        if overflow > 0 {
            retained.sort_by(|a, b| b.1.held.cmp(&a.1.held));
            for (address, entry) in retained.iter().take(overflow) {
                info!(
                    address = %address,
                    namespace = %entry.namespace,
                    name = %entry.name,
                    node = %entry.node,
                    held_secs = entry.held.num_seconds(),
                    "Evicting reservation over capacity"
                );
                decision.released.push((*address).clone());
            }
            decision.evicted = overflow;
        }

        for address in &decision.released {
            tracking.remove(address);
        }

        debug!(
            expired = decision.expired,
            evicted = decision.evicted,
            skipped = decision.skipped,
            remaining = tracking.len(),
            "Retention policy applied"
        );
        decision
    }
}

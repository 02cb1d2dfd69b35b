//! Coverage set
//!
//! Computes the reservation list to persist after a release decision, and the
//! addresses a reserve call still has to append.

use crate::codec::{covers, parse_address, range_size};
use crate::error::ControllerError;
use ipnet::IpNet;
use std::collections::HashSet;
use tracing::warn;

/// New reservation list and the number of addresses it covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Coverage {
    pub entries: Vec<String>,
    /// Sum of range sizes of every entry except the sentinel
    pub covered_addresses: i64,
}

/// Drops the released literals from `existing` and collapses duplicates.
///
/// Only exact string matches are dropped: a range entry containing a released
/// address stays in place. Order is kept, the first duplicate wins and the
/// sentinel is appended when missing.
pub fn compute(existing: &[String], releasing: &[String], sentinel: &str) -> Coverage {
    let releasing: HashSet<&str> = releasing.iter().map(String::as_str).collect();
    let mut seen = HashSet::with_capacity(existing.len());
    let mut entries = Vec::with_capacity(existing.len() + 1);
    let mut covered: u128 = 0;

    for entry in existing {
        if releasing.contains(entry.as_str()) || !seen.insert(entry.as_str()) {
            continue;
        }
        entries.push(entry.clone());
        if entry == sentinel {
            continue;
        }
        let range = parse_address(entry);
        if range.is_none() {
            warn!(error = %ControllerError::InvalidAddressLiteral(entry.clone()), "Keeping unparseable reservation entry");
        }
        covered = covered.saturating_add(range_size(range.as_ref()));
    }

    if !seen.contains(sentinel) {
        entries.push(sentinel.to_string());
    }

    Coverage {
        entries,
        covered_addresses: i64::try_from(covered).unwrap_or(i64::MAX),
    }
}

/// Candidates not yet covered by any parseable entry of `existing`, in order.
///
/// Unparseable existing entries and candidates are logged and skipped. A
/// candidate covered by an earlier candidate of the same batch is skipped too.
pub fn uncovered(existing: &[String], candidates: &[String]) -> Vec<String> {
    let mut ranges: Vec<IpNet> = existing
        .iter()
        .filter_map(|entry| {
            let range = parse_address(entry);
            if range.is_none() {
                warn!(error = %ControllerError::InvalidAddressLiteral(entry.clone()), "Skipping reservation entry");
            }
            range
        })
        .collect();

    let mut missing = Vec::new();
    for candidate in candidates {
        let Some(address) = parse_address(candidate) else {
            warn!(error = %ControllerError::InvalidAddressLiteral(candidate.clone()), "Skipping instance address");
            continue;
        };
        if ranges.iter().any(|range| covers(range, &address)) {
            continue;
        }
        ranges.push(address);
        missing.push(candidate.clone());
    }
    missing
}

#[cfg(test)]
mod tests {
    use super::*;

    const SENTINEL: &str = "1.1.1.1";

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_release_single_address() {
        let coverage = compute(&list(&[SENTINEL, "5.5.5.5"]), &list(&["5.5.5.5"]), SENTINEL);
        assert_eq!(coverage.entries, list(&[SENTINEL]));
        assert_eq!(coverage.covered_addresses, 0);
    }

    #[test]
    fn test_empty_list_gets_sentinel() {
        let coverage = compute(&[], &[], SENTINEL);
        assert_eq!(coverage.entries, list(&[SENTINEL]));
        assert_eq!(coverage.covered_addresses, 0);
    }

    #[test]
    fn test_order_preserved_and_duplicates_collapse() {
        let existing = list(&["10.0.0.9", SENTINEL, "10.0.0.3", "10.0.0.9", "10.0.1.0/30"]);
        let coverage = compute(&existing, &[], SENTINEL);
        assert_eq!(coverage.entries, list(&["10.0.0.9", SENTINEL, "10.0.0.3", "10.0.1.0/30"]));
        assert_eq!(coverage.covered_addresses, 1 + 1 + 4);
    }

    #[test]
    fn test_repeated_compute_is_identical() {
        let existing = list(&["10.0.0.2", "10.0.0.1", "10.0.0.2", SENTINEL]);
        let releasing = list(&["10.0.0.1"]);
        let first = compute(&existing, &releasing, SENTINEL);
        let second = compute(&existing, &releasing, SENTINEL);
        assert_eq!(first, second);

        let again = compute(&first.entries, &releasing, SENTINEL);
        assert_eq!(again.entries, first.entries);
    }

    #[test]
    fn test_range_not_partially_released() {
        // Known limitation: only exact literals leave the list
        let existing = list(&[SENTINEL, "10.2.0.0/24"]);
        let coverage = compute(&existing, &list(&["10.2.0.7"]), SENTINEL);
        assert_eq!(coverage.entries, existing);
        assert_eq!(coverage.covered_addresses, 256);
    }

    #[test]
    fn test_unparseable_entry_is_kept_and_not_counted() {
        let existing = list(&[SENTINEL, "garbage", "10.0.0.1"]);
        let coverage = compute(&existing, &[], SENTINEL);
        assert_eq!(coverage.entries, existing);
        assert_eq!(coverage.covered_addresses, 1);
    }

    #[test]
    fn test_uncovered_skips_covered_and_duplicates() {
        let existing = list(&[SENTINEL, "10.2.0.0/24", "bogus", "10.3.0.1"]);
        let candidates = list(&["10.2.0.7", "10.3.0.1", "10.4.0.1", "10.4.0.1", "fd00::1", "nope"]);
        assert_eq!(uncovered(&existing, &candidates), list(&["10.4.0.1", "fd00::1"]));
    }

    #[test]
    fn test_uncovered_with_everything_present() {
        let existing = list(&[SENTINEL, "10.3.0.1"]);
        assert!(uncovered(&existing, &list(&["10.3.0.1"])).is_empty());
    }
}

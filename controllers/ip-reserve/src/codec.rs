//! Address codec
//!
//! Tracking tokens are the values of the tracking record: owner namespace,
//! owner name, placement node and reservation time joined by `_`, with the
//! time written in local time at second precision. Namespace, pod and node
//! names cannot contain `_`, which keeps the split unambiguous.

use crate::error::CodecError;
use chrono::{DateTime, Local, NaiveDateTime, TimeDelta};
use ipnet::IpNet;
use std::net::IpAddr;

/// Separator between token fields
pub const TOKEN_SEPARATOR: char = '_';
/// Fixed layout of the timestamp field
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H:%M:%S";

/// A decoded tracking token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedEntry {
    pub node: String,
    pub namespace: String,
    pub name: String,
    /// `now` minus the reservation time
    pub held: TimeDelta,
}

/// Encodes the owner of an address and the time it was reserved.
pub fn encode(namespace: &str, name: &str, node: &str, at: DateTime<Local>) -> String {
    format!(
        "{namespace}{sep}{name}{sep}{node}{sep}{stamp}",
        sep = TOKEN_SEPARATOR,
        stamp = at.format(TIMESTAMP_FORMAT)
    )
}

/// Decodes a token, measuring how long the address has been held at `now`.
pub fn decode(token: &str, now: DateTime<Local>) -> Result<DecodedEntry, CodecError> {
    let fields: Vec<&str> = token.split(TOKEN_SEPARATOR).collect();
    let [namespace, name, node, timestamp] = fields.as_slice() else {
        return Err(CodecError::MalformedToken {
            token: token.to_string(),
            fields: fields.len(),
        });
    };

    let bad_timestamp = |reason: String| CodecError::BadTimestamp {
        timestamp: (*timestamp).to_string(),
        reason,
    };
    let naive = NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT)
        .map_err(|e| bad_timestamp(e.to_string()))?;
    // A wall-clock time repeated by a DST fold resolves to its first occurrence
    let reserved_at = naive
        .and_local_timezone(Local)
        .earliest()
        .ok_or_else(|| bad_timestamp("does not exist in the local time zone".to_string()))?;

    Ok(DecodedEntry {
        node: (*node).to_string(),
        namespace: (*namespace).to_string(),
        name: (*name).to_string(),
        held: now.signed_duration_since(reserved_at),
    })
}

/// Parses a host or CIDR literal into a range.
///
/// A bare host becomes a single-address range; a CIDR keeps its prefix with
/// the host bits cleared. Anything else is `None`.
pub fn parse_address(literal: &str) -> Option<IpNet> {
    let literal = literal.trim();
    if let Ok(addr) = literal.parse::<IpAddr>() {
        return Some(IpNet::from(addr));
    }
    literal.parse::<IpNet>().ok().map(|net| net.trunc())
}

/// Number of addresses in a range, saturating at `u128::MAX` for `::/0`.
pub fn range_size(range: Option<&IpNet>) -> u128 {
    let Some(range) = range else {
        return 0;
    };
    let host_bits = u32::from(range.max_prefix_len() - range.prefix_len());
    1u128.checked_shl(host_bits).unwrap_or(u128::MAX)
}

/// True when `range` contains every address of `candidate`.
pub fn covers(range: &IpNet, candidate: &IpNet) -> bool {
    range.contains(candidate)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 6, 15, h, m, s).single().unwrap()
    }

    #[test]
    fn test_encode_layout() {
        let token = encode("redis", "redis-0", "node01", at(9, 5, 7));
        assert_eq!(token, "redis_redis-0_node01_2024-06-15-09:05:07");
    }

    #[test]
    fn test_round_trip() {
        let reserved = at(11, 30, 0);
        let now = at(12, 0, 0);
        let decoded = decode(&encode("kafka", "broker-2", "node07", reserved), now).unwrap();
        assert_eq!(decoded.namespace, "kafka");
        assert_eq!(decoded.name, "broker-2");
        assert_eq!(decoded.node, "node07");
        assert_eq!(decoded.held, TimeDelta::minutes(30));
    }

    #[test]
    fn test_unscheduled_pod_keeps_empty_node_field() {
        let token = encode("redis", "redis-1", "", at(12, 0, 0));
        let decoded = decode(&token, at(12, 0, 10)).unwrap();
        assert_eq!(decoded.node, "");
        assert_eq!(decoded.held, TimeDelta::seconds(10));
    }

    #[test]
    fn test_decode_wrong_field_count() {
        let err = decode("redis_redis-0_2024-06-15-09:05:07", at(12, 0, 0)).unwrap_err();
        assert_eq!(
            err,
            CodecError::MalformedToken {
                token: "redis_redis-0_2024-06-15-09:05:07".to_string(),
                fields: 3
            }
        );
        assert!(matches!(
            decode("a_b_c_d_e", at(12, 0, 0)),
            Err(CodecError::MalformedToken { fields: 5, .. })
        ));
    }

    #[test]
    fn test_decode_bad_timestamp() {
        let err = decode("ns_name_node_badtimestamp", at(12, 0, 0)).unwrap_err();
        assert!(matches!(err, CodecError::BadTimestamp { ref timestamp, .. } if timestamp == "badtimestamp"));
        // RFC 3339 is not the stored layout
        assert!(decode("ns_name_node_2024-06-15T09:05:07", at(12, 0, 0)).is_err());
    }

    #[test]
    fn test_parse_address() {
        assert_eq!(parse_address("10.1.1.2"), "10.1.1.2/32".parse().ok());
        assert_eq!(parse_address("fd00::2"), "fd00::2/128".parse().ok());
        assert_eq!(parse_address("10.1.1.7/24"), "10.1.1.0/24".parse().ok());
        assert_eq!(parse_address("not-an-ip"), None);
        assert_eq!(parse_address("10.1.1.0/33"), None);
        assert_eq!(parse_address(""), None);
    }

    #[test]
    fn test_range_size() {
        assert_eq!(range_size(None), 0);
        assert_eq!(range_size(parse_address("10.1.1.2").as_ref()), 1);
        assert_eq!(range_size(parse_address("10.1.1.0/24").as_ref()), 256);
        assert_eq!(range_size(parse_address("fd00::/64").as_ref()), 1u128 << 64);
        assert_eq!(range_size(parse_address("::/0").as_ref()), u128::MAX);
    }

    #[test]
    fn test_covers() {
        let range = parse_address("10.1.1.0/24").unwrap();
        assert!(covers(&range, &parse_address("10.1.1.9").unwrap()));
        assert!(!covers(&range, &parse_address("10.1.2.9").unwrap()));
        assert!(!covers(&range, &parse_address("fd00::1").unwrap()));
    }
}

//! Host target parsing
//!
//! Scale targets arrive as text: either a comma separated list
//! (`10.0.0.1,10.0.0.2`) or a single inclusive range
//! (`10.0.0.1-10.0.0.5`). Ranges must be ascending.

use std::collections::HashSet;
use std::hash::Hash;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use crate::error::ScaleError;

/// Maximum number of addresses a single range may expand to
const MAX_RANGE_SIZE: u128 = 65_536;

/// Parse a comma separated IP list or a single hyphenated IP range
///
/// Empty text yields an empty list. A range expands to every address between
/// its endpoints, inclusive, in ascending order. Reversed ranges, mixed
/// address families and anything that is not an IP are rejected.
pub fn parse_targets(text: &str) -> Result<Vec<IpAddr>, ScaleError> {
    let text = text.trim();
    if text.is_empty() {
        return Ok(Vec::new());
    }

    let invalid = || ScaleError::InvalidAddressFormat(text.to_string());

    if !text.contains(',') {
        if let Some((start, end)) = text.split_once('-') {
            let start: IpAddr = start.trim().parse().map_err(|_| invalid())?;
            let end: IpAddr = end.trim().parse().map_err(|_| invalid())?;
            return expand_range(start, end).ok_or_else(invalid);
        }
    }

    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<IpAddr>().map_err(|_| invalid()))
        .collect()
}

fn expand_range(start: IpAddr, end: IpAddr) -> Option<Vec<IpAddr>> {
    match (start, end) {
        (IpAddr::V4(s), IpAddr::V4(e)) => {
            let (s, e) = (u32::from(s), u32::from(e));
            if s > e || u128::from(e - s) >= MAX_RANGE_SIZE {
                return None;
            }
            Some((s..=e).map(|n| IpAddr::V4(Ipv4Addr::from(n))).collect())
        }
        (IpAddr::V6(s), IpAddr::V6(e)) => {
            let (s, e) = (u128::from(s), u128::from(e));
            if s > e || e - s >= MAX_RANGE_SIZE {
                return None;
            }
            Some((s..=e).map(|n| IpAddr::V6(Ipv6Addr::from(n))).collect())
        }
        _ => None,
    }
}

/// Drop repeated items, keeping the first occurrence of each
pub fn remove_duplicate<T: Clone + Eq + Hash>(items: &[T]) -> Vec<T> {
    let mut seen = HashSet::with_capacity(items.len());
    items
        .iter()
        .filter(|item| seen.insert(*item))
        .cloned()
        .collect()
}

/// Items of `list` not present in `removed`
pub fn subtract(list: &[IpAddr], removed: &[IpAddr]) -> Vec<IpAddr> {
    list.iter()
        .filter(|ip| !removed.contains(ip))
        .copied()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ips(list: &[&str]) -> Vec<IpAddr> {
        list.iter().map(|s| s.parse().unwrap()).collect()
    }

    #[test]
    fn test_range_expands_ascending_inclusive() {
        let parsed = parse_targets("192.168.1.1-192.168.1.5").unwrap();
        assert_eq!(
            parsed,
            ips(&[
                "192.168.1.1",
                "192.168.1.2",
                "192.168.1.3",
                "192.168.1.4",
                "192.168.1.5"
            ])
        );
    }

    #[test]
    fn test_range_crosses_octet_boundary() {
        let parsed = parse_targets("10.0.0.254-10.0.1.1").unwrap();
        assert_eq!(
            parsed,
            ips(&["10.0.0.254", "10.0.0.255", "10.0.1.0", "10.0.1.1"])
        );
    }

    #[test]
    fn test_reversed_range_is_rejected() {
        let err = parse_targets("192.168.1.5-192.168.1.1").unwrap_err();
        assert!(matches!(err, ScaleError::InvalidAddressFormat(_)));
    }

    #[test]
    fn test_list_keeps_order() {
        let parsed = parse_targets("10.0.0.3, 10.0.0.1,10.0.0.2").unwrap();
        assert_eq!(parsed, ips(&["10.0.0.3", "10.0.0.1", "10.0.0.2"]));
    }

    #[test]
    fn test_garbage_is_rejected() {
        for text in ["node1", "10.0.0.1-node2", "10.0.0.1,10.0.0.999", "::1-10.0.0.1"] {
            assert!(
                matches!(parse_targets(text), Err(ScaleError::InvalidAddressFormat(_))),
                "{} should be rejected",
                text
            );
        }
    }

    #[test]
    fn test_empty_text_is_empty_list() {
        assert!(parse_targets("  ").unwrap().is_empty());
    }

    #[test]
    fn test_oversized_range_is_rejected() {
        assert!(parse_targets("10.0.0.0-10.2.0.0").is_err());
    }

    #[test]
    fn test_remove_duplicate_keeps_first_occurrence() {
        let list = vec!["10.0.0.1", "10.0.0.1", "10.0.0.2"];
        assert_eq!(remove_duplicate(&list), vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn test_subtract() {
        let list = ips(&["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
        let removed = ips(&["10.0.0.2", "10.0.0.9"]);
        assert_eq!(subtract(&list, &removed), ips(&["10.0.0.1", "10.0.0.3"]));
    }
}

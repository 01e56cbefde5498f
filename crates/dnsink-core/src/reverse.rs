//! Reverse-DNS names and reverse-zone resolution
//!
//! IPv4 names reverse the octets under `in-addr.arpa.` (RFC 1035), IPv6
//! names reverse the nibbles under `ip6.arpa.` (RFC 3596). The reverse
//! network of an address is its reverse name without the leaf label.
//!
//! IPv4 zones are delegated per /24 and must name the reverse network
//! exactly. IPv6 zones are delegated on any nibble boundary (/48, /64, ...),
//! so the deepest zone enclosing the reverse name wins.

use std::fmt::Write;
use std::net::IpAddr;
use tracing::warn;

use crate::model::Zone;

/// Fully qualified reverse-lookup name, with trailing dot
pub fn reverse_pointer(address: IpAddr) -> String {
    match address {
        IpAddr::V4(v4) => {
            let [a, b, c, d] = v4.octets();
            format!("{}.{}.{}.{}.in-addr.arpa.", d, c, b, a)
        }
        IpAddr::V6(v6) => {
            let mut name = String::with_capacity(73);
            for byte in v6.octets().iter().rev() {
                // Low nibble comes first in reversed order
                let _ = write!(name, "{:x}.{:x}.", byte & 0x0f, byte >> 4);
            }
            name.push_str("ip6.arpa.");
            name
        }
    }
}

/// Reverse network of an address: its reverse name without the leaf node
pub fn reverse_network(address: IpAddr) -> String {
    let pointer = reverse_pointer(address);
    match pointer.split_once('.') {
        Some((_, network)) => network.to_string(),
        None => pointer,
    }
}

/// Compare zone names ignoring one trailing dot and ASCII case
pub fn zone_names_equal(a: &str, b: &str) -> bool {
    let a = a.strip_suffix('.').unwrap_or(a);
    let b = b.strip_suffix('.').unwrap_or(b);
    a.eq_ignore_ascii_case(b)
}

/// Whether `name` lies strictly below the zone apex `zone`
///
/// Compares whole labels, ignoring one trailing dot and ASCII case.
pub fn zone_encloses(zone: &str, name: &str) -> bool {
    let zone = zone.strip_suffix('.').unwrap_or(zone);
    let name = name.strip_suffix('.').unwrap_or(name);
    if zone.is_empty() || name.len() <= zone.len() {
        return false;
    }
    let split = name.len() - zone.len();
    if !name.is_char_boundary(split) {
        return false;
    }
    let (head, tail) = name.split_at(split);
    head.ends_with('.') && tail.eq_ignore_ascii_case(zone)
}

fn label_count(name: &str) -> usize {
    name.trim_end_matches('.').split('.').count()
}

/// Find the zone delegated for an address's reverse name
///
/// Absence is expected when no reverse zone is delegated and yields `None`.
/// Several equally specific zones indicate inconsistent data; the first in
/// iteration order wins and a warning is logged.
pub fn resolve_reverse_zone<'a>(address: IpAddr, zones: &'a [Zone]) -> Option<&'a Zone> {
    let matching: Vec<&Zone> = match address {
        IpAddr::V4(_) => {
            let network = reverse_network(address);
            zones
                .iter()
                .filter(|z| zone_names_equal(&z.name, &network))
                .collect()
        }
        IpAddr::V6(_) => {
            let pointer = reverse_pointer(address);
            let enclosing: Vec<&Zone> = zones
                .iter()
                .filter(|z| zone_encloses(&z.name, &pointer))
                .collect();
            let deepest = enclosing.iter().map(|z| label_count(&z.name)).max()?;
            enclosing
                .into_iter()
                .filter(|z| label_count(&z.name) == deepest)
                .collect()
        }
    };

    let (first, rest) = matching.split_first()?;
    if !rest.is_empty() {
        warn!(
            "{} reverse zones match {}; using zone {} ({})",
            rest.len() + 1,
            address,
            first.id,
            first.name
        );
    }
    Some(*first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reverse_pointer_v4() {
        let ip: IpAddr = "198.51.100.7".parse().unwrap();
        assert_eq!(reverse_pointer(ip), "7.100.51.198.in-addr.arpa.");
        assert_eq!(reverse_network(ip), "100.51.198.in-addr.arpa.");
    }

    #[test]
    fn test_reverse_pointer_v6() {
        let ip: IpAddr = "2001:db8::567:89ab".parse().unwrap();
        assert_eq!(
            reverse_pointer(ip),
            "b.a.9.8.7.6.5.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2.ip6.arpa."
        );
        assert_eq!(
            reverse_network(ip),
            "a.9.8.7.6.5.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2.ip6.arpa."
        );
    }

    #[test]
    fn test_resolve_reverse_zone() {
        let zones = vec![
            Zone::new("Z0", "example.org."),
            Zone::new("Z1", "113.0.203.in-addr.arpa"),
        ];
        let found = resolve_reverse_zone("203.0.113.5".parse().unwrap(), &zones);
        assert_eq!(found.map(|z| z.id.as_str()), Some("Z1"));
    }

    #[test]
    fn test_resolve_reverse_zone_absent() {
        let zones = vec![Zone::new("Z1", "113.0.203.in-addr.arpa.")];
        assert!(resolve_reverse_zone("192.0.2.1".parse().unwrap(), &zones).is_none());
        assert!(resolve_reverse_zone("203.0.113.5".parse().unwrap(), &[]).is_none());
    }

    #[test]
    fn test_resolve_reverse_zone_duplicates_pick_first() {
        let zones = vec![
            Zone::new("Z1", "113.0.203.in-addr.arpa."),
            Zone::new("Z2", "113.0.203.IN-ADDR.ARPA."),
        ];
        let found = resolve_reverse_zone("203.0.113.5".parse().unwrap(), &zones);
        assert_eq!(found.map(|z| z.id.as_str()), Some("Z1"));
    }

    #[test]
    fn test_zone_encloses_on_label_boundary() {
        let pointer = "7.100.51.198.in-addr.arpa.";
        assert!(zone_encloses("100.51.198.in-addr.arpa.", pointer));
        assert!(zone_encloses("51.198.IN-ADDR.ARPA", pointer));
        // Same suffix text, different label
        assert!(!zone_encloses("00.51.198.in-addr.arpa.", pointer));
        // The apex itself is not below the zone
        assert!(!zone_encloses(pointer, pointer));
        assert!(!zone_encloses("", pointer));
    }

    #[test]
    fn test_resolve_reverse_zone_v6_deepest_enclosing() {
        let zones = vec![
            Zone::new("Z48", "8.b.d.0.1.0.0.2.ip6.arpa."),
            Zone::new("Z64", "0.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2.ip6.arpa"),
            Zone::new("Zother", "1.0.0.0.0.0.0.0.8.b.d.0.1.0.0.2.ip6.arpa."),
        ];
        let found = resolve_reverse_zone("2001:db8::5".parse().unwrap(), &zones);
        assert_eq!(found.map(|z| z.id.as_str()), Some("Z64"));

        let found = resolve_reverse_zone("2001:db8:0:2::5".parse().unwrap(), &zones);
        assert_eq!(found.map(|z| z.id.as_str()), Some("Z48"));

        assert!(resolve_reverse_zone("2001:db9::5".parse().unwrap(), &zones).is_none());
    }

    #[test]
    fn test_resolve_reverse_zone_v4_requires_exact_network() {
        let zones = vec![Zone::new("Z16", "51.198.in-addr.arpa.")];
        assert!(resolve_reverse_zone("198.51.100.7".parse().unwrap(), &zones).is_none());
    }
}

//! Client address resolution behind reverse proxies.
//!
//! The forwarded chain is read from `X-Forwarded-For` as a comma separated list, client
//! nearest first. How much of that chain is believed depends on the [`TrustProxy`] policy
//! configured for the application.
//!
//! # Example
//! ```
//! use micro_dispatch::trust_proxy::{resolve, TrustProxy};
//!
//! let chain = "203.0.113.50, 70.41.3.18, 150.172.238.178";
//! let address = resolve("10.0.0.1", Some(chain), &TrustProxy::Hops(1));
//! assert_eq!(address.ip, "70.41.3.18");
//! ```

use http::HeaderMap;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::net::{IpAddr, Ipv6Addr};
use std::sync::Arc;

/// The header carrying the forwarded address chain.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

type TrustFn = dyn Fn(&str) -> bool + Send + Sync;

/// Named address classes that can be trusted as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustKeyword {
    /// `127.0.0.0/8` and `::1`
    Loopback,
    /// private IPv4 ranges, IPv4/IPv6 link-local and IPv6 unique-local addresses
    UniqueLocal,
}

impl TrustKeyword {
    pub fn parse(keyword: &str) -> Option<Self> {
        match keyword.trim() {
            "loopback" => Some(Self::Loopback),
            "uniquelocal" => Some(Self::UniqueLocal),
            _ => None,
        }
    }

    /// Whether `address` belongs to this class. Unparsable addresses never do.
    pub fn contains(self, address: &str) -> bool {
        let Some(ip) = parse_ip(address) else {
            return false;
        };
        match self {
            Self::Loopback => ip.is_loopback(),
            Self::UniqueLocal => match ip {
                IpAddr::V4(v4) => v4.is_private() || v4.is_link_local(),
                IpAddr::V6(v6) => is_unique_local_v6(&v6) || is_link_local_v6(&v6),
            },
        }
    }
}

/// The trust policy for forwarded addresses.
#[derive(Clone, Default)]
pub enum TrustProxy {
    /// Forwarded headers are ignored entirely.
    #[default]
    Disabled,
    /// The leftmost forwarded address is the client.
    TrustAll,
    /// Trust this many hops counted from the server side.
    Hops(usize),
    /// Trust every hop belonging to an address class.
    Keyword(TrustKeyword),
    /// Trust exactly these addresses.
    AddressList(Vec<String>),
    /// Trust the hops accepted by a user supplied predicate.
    Predicate(Arc<TrustFn>),
}

impl TrustProxy {
    /// Creates a predicate based policy.
    pub fn predicate<F>(f: F) -> Self
    where
        F: Fn(&str) -> bool + Send + Sync + 'static,
    {
        Self::Predicate(Arc::new(f))
    }

    /// Parses the string form of the setting: a keyword, or a comma separated address list.
    pub fn parse(value: &str) -> Self {
        if let Some(keyword) = TrustKeyword::parse(value) {
            return Self::Keyword(keyword);
        }
        let addresses = split_chain(value).map(str::to_owned).collect::<Vec<_>>();
        if addresses.is_empty() { Self::Disabled } else { Self::AddressList(addresses) }
    }

    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled)
    }

    fn trusts(&self, address: &str) -> bool {
        match self {
            Self::Keyword(keyword) => keyword.contains(address),
            Self::AddressList(list) => list.iter().any(|trusted| same_address(trusted, address)),
            Self::Predicate(f) => f(address),
            Self::TrustAll => true,
            Self::Disabled | Self::Hops(_) => false,
        }
    }
}

impl fmt::Debug for TrustProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled => f.write_str("Disabled"),
            Self::TrustAll => f.write_str("TrustAll"),
            Self::Hops(n) => f.debug_tuple("Hops").field(n).finish(),
            Self::Keyword(keyword) => f.debug_tuple("Keyword").field(keyword).finish(),
            Self::AddressList(list) => f.debug_tuple("AddressList").field(list).finish(),
            Self::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<bool> for TrustProxy {
    fn from(trust: bool) -> Self {
        if trust { Self::TrustAll } else { Self::Disabled }
    }
}

impl From<usize> for TrustProxy {
    fn from(hops: usize) -> Self {
        Self::Hops(hops)
    }
}

impl From<&str> for TrustProxy {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<Vec<String>> for TrustProxy {
    fn from(addresses: Vec<String>) -> Self {
        Self::AddressList(addresses)
    }
}

/// Accepts the configuration forms `true`, `2`, `"loopback"`, `"10.0.0.1, 10.0.0.2"` and
/// `["10.0.0.1", "10.0.0.2"]`.
impl<'de> Deserialize<'de> for TrustProxy {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TrustProxyVisitor;

        impl<'de> Visitor<'de> for TrustProxyVisitor {
            type Value = TrustProxy;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a boolean, a hop count, a keyword, or a list of addresses")
            }

            fn visit_bool<E: de::Error>(self, v: bool) -> Result<Self::Value, E> {
                Ok(TrustProxy::from(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<Self::Value, E> {
                usize::try_from(v).map(TrustProxy::Hops).map_err(E::custom)
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<Self::Value, E> {
                usize::try_from(v).map(TrustProxy::Hops).map_err(E::custom)
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(TrustProxy::parse(v))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut addresses = Vec::new();
                while let Some(address) = seq.next_element::<String>()? {
                    addresses.push(address);
                }
                Ok(TrustProxy::AddressList(addresses))
            }
        }

        deserializer.deserialize_any(TrustProxyVisitor)
    }
}

/// The effective client address and the forwarded chain that was accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientAddress {
    pub ip: String,
    /// Client first, left to right.
    pub ips: Vec<String>,
}

/// Computes the client address for a request.
pub fn resolve(peer: &str, forwarded_for: Option<&str>, setting: &TrustProxy) -> ClientAddress {
    let peer_only = || ClientAddress { ip: peer.to_owned(), ips: Vec::new() };

    if !setting.is_enabled() {
        return peer_only();
    }

    let chain = forwarded_for.map(|header| split_chain(header).collect::<Vec<_>>()).unwrap_or_default();
    if chain.is_empty() {
        return peer_only();
    }

    let index = match setting {
        TrustProxy::TrustAll => 0,
        TrustProxy::Hops(hops) => (chain.len() - 1).saturating_sub(*hops),
        _ => chain.iter().rposition(|address| !setting.trusts(address)).unwrap_or(0),
    };

    let ips = if matches!(setting, TrustProxy::TrustAll) { chain.clone() } else { chain[..=index].to_vec() };
    ClientAddress { ip: chain[index].to_owned(), ips: ips.into_iter().map(str::to_owned).collect() }
}

/// Joins every `X-Forwarded-For` line, in the order received, into one chain value.
///
/// Proxies may append a new header line instead of extending the existing one. Lines that
/// are not visible ASCII are skipped.
pub fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let lines = headers.get_all(X_FORWARDED_FOR).iter().filter_map(|value| value.to_str().ok()).collect::<Vec<_>>();
    if lines.is_empty() { None } else { Some(lines.join(",")) }
}

fn split_chain(header: &str) -> impl Iterator<Item = &str> {
    header.split(',').map(str::trim).filter(|entry| !entry.is_empty())
}

fn parse_ip(address: &str) -> Option<IpAddr> {
    let address = address.trim().trim_start_matches('[').trim_end_matches(']');
    let ip = address.parse::<IpAddr>().ok()?;
    Some(match ip {
        IpAddr::V6(v6) => v6.to_ipv4_mapped().map_or(IpAddr::V6(v6), IpAddr::V4),
        v4 @ IpAddr::V4(_) => v4,
    })
}

fn same_address(trusted: &str, address: &str) -> bool {
    match (parse_ip(trusted), parse_ip(address)) {
        (Some(a), Some(b)) => a == b,
        _ => trusted.trim() == address.trim(),
    }
}

fn is_unique_local_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xfe00) == 0xfc00
}

fn is_link_local_v6(ip: &Ipv6Addr) -> bool {
    (ip.segments()[0] & 0xffc0) == 0xfe80
}

/// Whether `address` is the IPv4 loopback network or `::1`.
pub fn is_loopback(address: &str) -> bool {
    TrustKeyword::Loopback.contains(address)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHAIN: &str = "203.0.113.50, 70.41.3.18, 150.172.238.178";
    const PEER: &str = "10.0.0.1";

    fn full_chain() -> Vec<String> {
        vec!["203.0.113.50".into(), "70.41.3.18".into(), "150.172.238.178".into()]
    }

    #[test]
    fn test_forwarded_for_joins_header_lines() {
        let mut headers = HeaderMap::new();
        assert_eq!(forwarded_for(&headers), None);

        headers.append(X_FORWARDED_FOR, "6.6.6.6".parse().unwrap());
        headers.append(X_FORWARDED_FOR, "203.0.113.50, 70.41.3.18".parse().unwrap());
        let chain = forwarded_for(&headers).unwrap();
        assert_eq!(chain, "6.6.6.6,203.0.113.50, 70.41.3.18");

        let address = resolve(PEER, Some(&chain), &TrustProxy::Hops(1));
        assert_eq!(address.ip, "203.0.113.50");
    }

    #[test]
    fn test_disabled_ignores_header() {
        let address = resolve(PEER, Some(CHAIN), &TrustProxy::Disabled);
        assert_eq!(address.ip, PEER);
        assert!(address.ips.is_empty());
    }

    #[test]
    fn test_trust_all() {
        let address = resolve(PEER, Some(CHAIN), &TrustProxy::TrustAll);
        assert_eq!(address.ip, "203.0.113.50");
        assert_eq!(address.ips, full_chain());
    }

    #[test]
    fn test_hops() {
        let address = resolve(PEER, Some(CHAIN), &TrustProxy::Hops(1));
        assert_eq!(address.ip, "70.41.3.18");
        assert_eq!(address.ips, vec!["203.0.113.50".to_owned(), "70.41.3.18".to_owned()]);

        let address = resolve(PEER, Some(CHAIN), &TrustProxy::Hops(2));
        assert_eq!(address.ip, "203.0.113.50");
        assert_eq!(address.ips, vec!["203.0.113.50".to_owned()]);

        let address = resolve(PEER, Some(CHAIN), &TrustProxy::Hops(10));
        assert_eq!(address.ip, "203.0.113.50");

        let address = resolve(PEER, Some(CHAIN), &TrustProxy::Hops(0));
        assert_eq!(address.ip, "150.172.238.178");
        assert_eq!(address.ips, full_chain());
    }

    #[test]
    fn test_absent_header_falls_back_to_peer() {
        for setting in [TrustProxy::TrustAll, TrustProxy::Hops(1), TrustProxy::Keyword(TrustKeyword::Loopback)] {
            let address = resolve(PEER, None, &setting);
            assert_eq!(address.ip, PEER);
            assert!(address.ips.is_empty());
        }
    }

    #[test]
    fn test_keyword_walks_backward() {
        let chain = "198.51.100.7, 10.1.2.3, 192.168.0.5";
        let address = resolve(PEER, Some(chain), &TrustProxy::Keyword(TrustKeyword::UniqueLocal));
        assert_eq!(address.ip, "198.51.100.7");

        let chain = "198.51.100.7, 8.8.8.8, 127.0.0.1";
        let address = resolve(PEER, Some(chain), &TrustProxy::Keyword(TrustKeyword::Loopback));
        assert_eq!(address.ip, "8.8.8.8");
        assert_eq!(address.ips, vec!["198.51.100.7".to_owned(), "8.8.8.8".to_owned()]);
    }

    #[test]
    fn test_keyword_all_trusted_yields_leftmost() {
        let chain = "127.0.0.2, ::1";
        let address = resolve(PEER, Some(chain), &TrustProxy::Keyword(TrustKeyword::Loopback));
        assert_eq!(address.ip, "127.0.0.2");
    }

    #[test]
    fn test_address_list() {
        let setting = TrustProxy::AddressList(vec!["150.172.238.178".into(), "70.41.3.18".into()]);
        let address = resolve(PEER, Some(CHAIN), &setting);
        assert_eq!(address.ip, "203.0.113.50");

        let setting = TrustProxy::AddressList(vec!["150.172.238.178".into()]);
        let address = resolve(PEER, Some(CHAIN), &setting);
        assert_eq!(address.ip, "70.41.3.18");
    }

    #[test]
    fn test_predicate() {
        let setting = TrustProxy::predicate(|address| address.starts_with("150."));
        let address = resolve(PEER, Some(CHAIN), &setting);
        assert_eq!(address.ip, "70.41.3.18");
    }

    #[test]
    fn test_address_classes() {
        assert!(is_loopback("127.0.0.1"));
        assert!(is_loopback("127.8.9.10"));
        assert!(is_loopback("::1"));
        assert!(is_loopback("::ffff:127.0.0.1"));
        assert!(!is_loopback("10.0.0.1"));
        assert!(!is_loopback("not-an-ip"));

        let unique_local = TrustKeyword::UniqueLocal;
        for address in ["10.0.0.1", "172.16.5.4", "172.31.255.255", "192.168.1.1", "169.254.0.1", "fd00::1", "fe80::1"] {
            assert!(unique_local.contains(address), "{address} should be unique local");
        }
        for address in ["172.32.0.1", "8.8.8.8", "2001:db8::1", "127.0.0.1"] {
            assert!(!unique_local.contains(address), "{address} should not be unique local");
        }
    }

    #[test]
    fn test_parse_setting() {
        assert!(matches!(TrustProxy::parse("loopback"), TrustProxy::Keyword(TrustKeyword::Loopback)));
        assert!(matches!(TrustProxy::parse("uniquelocal"), TrustProxy::Keyword(TrustKeyword::UniqueLocal)));
        match TrustProxy::parse("10.0.0.1, 10.0.0.2") {
            TrustProxy::AddressList(list) => assert_eq!(list, vec!["10.0.0.1".to_owned(), "10.0.0.2".to_owned()]),
            other => panic!("unexpected setting {other:?}"),
        }
        assert!(!TrustProxy::parse("").is_enabled());
    }

    #[test]
    fn test_deserialize_setting() {
        let setting: TrustProxy = serde_json::from_str("true").unwrap();
        assert!(matches!(setting, TrustProxy::TrustAll));

        let setting: TrustProxy = serde_json::from_str("false").unwrap();
        assert!(matches!(setting, TrustProxy::Disabled));

        let setting: TrustProxy = serde_json::from_str("2").unwrap();
        assert!(matches!(setting, TrustProxy::Hops(2)));

        let setting: TrustProxy = serde_json::from_str("\"loopback\"").unwrap();
        assert!(matches!(setting, TrustProxy::Keyword(TrustKeyword::Loopback)));

        let setting: TrustProxy = serde_json::from_str("[\"10.0.0.1\"]").unwrap();
        assert!(matches!(setting, TrustProxy::AddressList(list) if list == vec!["10.0.0.1".to_owned()]));

        assert!(serde_json::from_str::<TrustProxy>("-1").is_err());
    }
}

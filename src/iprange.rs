//! Canonical CIDR ranges.
//!
//! An [`IpRange`] always has its host bits zeroed, so `1.2.3.4/24` and
//! `1.2.3.0/24` are the same value and print the same way. The address
//! family comes from the syntax of the input, never from context.

use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::{FirewallError, Result};

/// Address family of a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Family {
    V4,
    V6,
}

impl Family {
    /// Full host mask length for the family.
    pub fn max_prefix_len(self) -> u8 {
        match self {
            Family::V4 => 32,
            Family::V6 => 128,
        }
    }
}

/// A network-masked address plus prefix length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IpRange(IpNet);

impl IpRange {
    /// Parse `address` or `address/prefix` of either family.
    ///
    /// A missing prefix means a single host (/32 or /128).
    ///
    /// # Examples
    /// ```
    /// use hostwall::iprange::IpRange;
    /// let range = IpRange::parse("1.2.3.4/24").unwrap();
    /// assert_eq!(range.canonical_string(), "1.2.3.0/24");
    /// assert!(IpRange::parse("1.2.3").is_err());
    /// ```
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let malformed = || FirewallError::MalformedAddress(text.to_string());

        let net = if text.contains('/') {
            text.parse::<IpNet>().map_err(|_| malformed())?
        } else {
            let addr: IpAddr = text.parse().map_err(|_| malformed())?;
            IpNet::from(addr)
        };

        Ok(Self(net.trunc()))
    }

    /// Build a range from an address and a prefix length.
    pub fn new(addr: IpAddr, prefix_len: u8) -> Result<Self> {
        IpNet::new(addr, prefix_len)
            .map(|net| Self(net.trunc()))
            .map_err(|_| FirewallError::MalformedAddress(format!("{}/{}", addr, prefix_len)))
    }

    /// Single-host range for an address.
    pub fn host(addr: IpAddr) -> Self {
        Self(IpNet::from(addr))
    }

    pub fn family(&self) -> Family {
        match self.0 {
            IpNet::V4(_) => Family::V4,
            IpNet::V6(_) => Family::V6,
        }
    }

    pub fn is_ipv4(&self) -> bool {
        self.family() == Family::V4
    }

    pub fn is_ipv6(&self) -> bool {
        self.family() == Family::V6
    }

    /// The masked network address.
    pub fn network(&self) -> IpAddr {
        self.0.network()
    }

    pub fn prefix_len(&self) -> u8 {
        self.0.prefix_len()
    }

    /// `address/prefix` with host bits zeroed.
    pub fn canonical_string(&self) -> String {
        self.0.to_string()
    }

    /// Widen the range to `prefix_len`. Ranges already at least that wide
    /// are returned unchanged.
    pub fn supernet(&self, prefix_len: u8) -> Self {
        if prefix_len >= self.prefix_len() {
            return *self;
        }
        match IpNet::new(self.network(), prefix_len) {
            Ok(net) => Self(net.trunc()),
            Err(_) => *self,
        }
    }

    /// True if `other` lies entirely inside this range (same family only).
    pub fn contains(&self, other: &IpRange) -> bool {
        self.0.contains(&other.0)
    }

    pub fn as_ipnet(&self) -> &IpNet {
        &self.0
    }
}

impl fmt::Display for IpRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for IpRange {
    type Err = FirewallError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl From<IpAddr> for IpRange {
    fn from(addr: IpAddr) -> Self {
        Self::host(addr)
    }
}

impl From<IpNet> for IpRange {
    fn from(net: IpNet) -> Self {
        Self(net.trunc())
    }
}

impl TryFrom<String> for IpRange {
    type Error = FirewallError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<IpRange> for String {
    fn from(range: IpRange) -> Self {
        range.canonical_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_ipv4() {
        assert_eq!(IpRange::parse("1.2.3.4/32").unwrap().to_string(), "1.2.3.4/32");
        assert_eq!(IpRange::parse("1.2.3.4/24").unwrap().to_string(), "1.2.3.0/24");
    }

    #[test]
    fn test_canonical_ipv6() {
        assert_eq!(
            IpRange::parse("2001:dead:beef:cafe:1234::1/128")
                .unwrap()
                .canonical_string(),
            "2001:dead:beef:cafe:1234::1/128"
        );
        assert_eq!(
            IpRange::parse("2001:dead:beef:cafe:1234::1/64")
                .unwrap()
                .canonical_string(),
            "2001:dead:beef:cafe::/64"
        );
        assert_eq!(
            IpRange::parse("2001:ba8:123:0::12/56")
                .unwrap()
                .canonical_string(),
            "2001:ba8:123::/56"
        );
    }

    #[test]
    fn test_default_prefix() {
        let v4 = IpRange::parse("192.0.2.1").unwrap();
        assert_eq!(v4.prefix_len(), 32);
        assert_eq!(v4.family(), Family::V4);

        let v6 = IpRange::parse("2001:db8::1").unwrap();
        assert_eq!(v6.prefix_len(), 128);
        assert_eq!(v6.family(), Family::V6);
    }

    #[test]
    fn test_equality_is_structural() {
        assert_eq!(
            IpRange::parse("1.2.3.4/24").unwrap(),
            IpRange::parse("1.2.3.4/24").unwrap()
        );
        assert_eq!(
            IpRange::parse("1.2.3.4/24").unwrap(),
            IpRange::parse("1.2.3.200/24").unwrap()
        );
        assert_ne!(
            IpRange::parse("1.2.3.0/24").unwrap(),
            IpRange::parse("1.2.3.0/25").unwrap()
        );
    }

    #[test]
    fn test_malformed() {
        for bad in ["", "1.2.3", "1.2.3.4.5", "1.2.3.4/33", "::/129", "host", "/24", "1.2.3.4/"] {
            assert!(
                matches!(IpRange::parse(bad), Err(FirewallError::MalformedAddress(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_whitespace_trimmed() {
        assert_eq!(
            IpRange::parse("  10.0.0.1/8\n").unwrap().to_string(),
            "10.0.0.0/8"
        );
    }

    #[test]
    fn test_new_masks_host_bits() {
        let range = IpRange::new("10.1.2.3".parse().unwrap(), 16).unwrap();
        assert_eq!(range.to_string(), "10.1.0.0/16");
        assert!(IpRange::new("10.1.2.3".parse().unwrap(), 40).is_err());
    }

    #[test]
    fn test_supernet() {
        let host = IpRange::parse("2001:db8:1:2:3:4:5:6").unwrap();
        assert_eq!(host.supernet(64).to_string(), "2001:db8:1:2::/64");

        let wide = IpRange::parse("10.0.0.0/8").unwrap();
        assert_eq!(wide.supernet(24), wide);
    }

    #[test]
    fn test_contains() {
        let net = IpRange::parse("10.0.0.0/8").unwrap();
        assert!(net.contains(&IpRange::parse("10.1.2.3").unwrap()));
        assert!(!net.contains(&IpRange::parse("11.0.0.1").unwrap()));
        assert!(!net.contains(&IpRange::parse("::1").unwrap()));
    }

    #[test]
    fn test_serde_uses_canonical_string() {
        let range = IpRange::parse("1.2.3.4/24").unwrap();
        let json = serde_json::to_string(&range).unwrap();
        assert_eq!(json, "\"1.2.3.0/24\"");

        let back: IpRange = serde_json::from_str("\"1.2.3.99/24\"").unwrap();
        assert_eq!(back, range);
        assert!(serde_json::from_str::<IpRange>("\"nope\"").is_err());
    }
}

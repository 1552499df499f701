//! IPv4 address with prefix length

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use burrow_core::{Error, Result};

/// An IPv4 address and prefix length, e.g. `10.0.0.1/24`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Ipv4Cidr {
    addr: Ipv4Addr,
    prefix: u8,
}

impl Ipv4Cidr {
    /// Create with validation of the prefix length
    ///
    /// # Errors
    /// Returns error if `prefix` is greater than 32
    pub fn new(addr: Ipv4Addr, prefix: u8) -> Result<Self> {
        if prefix > 32 {
            return Err(Error::invalid_config(format!(
                "Prefix length {prefix} out of range (max 32)"
            )));
        }
        Ok(Self { addr, prefix })
    }

    /// Address in a `/24` network
    #[must_use]
    pub const fn slash24(addr: Ipv4Addr) -> Self {
        Self { addr, prefix: 24 }
    }

    /// Host address
    #[must_use]
    pub const fn addr(&self) -> Ipv4Addr {
        self.addr
    }

    /// Prefix length
    #[must_use]
    pub const fn prefix(&self) -> u8 {
        self.prefix
    }

    /// Netmask for the prefix
    #[must_use]
    pub fn netmask(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.mask_bits())
    }

    fn mask_bits(&self) -> u32 {
        u32::MAX.checked_shl(32 - u32::from(self.prefix)).unwrap_or(0)
    }

    /// Network this address belongs to, e.g. `10.0.0.0/24`
    #[must_use]
    pub fn network(&self) -> Self {
        Self {
            addr: Ipv4Addr::from(u32::from(self.addr) & self.mask_bits()),
            prefix: self.prefix,
        }
    }

    /// Whether `addr` falls inside this network
    #[must_use]
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        u32::from(addr) & self.mask_bits() == u32::from(self.network().addr)
    }

    /// Whether both addresses share prefix length and network
    #[must_use]
    pub fn same_subnet(&self, other: &Self) -> bool {
        self.prefix == other.prefix && self.network() == other.network()
    }
}

impl fmt::Display for Ipv4Cidr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.addr, self.prefix)
    }
}

impl FromStr for Ipv4Cidr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (addr, prefix) = s
            .split_once('/')
            .ok_or_else(|| Error::invalid_config(format!("Expected address/prefix, got '{s}'")))?;

        let addr = addr
            .parse::<Ipv4Addr>()
            .map_err(|e| Error::invalid_config(format!("Invalid IPv4 address '{addr}': {e}")))?;
        let prefix = prefix
            .parse::<u8>()
            .map_err(|e| Error::invalid_config(format!("Invalid prefix '{prefix}': {e}")))?;

        Self::new(addr, prefix)
    }
}

impl TryFrom<String> for Ipv4Cidr {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<Ipv4Cidr> for String {
    fn from(cidr: Ipv4Cidr) -> Self {
        cidr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let cidr: Ipv4Cidr = "10.0.0.1/24".parse().unwrap();
        assert_eq!(cidr.addr(), Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(cidr.prefix(), 24);
        assert_eq!(cidr.to_string(), "10.0.0.1/24");
    }

    #[test]
    fn test_parse_errors() {
        assert!("10.0.0.1".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.300/24".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.1/33".parse::<Ipv4Cidr>().is_err());
        assert!("10.0.0.1/x".parse::<Ipv4Cidr>().is_err());
    }

    #[test]
    fn test_network_and_contains() {
        let cidr: Ipv4Cidr = "10.0.1.2/24".parse().unwrap();
        assert_eq!(cidr.network().to_string(), "10.0.1.0/24");
        assert_eq!(cidr.netmask(), Ipv4Addr::new(255, 255, 255, 0));
        assert!(cidr.contains(Ipv4Addr::new(10, 0, 1, 254)));
        assert!(!cidr.contains(Ipv4Addr::new(10, 0, 2, 1)));
    }

    #[test]
    fn test_prefix_edges() {
        let any: Ipv4Cidr = "0.0.0.0/0".parse().unwrap();
        assert!(any.contains(Ipv4Addr::new(8, 8, 8, 8)));

        let host: Ipv4Cidr = "10.0.0.1/32".parse().unwrap();
        assert!(host.contains(Ipv4Addr::new(10, 0, 0, 1)));
        assert!(!host.contains(Ipv4Addr::new(10, 0, 0, 2)));
    }

    #[test]
    fn test_same_subnet() {
        let a: Ipv4Cidr = "10.0.0.1/24".parse().unwrap();
        let b: Ipv4Cidr = "10.0.0.2/24".parse().unwrap();
        let c: Ipv4Cidr = "10.0.1.2/24".parse().unwrap();
        let d: Ipv4Cidr = "10.0.0.2/16".parse().unwrap();

        assert!(a.same_subnet(&b));
        assert!(!a.same_subnet(&c));
        assert!(!a.same_subnet(&d));
    }
}

//! Network link configuration

use serde::{Deserialize, Serialize};

use burrow_core::{Error, InterfaceName, NetNamespaceName, Result};

use crate::addr::Ipv4Cidr;

/// Masquerade settings giving the namespace outbound reachability
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NatConfig {
    /// Source subnet to masquerade
    pub subnet: Ipv4Cidr,

    /// Outbound interface; any interface when unset
    pub outbound: Option<InterfaceName>,
}

/// A named namespace joined to the host by a veth pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network namespace name
    pub namespace: NetNamespaceName,

    /// Host-side veth end
    pub host_if: InterfaceName,

    /// Namespace-side veth end
    pub ns_if: InterfaceName,

    /// Address of the host-side end
    pub host_addr: Ipv4Cidr,

    /// Address of the namespace-side end
    pub ns_addr: Ipv4Cidr,

    /// Optional forwarding and masquerade
    pub nat: Option<NatConfig>,
}

/// Namespace, host end and namespace end of a built-in layout
type PresetNames = [&'static str; 3];

const BLUE: PresetNames = ["blue", "veth-host", "veth-blue"];
const INET: PresetNames = ["inet-test", "veth-host-inet", "veth-inet"];

const fn preset_names_valid([namespace, host_if, ns_if]: PresetNames) -> bool {
    NetNamespaceName::is_valid_static(namespace)
        && InterfaceName::is_valid_static(host_if)
        && InterfaceName::is_valid_static(ns_if)
}

const _: () = assert!(preset_names_valid(BLUE) && preset_names_valid(INET));

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::preset(BLUE, [10, 0, 0, 1], [10, 0, 0, 2], false)
    }
}

impl NetworkConfig {
    /// Create a configuration with the default `blue` layout
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespace with outbound access through masquerade on `10.0.1.0/24`
    #[must_use]
    pub fn internet() -> Self {
        Self::preset(INET, [10, 0, 1, 1], [10, 0, 1, 2], true)
    }

    fn preset(names: PresetNames, host_ip: [u8; 4], ns_ip: [u8; 4], nat: bool) -> Self {
        let [namespace, host_if, ns_if] = names;
        let host_addr = Ipv4Cidr::slash24(host_ip.into());
        let ns_addr = Ipv4Cidr::slash24(ns_ip.into());

        Self {
            namespace: NetNamespaceName::from_static(namespace),
            host_if: InterfaceName::from_static(host_if),
            ns_if: InterfaceName::from_static(ns_if),
            host_addr,
            ns_addr,
            nat: nat.then(|| NatConfig {
                subnet: ns_addr.network(),
                outbound: None,
            }),
        }
    }

    /// Set the namespace name
    #[must_use]
    pub fn with_namespace(mut self, namespace: NetNamespaceName) -> Self {
        self.namespace = namespace;
        self
    }

    /// Set both veth end names
    #[must_use]
    pub fn with_interfaces(mut self, host_if: InterfaceName, ns_if: InterfaceName) -> Self {
        self.host_if = host_if;
        self.ns_if = ns_if;
        self
    }

    /// Set both end addresses
    #[must_use]
    pub const fn with_addresses(mut self, host_addr: Ipv4Cidr, ns_addr: Ipv4Cidr) -> Self {
        self.host_addr = host_addr;
        self.ns_addr = ns_addr;
        self
    }

    /// Enable masquerade for the link's subnet
    #[must_use]
    pub fn with_nat(mut self, outbound: Option<InterfaceName>) -> Self {
        self.nat = Some(NatConfig {
            subnet: self.ns_addr.network(),
            outbound,
        });
        self
    }

    /// Enable masquerade for an explicit subnet
    #[must_use]
    pub fn with_nat_subnet(mut self, subnet: Ipv4Cidr, outbound: Option<InterfaceName>) -> Self {
        self.nat = Some(NatConfig {
            subnet: subnet.network(),
            outbound,
        });
        self
    }

    /// Disable masquerade
    #[must_use]
    pub fn without_nat(mut self) -> Self {
        self.nat = None;
        self
    }

    /// Check the addressing policy
    ///
    /// Both ends need distinct addresses in the same subnet, distinct
    /// interface names, and a NAT subnet covering the namespace address.
    pub fn validate(&self) -> Result<()> {
        if self.host_if == self.ns_if {
            return Err(Error::invalid_config(format!(
                "Host and namespace interfaces must differ (both '{}')",
                self.host_if
            )));
        }

        if self.host_addr.addr() == self.ns_addr.addr() {
            return Err(Error::invalid_config(format!(
                "Host and namespace addresses must differ (both {})",
                self.host_addr.addr()
            )));
        }

        if !self.host_addr.same_subnet(&self.ns_addr) {
            return Err(Error::invalid_config(format!(
                "Addresses {} and {} are not in the same subnet",
                self.host_addr, self.ns_addr
            )));
        }

        for cidr in [self.host_addr, self.ns_addr] {
            let network = cidr.network().addr();
            if cidr.prefix() < 31 && cidr.addr() == network {
                return Err(Error::invalid_config(format!(
                    "{cidr} is the network address of its subnet"
                )));
            }
        }

        if let Some(nat) = &self.nat {
            if !nat.subnet.contains(self.ns_addr.addr()) {
                return Err(Error::invalid_config(format!(
                    "NAT subnet {} does not contain namespace address {}",
                    nat.subnet, self.ns_addr
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_blue() {
        let config = NetworkConfig::default();
        assert_eq!(config.namespace.as_str(), "blue");
        assert_eq!(config.host_if.as_str(), "veth-host");
        assert_eq!(config.ns_if.as_str(), "veth-blue");
        assert_eq!(config.host_addr.to_string(), "10.0.0.1/24");
        assert_eq!(config.ns_addr.to_string(), "10.0.0.2/24");
        assert!(config.nat.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_internet_preset() {
        let config = NetworkConfig::internet();
        assert_eq!(config.namespace.as_str(), "inet-test");
        let nat = config.nat.as_ref().unwrap();
        assert_eq!(nat.subnet.to_string(), "10.0.1.0/24");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_same_address() {
        let addr: Ipv4Cidr = "10.0.0.1/24".parse().unwrap();
        let config = NetworkConfig::new().with_addresses(addr, addr);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_different_subnets() {
        let config = NetworkConfig::new().with_addresses(
            "10.0.0.1/24".parse().unwrap(),
            "10.0.5.2/24".parse().unwrap(),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_network_address() {
        let config = NetworkConfig::new().with_addresses(
            "10.0.0.0/24".parse().unwrap(),
            "10.0.0.2/24".parse().unwrap(),
        );
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_same_interface() {
        let name = InterfaceName::new("veth0").unwrap();
        let config = NetworkConfig::new().with_interfaces(name.clone(), name);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_nat_subnet_must_cover_namespace() {
        let config = NetworkConfig::new().with_nat_subnet("192.168.0.0/16".parse().unwrap(), None);
        assert!(config.validate().is_err());

        let config = NetworkConfig::new().with_nat(None);
        assert_eq!(config.nat.as_ref().unwrap().subnet.to_string(), "10.0.0.0/24");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serde_roundtrip() {
        let config = NetworkConfig::internet();
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"10.0.1.0/24\""));
        let back: NetworkConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}

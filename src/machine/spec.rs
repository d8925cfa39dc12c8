use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Which of a machine's addresses a probe targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AddressKind {
    /// Management (IPMI/BMC) interface
    Mgmt,
    /// Primary IPv4 address of the host
    V4,
    /// Primary IPv6 address of the host
    V6,
}

impl AddressKind {
    pub const ALL: [AddressKind; 3] = [AddressKind::Mgmt, AddressKind::V4, AddressKind::V6];

    pub const fn as_str(&self) -> &'static str {
        match self {
            AddressKind::Mgmt => "mgmt",
            AddressKind::V4 => "v4",
            AddressKind::V6 => "v6",
        }
    }
}

impl fmt::Display for AddressKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AddressKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mgmt" | "ipmi" => Ok(AddressKind::Mgmt),
            "v4" | "ipv4" => Ok(AddressKind::V4),
            "v6" | "ipv6" => Ok(AddressKind::V6),
            other => Err(format!("unknown address kind {:?}", other)),
        }
    }
}

/// Static identity of one machine. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineSpec {
    /// Short hostname; also the node name used to scope node-agent RPCs
    pub name: String,
    /// Fully-qualified domain name (informational)
    pub fqdn: String,
    /// Probe targets by address kind. Absent kinds are never probed.
    pub addresses: BTreeMap<AddressKind, IpAddr>,
}

impl MachineSpec {
    pub fn new(name: impl Into<String>, fqdn: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fqdn: fqdn.into(),
            addresses: BTreeMap::new(),
        }
    }

    pub fn with_address(mut self, kind: AddressKind, addr: IpAddr) -> Self {
        self.addresses.insert(kind, addr);
        self
    }

    pub fn address(&self, kind: AddressKind) -> Option<IpAddr> {
        self.addresses.get(&kind).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_kind_names() {
        assert_eq!(AddressKind::Mgmt.to_string(), "mgmt");
        assert_eq!("ipv6".parse::<AddressKind>().unwrap(), AddressKind::V6);
        assert!("v5".parse::<AddressKind>().is_err());
    }

    #[test]
    fn test_spec_addresses() {
        let spec = MachineSpec::new("node-1", "node-1.example.com")
            .with_address(AddressKind::V4, "10.0.0.1".parse().unwrap());

        assert_eq!(spec.address(AddressKind::V4), Some("10.0.0.1".parse().unwrap()));
        assert_eq!(spec.address(AddressKind::V6), None);
    }
}

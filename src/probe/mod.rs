//! Liveness probing
//!
//! One `LivenessProber` per (machine, address kind) sends ICMP echo
//! requests on a fixed cadence and reports every reply to its owner. The
//! prober never decides up/down itself; `LivenessCell` applies the
//! staleness rule to the recorded reply times.

pub mod icmp;
pub mod liveness;

pub use icmp::IcmpEchoFactory;
pub use liveness::{LivenessCell, LivenessProber, DEFAULT_ECHO_INTERVAL, DEFAULT_STALENESS};

use crate::machine::AddressKind;
use crate::{Result, TalosmonError};
use async_trait::async_trait;
use std::net::IpAddr;
use std::time::Duration;

/// A single echo stream towards one address.
#[async_trait]
pub trait Echo: Send {
    /// Sends echo request `seq` and waits for the matching reply.
    async fn echo(&mut self, seq: u16) -> Result<Duration>;
}

/// Opens echo streams. Shared by every prober in the fleet.
#[async_trait]
pub trait EchoFactory: Send + Sync {
    /// `timeout` bounds how long a single `echo` call waits for its reply.
    async fn open(&self, kind: AddressKind, addr: IpAddr, timeout: Duration)
        -> Result<Box<dyn Echo>>;
}

/// Rejects addresses that can never answer an echo for `kind`.
pub fn validate_address(kind: AddressKind, addr: IpAddr) -> Result<()> {
    let invalid = |reason: &str| TalosmonError::AddressInvalid {
        kind,
        address: addr.to_string(),
        reason: reason.to_string(),
    };

    if addr.is_unspecified() {
        return Err(invalid("unspecified address"));
    }
    if addr.is_multicast() {
        return Err(invalid("multicast address"));
    }

    match (kind, addr) {
        (AddressKind::V4, IpAddr::V6(_)) => Err(invalid("expected an IPv4 address")),
        (AddressKind::V6, IpAddr::V4(_)) => Err(invalid("expected an IPv6 address")),
        (_, IpAddr::V4(v4)) if v4.is_broadcast() => Err(invalid("broadcast address")),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_address() {
        assert!(validate_address(AddressKind::V4, "10.0.0.1".parse().unwrap()).is_ok());
        assert!(validate_address(AddressKind::Mgmt, "fd00::1".parse().unwrap()).is_ok());
        assert!(validate_address(AddressKind::V6, "2001:db8::1".parse().unwrap()).is_ok());

        let err = validate_address(AddressKind::V4, "0.0.0.0".parse().unwrap()).unwrap_err();
        assert!(err.to_string().contains("unspecified"));

        assert!(validate_address(AddressKind::V4, "2001:db8::1".parse().unwrap()).is_err());
        assert!(validate_address(AddressKind::V6, "10.0.0.1".parse().unwrap()).is_err());
        assert!(validate_address(AddressKind::Mgmt, "224.0.0.1".parse().unwrap()).is_err());
        assert!(validate_address(AddressKind::Mgmt, "255.255.255.255".parse().unwrap()).is_err());
    }
}

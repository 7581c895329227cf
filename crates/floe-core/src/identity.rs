//! Node identity: the address and port pair a node is known by.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A node's identity within a cloud.
///
/// The node serves on `port` (TCP) and exchanges control datagrams on
/// `port + 1` (UDP). Ordering is by address, then port, so sets of
/// identities iterate the same way on every node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "IdentityRepr", into = "IdentityRepr")]
pub struct NodeIdentity {
    ip: IpAddr,
    port: u16,
}

/// Wire form; goes through [`NodeIdentity::new`] on the way in.
#[derive(Clone, Serialize, Deserialize)]
struct IdentityRepr {
    ip: IpAddr,
    port: u16,
}

impl TryFrom<IdentityRepr> for NodeIdentity {
    type Error = IdentityError;

    fn try_from(repr: IdentityRepr) -> Result<Self, Self::Error> {
        Self::new(repr.ip, repr.port)
    }
}

impl From<NodeIdentity> for IdentityRepr {
    fn from(id: NodeIdentity) -> Self {
        Self {
            ip: id.ip,
            port: id.port,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    #[error("port {0} leaves no room for a control port (must be 1..=65534)")]
    PortOutOfRange(u32),
    #[error("invalid node address '{0}'")]
    InvalidAddress(String),
}

impl NodeIdentity {
    /// Build an identity, rejecting base ports whose control port would
    /// not fit in a `u16`.
    pub fn new(ip: IpAddr, port: u16) -> Result<Self, IdentityError> {
        if port == 0 || port == u16::MAX {
            return Err(IdentityError::PortOutOfRange(port.into()));
        }
        Ok(Self { ip, port })
    }

    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// The TCP listener port.
    pub fn base_port(&self) -> u16 {
        self.port
    }

    /// The UDP control port, always `base_port + 1`.
    pub fn control_port(&self) -> u16 {
        self.port + 1
    }

    pub fn base_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.base_port())
    }

    pub fn control_addr(&self) -> SocketAddr {
        SocketAddr::new(self.ip, self.control_port())
    }

    /// Parse a single address entry such as `10.0.0.1:54321`,
    /// `[fe80::1]:54321`, `/10.0.0.1:54321` or a bare `10.0.0.1`.
    /// Bare addresses get `default_port`.
    pub fn parse_entry(entry: &str, default_port: u16) -> Result<Self, IdentityError> {
        let trimmed = entry.trim();
        let trimmed = trimmed.strip_prefix('/').unwrap_or(trimmed);
        let invalid = || IdentityError::InvalidAddress(entry.trim().to_string());

        if let Ok(addr) = trimmed.parse::<SocketAddr>() {
            return Self::new(addr.ip(), addr.port());
        }
        let bare = trimmed
            .strip_prefix('[')
            .and_then(|s| s.strip_suffix(']'))
            .unwrap_or(trimmed);
        let ip: IpAddr = bare.parse().map_err(|_| invalid())?;
        Self::new(ip, default_port)
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base_addr())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    fn v4(a: u8, b: u8, c: u8, d: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(a, b, c, d))
    }

    #[test]
    fn control_port_is_base_plus_one() {
        for port in [1u16, 1024, 54321, 65534] {
            let id = NodeIdentity::new(v4(10, 0, 0, 1), port).unwrap();
            assert_eq!(id.control_port(), port + 1);
            assert_eq!(id.control_addr().port(), port + 1);
        }
    }

    #[test]
    fn rejects_ports_without_control_room() {
        assert_eq!(
            NodeIdentity::new(v4(10, 0, 0, 1), 65535),
            Err(IdentityError::PortOutOfRange(65535))
        );
        assert!(NodeIdentity::new(v4(10, 0, 0, 1), 0).is_err());
    }

    #[test]
    fn parse_entry_forms() {
        let id = NodeIdentity::parse_entry("10.0.0.1:6000", 54321).unwrap();
        assert_eq!(id.ip(), v4(10, 0, 0, 1));
        assert_eq!(id.base_port(), 6000);

        let id = NodeIdentity::parse_entry("/10.0.0.2:6001", 54321).unwrap();
        assert_eq!(id.ip(), v4(10, 0, 0, 2));
        assert_eq!(id.base_port(), 6001);

        let id = NodeIdentity::parse_entry("  10.0.0.3 ", 54321).unwrap();
        assert_eq!(id.base_port(), 54321);

        let id = NodeIdentity::parse_entry("[::1]:7000", 54321).unwrap();
        assert_eq!(id.ip(), IpAddr::V6(Ipv6Addr::LOCALHOST));
        assert_eq!(id.base_port(), 7000);

        let id = NodeIdentity::parse_entry("[::1]", 54321).unwrap();
        assert_eq!(id.base_port(), 54321);
    }

    #[test]
    fn parse_entry_rejects_hostnames() {
        assert!(matches!(
            NodeIdentity::parse_entry("node-a.example.com:54321", 54321),
            Err(IdentityError::InvalidAddress(_))
        ));
    }

    #[test]
    fn display_matches_socket_addr() {
        let id = NodeIdentity::new(v4(192, 168, 1, 5), 54321).unwrap();
        assert_eq!(id.to_string(), "192.168.1.5:54321");
    }

    #[test]
    fn ordering_is_address_then_port() {
        let a = NodeIdentity::new(v4(10, 0, 0, 1), 9000).unwrap();
        let b = NodeIdentity::new(v4(10, 0, 0, 2), 1000).unwrap();
        let c = NodeIdentity::new(v4(10, 0, 0, 2), 2000).unwrap();
        assert!(a < b);
        assert!(b < c);
    }
}

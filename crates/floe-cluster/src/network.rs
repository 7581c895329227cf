//! Node identity resolution and socket binding.
//!
//! Picks the one address this node will be known by, then binds the TCP
//! listener on the base port and the UDP control socket on base port + 1.
//! Address precedence:
//!
//! 1. explicit `ip` from the configuration, used as given
//! 2. the first interface address inside any range of `network`
//! 3. the first non-loopback interface (IPv4 first), loopback last

use std::fmt;
use std::net::{IpAddr, TcpListener, UdpSocket};

use floe_core::{ClusterConfig, NodeIdentity};
use ipnet::IpNet;
use tracing::{debug, warn};

use crate::error::{BootError, BootResult};

/// One address on one local interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInterface {
    pub name: String,
    pub ip: IpAddr,
    /// OS interface index, needed for IPv6 multicast.
    pub index: Option<u32>,
}

impl LocalInterface {
    pub fn new(name: impl Into<String>, ip: IpAddr) -> Self {
        Self {
            name: name.into(),
            ip,
            index: None,
        }
    }

    pub fn is_loopback(&self) -> bool {
        self.ip.is_loopback()
    }

    fn is_link_local(&self) -> bool {
        match self.ip {
            IpAddr::V4(ip) => ip.is_link_local(),
            IpAddr::V6(ip) => ip.is_unicast_link_local(),
        }
    }
}

/// Enumerate the addresses of every local interface, in OS order.
pub fn local_interfaces() -> BootResult<Vec<LocalInterface>> {
    let interfaces = if_addrs::get_if_addrs().map_err(BootError::Interfaces)?;
    Ok(interfaces
        .into_iter()
        .map(|iface| LocalInterface {
            ip: iface.ip(),
            index: iface.index,
            name: iface.name,
        })
        .collect())
}

/// How the self address was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressSource {
    Explicit,
    Network,
    Default,
    Loopback,
}

impl fmt::Display for AddressSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AddressSource::Explicit => "explicit ip",
            AddressSource::Network => "network specification",
            AddressSource::Default => "default interface",
            AddressSource::Loopback => "loopback fallback",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub ip: IpAddr,
    /// The interface owning `ip`, when it is a local address.
    pub interface: Option<LocalInterface>,
    pub source: AddressSource,
}

/// Choose this node's address from `interfaces`.
pub fn resolve_address(
    config: &ClusterConfig,
    interfaces: &[LocalInterface],
) -> BootResult<ResolvedAddress> {
    let networks = config.networks()?;

    if let Some(ip) = config.explicit_ip()? {
        if !networks.is_empty() && !networks.iter().any(|net| net.contains(&ip)) {
            warn!(
                %ip,
                network = ?config.network,
                "explicit ip is outside the network specification; using it anyway"
            );
        }
        return Ok(ResolvedAddress {
            ip,
            interface: interfaces.iter().find(|i| i.ip == ip).cloned(),
            source: AddressSource::Explicit,
        });
    }

    if !networks.is_empty() {
        return match first_in_networks(interfaces, &networks) {
            Some(iface) => {
                debug!(
                    interface = %iface.name,
                    ip = %iface.ip,
                    "interface matched network specification"
                );
                Ok(ResolvedAddress {
                    ip: iface.ip,
                    interface: Some(iface.clone()),
                    source: AddressSource::Network,
                })
            }
            None => Err(BootError::NoMatchingInterface {
                spec: config.network.clone().unwrap_or_default(),
            }),
        };
    }

    default_address(interfaces)
}

fn first_in_networks<'a>(
    interfaces: &'a [LocalInterface],
    networks: &[IpNet],
) -> Option<&'a LocalInterface> {
    interfaces
        .iter()
        .find(|iface| networks.iter().any(|net| net.contains(&iface.ip)))
}

fn default_address(interfaces: &[LocalInterface]) -> BootResult<ResolvedAddress> {
    let usable = |iface: &&LocalInterface| !iface.is_loopback() && !iface.is_link_local();
    let picked = interfaces
        .iter()
        .filter(usable)
        .find(|iface| iface.ip.is_ipv4())
        .or_else(|| interfaces.iter().filter(usable).find(|iface| iface.ip.is_ipv6()));

    if let Some(iface) = picked {
        return Ok(ResolvedAddress {
            ip: iface.ip,
            interface: Some(iface.clone()),
            source: AddressSource::Default,
        });
    }

    let loopback = interfaces
        .iter()
        .filter(|iface| iface.is_loopback())
        .min_by_key(|iface| iface.ip.is_ipv6())
        .ok_or(BootError::NoInterfaces)?;
    warn!(
        ip = %loopback.ip,
        "no external interface found; falling back to loopback, other hosts cannot join this cloud"
    );
    Ok(ResolvedAddress {
        ip: loopback.ip,
        interface: Some(loopback.clone()),
        source: AddressSource::Loopback,
    })
}

/// The node's two cluster sockets. Bound once and never rebound.
#[derive(Debug)]
pub struct BoundSockets {
    pub listener: TcpListener,
    pub control: UdpSocket,
}

/// Bind the TCP listener on the base port and the UDP control socket on
/// the control port. Any failure is final.
pub fn bind_sockets(identity: &NodeIdentity) -> BootResult<BoundSockets> {
    let base = identity.base_addr();
    let listener = TcpListener::bind(base).map_err(|source| BootError::NetworkBind {
        kind: "tcp",
        addr: base,
        source,
    })?;

    let control_addr = identity.control_addr();
    let control = UdpSocket::bind(control_addr).map_err(|source| BootError::NetworkBind {
        kind: "udp",
        addr: control_addr,
        source,
    })?;

    debug!(%base, control = %control_addr, "cluster sockets bound");
    Ok(BoundSockets { listener, control })
}

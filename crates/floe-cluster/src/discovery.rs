//! Membership discovery.
//!
//! Two mutually exclusive modes:
//!
//! - **Static**: the flatfile is the candidate set. Self is always added
//!   to it, with a warning when the file left it out.
//! - **Multicast**: a group address and port are derived from the cloud
//!   name; nodes announce themselves there and listen for each other.
//!
//! In both modes every datagram carries the sender's cloud name, and
//! datagrams from another cloud are dropped. Two clouds whose names
//! happen to map to the same group never see each other as candidates.

use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use std::path::PathBuf;
use std::sync::RwLock;

use floe_core::{ClusterConfig, NodeIdentity};
use serde::{Deserialize, Serialize};
use socket2::{Domain, Protocol, Socket, Type};
use tracing::{debug, warn};

use crate::error::{BootError, BootResult};
use crate::flatfile::read_flatfile;
use crate::membership::fnv1a;
use crate::network::LocalInterface;

/// First port of the range discovery ports are drawn from.
const DISCOVERY_PORT_BASE: u16 = 49152;
/// Size of that range; `BASE + SPAN - 1 == 65535`.
const DISCOVERY_PORT_SPAN: u64 = 16384;
/// Most candidates one node keeps. Senders beyond this are dropped.
pub const MAX_CANDIDATES: usize = 1024;

/// Where multicast discovery happens for one cloud name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MulticastConfig {
    pub group: IpAddr,
    pub port: u16,
    /// Interface to join the group on; `None` lets the OS choose.
    pub interface: Option<LocalInterface>,
}

impl MulticastConfig {
    /// Derive the group and port from the FNV-1a hash of `cloud_name`.
    ///
    /// IPv4 nodes use `239.h5.h6.h7` (administratively scoped), IPv6 nodes
    /// use `ff05::` (site-local) with the low 48 bits of the hash. The port
    /// comes from the top 16 bits, folded into `49152..=65535`.
    pub fn derive(cloud_name: &str, self_ip: IpAddr, interface: Option<LocalInterface>) -> Self {
        let h = fnv1a(cloud_name.as_bytes());
        let b = h.to_be_bytes();
        let group = match self_ip {
            IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::new(239, b[5], b[6], b[7])),
            IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::new(
                0xff05,
                0,
                0,
                0,
                0,
                (h >> 32) as u16,
                (h >> 16) as u16,
                h as u16,
            )),
        };
        let port = DISCOVERY_PORT_BASE + ((h >> 48) % DISCOVERY_PORT_SPAN) as u16;

        Self {
            group,
            port,
            interface,
        }
    }

    pub fn group_addr(&self) -> SocketAddr {
        SocketAddr::new(self.group, self.port)
    }

    /// Open a reusable UDP socket on the discovery port and join the group.
    pub fn open(&self) -> BootResult<UdpSocket> {
        let fail = |source: std::io::Error| BootError::Multicast {
            group: self.group,
            port: self.port,
            source,
        };

        let socket = Socket::new(
            Domain::for_address(self.group_addr()),
            Type::DGRAM,
            Some(Protocol::UDP),
        )
        .map_err(fail)?;
        // Several nodes on one host share the discovery port.
        socket.set_reuse_address(true).map_err(fail)?;
        #[cfg(unix)]
        socket.set_reuse_port(true).map_err(fail)?;

        match self.group {
            IpAddr::V4(group) => {
                let iface = match self.interface.as_ref().map(|i| i.ip) {
                    Some(IpAddr::V4(ip)) => ip,
                    _ => Ipv4Addr::UNSPECIFIED,
                };
                let bind = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), self.port);
                socket.bind(&bind.into()).map_err(fail)?;
                socket.join_multicast_v4(&group, &iface).map_err(fail)?;
                socket.set_multicast_loop_v4(true).map_err(fail)?;
                if !iface.is_unspecified() {
                    socket.set_multicast_if_v4(&iface).map_err(fail)?;
                }
            }
            IpAddr::V6(group) => {
                let index = self.interface.as_ref().and_then(|i| i.index).unwrap_or(0);
                socket.set_only_v6(true).map_err(fail)?;
                let bind = SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), self.port);
                socket.bind(&bind.into()).map_err(fail)?;
                socket.join_multicast_v6(&group, index).map_err(fail)?;
                socket.set_multicast_loop_v6(true).map_err(fail)?;
                if index != 0 {
                    socket.set_multicast_if_v6(index).map_err(fail)?;
                }
            }
        }

        debug!(group = %self.group, port = self.port, "joined discovery group");
        Ok(socket.into())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryMode {
    Static { flatfile: PathBuf },
    Multicast(MulticastConfig),
}

impl fmt::Display for DiscoveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiscoveryMode::Static { flatfile } => {
                write!(f, "static configuration based on flatfile {}", flatfile.display())
            }
            DiscoveryMode::Multicast(mc) => write!(f, "discovery address {}", mc.group_addr()),
        }
    }
}

/// Announcement exchanged between nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryDatagram {
    pub cloud_name: String,
    pub sender: NodeIdentity,
    pub cloud_hash: u64,
    #[serde(default)]
    pub build_checksum: u64,
}

impl DiscoveryDatagram {
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// What a received datagram meant to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// Different cloud name; ignored.
    ForeignCloud,
    /// Our own announcement looped back.
    SelfEcho,
    /// Static mode, sender not in the flatfile; ignored.
    Unlisted,
    /// Same cloud, different build; not recorded.
    VersionSkew { local: u64, remote: u64 },
    /// A peer of this cloud. `new` is false when it was already known.
    Candidate { new: bool },
    /// A new peer of this cloud arrived with the candidate set full.
    CandidatesFull,
}

/// Discovery state for this node: the mode, the member snapshot it
/// produced at bootstrap, and the candidates heard from since.
///
/// Candidates are bootstrap-time state. Nothing expires them, so the set
/// is capped at [`MAX_CANDIDATES`].
#[derive(Debug)]
pub struct Discovery {
    cloud_name: String,
    identity: NodeIdentity,
    build_checksum: u64,
    mode: DiscoveryMode,
    members: BTreeSet<NodeIdentity>,
    self_inserted: bool,
    socket: Option<UdpSocket>,
    candidates: RwLock<BTreeSet<NodeIdentity>>,
}

impl Discovery {
    /// Select the mode from `config` and set it up. Flatfile read errors
    /// and multicast socket errors are fatal.
    pub fn establish(
        config: &ClusterConfig,
        identity: NodeIdentity,
        interface: Option<&LocalInterface>,
        build_checksum: u64,
    ) -> BootResult<Self> {
        match &config.flatfile {
            Some(path) => {
                let entries = read_flatfile(path)?;
                Ok(Self::with_static(
                    &config.name,
                    identity,
                    path.clone(),
                    entries,
                    build_checksum,
                ))
            }
            None => {
                let multicast =
                    MulticastConfig::derive(&config.name, identity.ip(), interface.cloned());
                Self::open_multicast(&config.name, identity, multicast, build_checksum)
            }
        }
    }

    /// Multicast mode on `multicast`, with its group socket joined.
    pub fn open_multicast(
        cloud_name: &str,
        identity: NodeIdentity,
        multicast: MulticastConfig,
        build_checksum: u64,
    ) -> BootResult<Self> {
        let socket = multicast.open()?;
        let mut discovery = Self::with_multicast(cloud_name, identity, multicast, build_checksum);
        discovery.socket = Some(socket);
        Ok(discovery)
    }

    /// Static mode over already-parsed flatfile `entries`.
    pub fn with_static(
        cloud_name: &str,
        identity: NodeIdentity,
        flatfile: PathBuf,
        mut entries: BTreeSet<NodeIdentity>,
        build_checksum: u64,
    ) -> Self {
        let self_inserted = !entries.contains(&identity);
        if self_inserted {
            warn!(
                %identity,
                flatfile = %flatfile.display(),
                listed = ?entries,
                "flatfile does not include self; adding it"
            );
            entries.insert(identity);
        }

        Self {
            cloud_name: cloud_name.to_string(),
            identity,
            build_checksum,
            mode: DiscoveryMode::Static { flatfile },
            members: entries,
            self_inserted,
            socket: None,
            candidates: RwLock::new(BTreeSet::new()),
        }
    }

    /// Multicast mode without a socket; [`Discovery::open_multicast`]
    /// attaches one.
    pub fn with_multicast(
        cloud_name: &str,
        identity: NodeIdentity,
        multicast: MulticastConfig,
        build_checksum: u64,
    ) -> Self {
        Self {
            cloud_name: cloud_name.to_string(),
            identity,
            build_checksum,
            mode: DiscoveryMode::Multicast(multicast),
            members: BTreeSet::from([identity]),
            self_inserted: false,
            socket: None,
            candidates: RwLock::new(BTreeSet::new()),
        }
    }

    pub fn cloud_name(&self) -> &str {
        &self.cloud_name
    }

    pub fn mode(&self) -> &DiscoveryMode {
        &self.mode
    }

    /// Member snapshot produced at bootstrap. Always contains self.
    pub fn members(&self) -> &BTreeSet<NodeIdentity> {
        &self.members
    }

    /// Whether self had to be added to the flatfile's list.
    pub fn self_inserted(&self) -> bool {
        self.self_inserted
    }

    pub fn multicast_socket(&self) -> Option<&UdpSocket> {
        self.socket.as_ref()
    }

    /// Where announcements go: the group in multicast mode, every other
    /// member's control port in static mode.
    pub fn announce_targets(&self) -> Vec<SocketAddr> {
        match &self.mode {
            DiscoveryMode::Multicast(mc) => vec![mc.group_addr()],
            DiscoveryMode::Static { .. } => self
                .members
                .iter()
                .filter(|m| **m != self.identity)
                .map(|m| m.control_addr())
                .collect(),
        }
    }

    pub fn announcement(&self, cloud_hash: u64) -> DiscoveryDatagram {
        DiscoveryDatagram {
            cloud_name: self.cloud_name.clone(),
            sender: self.identity,
            cloud_hash,
            build_checksum: self.build_checksum,
        }
    }

    /// Classify a received datagram, recording same-cloud peers as
    /// candidates. Candidates never enter the cloud membership here.
    pub fn observe(&self, datagram: &DiscoveryDatagram) -> Observation {
        if datagram.cloud_name != self.cloud_name {
            return Observation::ForeignCloud;
        }
        if datagram.sender == self.identity {
            return Observation::SelfEcho;
        }
        if matches!(self.mode, DiscoveryMode::Static { .. })
            && !self.members.contains(&datagram.sender)
        {
            return Observation::Unlisted;
        }
        if self.build_checksum != 0
            && datagram.build_checksum != 0
            && self.build_checksum != datagram.build_checksum
        {
            return Observation::VersionSkew {
                local: self.build_checksum,
                remote: datagram.build_checksum,
            };
        }

        let mut candidates = self.candidates.write().expect("candidates lock");
        if candidates.contains(&datagram.sender) {
            return Observation::Candidate { new: false };
        }
        if candidates.len() >= MAX_CANDIDATES {
            return Observation::CandidatesFull;
        }
        candidates.insert(datagram.sender);
        Observation::Candidate { new: true }
    }

    /// Peers of this cloud heard from so far.
    pub fn candidates(&self) -> BTreeSet<NodeIdentity> {
        self.candidates.read().expect("candidates lock").clone()
    }
}

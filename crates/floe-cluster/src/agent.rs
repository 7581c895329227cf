//! Discovery agent: the background announce/listen loop of a node.
//!
//! Runs after bootstrap. Every interval it re-runs the heartbeat and
//! announces this node (to the multicast group, or to each flatfile peer's
//! control port); in between it classifies whatever datagrams arrive.
//! Same-cloud peers are recorded as candidates. Admitting them into the
//! cloud is the membership protocol's business, not the agent's.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::bootstrap::Node;
use crate::discovery::{DiscoveryDatagram, Observation};
use crate::error::{BootError, BootResult};

/// Largest datagram the agent will read.
const MAX_DATAGRAM: usize = 4096;

pub struct DiscoveryAgent {
    node: Arc<Node>,
    interval: Duration,
}

impl DiscoveryAgent {
    pub fn new(node: Arc<Node>) -> Self {
        Self {
            node,
            interval: Duration::from_secs(5),
        }
    }

    /// Set the announce interval.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until `shutdown` flips. Only socket setup and heartbeat
    /// consistency faults end the loop early; send and receive errors are
    /// logged and skipped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> BootResult<()> {
        let control = to_tokio(self.node.control_socket(), "control socket")?;
        let multicast = match self.node.discovery().multicast_socket() {
            Some(socket) => Some(to_tokio(socket, "multicast socket")?),
            None => None,
        };
        // Multicast announcements go out through the group socket, which
        // has the discovery interface selected.
        let sender = multicast.as_ref().unwrap_or(&control);
        let targets = self.node.discovery().announce_targets();

        let mut ticker = tokio::time::interval(self.interval);
        let mut control_buf = vec![0u8; MAX_DATAGRAM];
        let mut group_buf = vec![0u8; MAX_DATAGRAM];

        info!(
            identity = %self.node.identity(),
            interval = ?self.interval,
            targets = targets.len(),
            "discovery agent started"
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let cloud_hash = self.node.heartbeat()?;
                    self.announce(sender, &targets, cloud_hash).await;
                }
                received = control.recv_from(&mut control_buf) => {
                    self.handle(received, &control_buf);
                }
                received = recv_optional(multicast.as_ref(), &mut group_buf) => {
                    self.handle(received, &group_buf);
                }
                _ = shutdown.changed() => {
                    info!(identity = %self.node.identity(), "discovery agent shutting down");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn announce(&self, socket: &UdpSocket, targets: &[SocketAddr], cloud_hash: u64) {
        let datagram = self.node.discovery().announcement(cloud_hash);
        let bytes = match datagram.encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "failed to encode announcement");
                return;
            }
        };
        for target in targets {
            if let Err(e) = socket.send_to(&bytes, target).await {
                warn!(%target, error = %e, "announcement failed");
            }
        }
    }

    fn handle(&self, received: io::Result<(usize, SocketAddr)>, buf: &[u8]) {
        let (len, from) = match received {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "discovery receive failed");
                return;
            }
        };
        let datagram = match DiscoveryDatagram::decode(&buf[..len]) {
            Ok(d) => d,
            Err(e) => {
                debug!(%from, error = %e, "dropping malformed discovery datagram");
                return;
            }
        };

        match self.node.discovery().observe(&datagram) {
            Observation::Candidate { new: true } => {
                info!(
                    peer = %datagram.sender,
                    cloud_hash = %format!("{:016x}", datagram.cloud_hash),
                    "discovered peer"
                );
            }
            Observation::Candidate { new: false } | Observation::SelfEcho => {}
            Observation::ForeignCloud => {
                debug!(%from, cloud = %datagram.cloud_name, "ignoring datagram from another cloud");
            }
            Observation::CandidatesFull => {
                debug!(peer = %datagram.sender, "candidate set full; dropping peer");
            }
            Observation::Unlisted => {
                debug!(peer = %datagram.sender, "ignoring node not listed in flatfile");
            }
            Observation::VersionSkew { local, remote } => {
                warn!(
                    peer = %datagram.sender,
                    local,
                    remote,
                    "ignoring peer with a different build"
                );
            }
        }
    }
}

fn to_tokio(socket: &std::net::UdpSocket, context: &'static str) -> BootResult<UdpSocket> {
    let socket = socket
        .try_clone()
        .map_err(|source| BootError::Socket { context, source })?;
    socket
        .set_nonblocking(true)
        .map_err(|source| BootError::Socket { context, source })?;
    UdpSocket::from_std(socket).map_err(|source| BootError::Socket { context, source })
}

async fn recv_optional(
    socket: Option<&UdpSocket>,
    buf: &mut [u8],
) -> io::Result<(usize, SocketAddr)> {
    match socket {
        Some(socket) => socket.recv_from(buf).await,
        None => std::future::pending().await,
    }
}

//! Error types for node bootstrap.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use floe_core::{ConfigError, IdentityError};
use thiserror::Error;

use crate::flatfile::FlatfileError;

/// Result type alias for bootstrap operations.
pub type BootResult<T> = Result<T, BootError>;

/// Everything that can stop a node from coming up. All of these are
/// fatal; the caller logs and exits with [`BootError::exit_code`].
#[derive(Debug, Error)]
pub enum BootError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid node identity: {0}")]
    Identity(#[from] IdentityError),

    #[error("failed to prepare ice root {path}: {source}")]
    IceRoot {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to enumerate network interfaces: {0}")]
    Interfaces(#[source] io::Error),

    #[error("no usable network interface found")]
    NoInterfaces,

    #[error("no local interface address matches network specification '{spec}'")]
    NoMatchingInterface { spec: String },

    #[error("failed to bind {kind} socket on {addr}: {source}")]
    NetworkBind {
        kind: &'static str,
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("socket setup failed ({context}): {source}")]
    Socket {
        context: &'static str,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Flatfile(#[from] FlatfileError),

    #[error("failed to join multicast group {group}:{port}: {source}")]
    Multicast {
        group: std::net::IpAddr,
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error(
        "cloud hash is zero after heartbeat over {members} member(s); \
         membership protocol did not initialize"
    )]
    ConsistencyFault { members: usize },
}

impl BootError {
    /// Process exit status for this error.
    ///
    /// | code | kind |
    /// |------|------|
    /// | 1 | local I/O (ice root) |
    /// | 2 | configuration |
    /// | 3 | network identity / bind |
    /// | 4 | membership discovery |
    /// | 5 | cloud consistency fault |
    pub fn exit_code(&self) -> u8 {
        match self {
            BootError::IceRoot { .. } => 1,
            BootError::Config(_) | BootError::Identity(_) => 2,
            BootError::Interfaces(_)
            | BootError::NoInterfaces
            | BootError::NoMatchingInterface { .. }
            | BootError::NetworkBind { .. }
            | BootError::Socket { .. } => 3,
            BootError::Flatfile(_) | BootError::Multicast { .. } => 4,
            BootError::ConsistencyFault { .. } => 5,
        }
    }
}

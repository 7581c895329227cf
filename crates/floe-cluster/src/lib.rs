//! Brings a single Floe node up into a cloud.
//!
//! # Architecture
//!
//! ```text
//! ClusterConfig
//!   └── Bootstrap::run()
//!       ├── StartupGuard       → at most once per process
//!       ├── network            → resolve address, bind TCP port + UDP port+1
//!       ├── Discovery          → flatfile set or multicast group per cloud name
//!       └── heartbeat          → first beat over {self}, cloud hash != 0
//!   → Node (immutable context: identity, sockets, discovery, cloud view)
//!       └── DiscoveryAgent     → background announce/observe loop
//! ```
//!
//! Every stage returns a typed [`BootError`]; only the binary decides to
//! exit.

pub mod agent;
pub mod bootstrap;
pub mod discovery;
pub mod error;
pub mod flatfile;
pub mod guard;
pub mod heartbeat;
pub mod membership;
pub mod network;

pub use agent::DiscoveryAgent;
pub use bootstrap::{Bootstrap, Node};
pub use discovery::{Discovery, DiscoveryDatagram, DiscoveryMode, MulticastConfig, Observation};
pub use error::{BootError, BootResult};
pub use guard::StartupGuard;
pub use heartbeat::HeartbeatRecord;
pub use membership::{CloudMembership, HashProtocol, MembershipProtocol};
pub use network::{BoundSockets, LocalInterface};

//! Shared types for a Floe node.
//!
//! Holds everything that exists before the node touches the network:
//! the immutable configuration snapshot, the node identity type, and the
//! compile-time build version record.

pub mod config;
pub mod error;
pub mod identity;
pub mod version;

pub use config::{ClusterConfig, DEFAULT_PORT};
pub use error::{ConfigError, ConfigResult};
pub use identity::{IdentityError, NodeIdentity};
pub use version::BuildVersion;

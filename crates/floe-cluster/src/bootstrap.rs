//! Bootstrap: the one-shot sequence that turns a configuration into a
//! running node.
//!
//! 1. Claim the startup guard (a second attempt is a no-op)
//! 2. Validate the configuration and prepare the ice root
//! 3. Resolve the node identity and bind both cluster sockets
//! 4. Set up membership discovery
//! 5. Form the starter cloud with a single heartbeat over `{self}`
//!
//! Each step is fatal on failure and nothing is rolled back.

use std::net::{TcpListener, UdpSocket};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use floe_core::config::os_user_name;
use floe_core::{BuildVersion, ClusterConfig, NodeIdentity};
use tracing::{debug, info};

use crate::discovery::{Discovery, MulticastConfig};
use crate::error::{BootError, BootResult};
use crate::guard::StartupGuard;
use crate::heartbeat::{self, HeartbeatRecord};
use crate::membership::{CloudMembership, HashProtocol, MembershipProtocol};
use crate::network::{self, BoundSockets, LocalInterface};

/// Configures and runs a bootstrap.
pub struct Bootstrap<'a> {
    config: &'a ClusterConfig,
    guard: &'a StartupGuard,
    protocol: Arc<dyn MembershipProtocol>,
    version: BuildVersion,
    interfaces: Option<Vec<LocalInterface>>,
    multicast: Option<MulticastConfig>,
}

impl<'a> Bootstrap<'a> {
    /// Bootstrap with the process-wide guard, the default hash protocol,
    /// and this binary's build version.
    pub fn new(config: &'a ClusterConfig) -> Self {
        Self {
            config,
            guard: StartupGuard::process(),
            protocol: Arc::new(HashProtocol),
            version: BuildVersion::current(),
            interfaces: None,
            multicast: None,
        }
    }

    pub fn with_guard(mut self, guard: &'a StartupGuard) -> Self {
        self.guard = guard;
        self
    }

    pub fn with_protocol(mut self, protocol: Arc<dyn MembershipProtocol>) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn with_version(mut self, version: BuildVersion) -> Self {
        self.version = version;
        self
    }

    /// Use this interface list instead of asking the OS.
    pub fn with_interfaces(mut self, interfaces: Vec<LocalInterface>) -> Self {
        self.interfaces = Some(interfaces);
        self
    }

    /// Discover on `multicast` instead of the group derived from the cloud
    /// name. Has no effect when a flatfile is configured.
    pub fn with_multicast(mut self, multicast: MulticastConfig) -> Self {
        self.multicast = Some(multicast);
        self
    }

    /// Run the sequence. Returns `Ok(None)` when the guard was already
    /// claimed, in which case nothing else happens.
    pub fn run(self) -> BootResult<Option<Node>> {
        if !self.guard.attempt_start() {
            debug!("bootstrap already started; ignoring");
            return Ok(None);
        }
        let config = self.config;

        config.validate()?;
        let ice_root = prepare_ice_root(config)?;

        // Interfaces are only needed to pick an address or a multicast
        // interface.
        let needs_scan = config.explicit_ip()?.is_none() || !config.uses_flatfile();
        let interfaces = match self.interfaces {
            Some(list) => list,
            None if needs_scan => network::local_interfaces()?,
            None => Vec::new(),
        };

        let resolved = network::resolve_address(config, &interfaces)?;
        let identity = NodeIdentity::new(resolved.ip, config.port)?;
        let sockets = network::bind_sockets(&identity)?;
        info!(
            %identity,
            control_port = identity.control_port(),
            source = %resolved.source,
            interface = resolved.interface.as_ref().map(|i| i.name.as_str()).unwrap_or("-"),
            "node identity resolved"
        );

        let build_checksum = self.version.checksum();
        let discovery = match self.multicast {
            Some(multicast) if !config.uses_flatfile() => {
                Discovery::open_multicast(&config.name, identity, multicast, build_checksum)?
            }
            _ => Discovery::establish(
                config,
                identity,
                resolved.interface.as_ref(),
                build_checksum,
            )?,
        };
        info!(
            cloud = %config.name,
            %identity,
            members = discovery.members().len(),
            "membership determined: {}",
            discovery.mode()
        );
        info!("{}", ssh_tunnel_hint(identity, os_user_name().as_deref()));

        let mut record = HeartbeatRecord::new(&config.name, &self.version);
        let cloud = heartbeat::form_cloud(identity, &mut record, self.protocol.as_ref())?;
        info!(
            cloud = %config.name,
            cloud_hash = %format!("{:016x}", cloud.cloud_hash()),
            size = cloud.size(),
            build_checksum,
            "cloud formed"
        );

        Ok(Some(Node {
            identity,
            ice_root,
            nthreads: config.nthreads,
            sockets,
            discovery,
            protocol: self.protocol,
            version: self.version,
            state: RwLock::new(CloudState { record, cloud }),
        }))
    }
}

fn ssh_tunnel_hint(identity: NodeIdentity, user: Option<&str>) -> String {
    let user = user.filter(|u| !u.is_empty()).unwrap_or("<user>");
    let host = match identity.ip() {
        std::net::IpAddr::V6(ip) => format!("[{ip}]"),
        ip => ip.to_string(),
    };
    format!(
        "if you have trouble connecting, try SSH tunneling from your local machine: \
         ssh -L 55555:localhost:{} {user}@{host} then use localhost:55555",
        identity.base_port()
    )
}

fn prepare_ice_root(config: &ClusterConfig) -> BootResult<PathBuf> {
    let path = config.ice_root_path()?;
    std::fs::create_dir_all(&path).map_err(|source| BootError::IceRoot {
        path: path.clone(),
        source,
    })?;
    debug!(path = %path.display(), "ice root ready");
    Ok(path)
}

#[derive(Debug)]
struct CloudState {
    record: HeartbeatRecord,
    cloud: CloudMembership,
}

/// A bootstrapped node. Identity, sockets and discovery are fixed for
/// the life of the process; only the cloud view moves, through
/// [`Node::heartbeat`].
pub struct Node {
    identity: NodeIdentity,
    ice_root: PathBuf,
    nthreads: usize,
    sockets: BoundSockets,
    discovery: Discovery,
    protocol: Arc<dyn MembershipProtocol>,
    version: BuildVersion,
    state: RwLock<CloudState>,
}

impl Node {
    pub fn identity(&self) -> NodeIdentity {
        self.identity
    }

    pub fn cloud_name(&self) -> &str {
        self.discovery.cloud_name()
    }

    pub fn ice_root(&self) -> &Path {
        &self.ice_root
    }

    /// Maximum batch pool size the node was configured with.
    pub fn nthreads(&self) -> usize {
        self.nthreads
    }

    pub fn listener(&self) -> &TcpListener {
        &self.sockets.listener
    }

    pub fn control_socket(&self) -> &UdpSocket {
        &self.sockets.control
    }

    pub fn discovery(&self) -> &Discovery {
        &self.discovery
    }

    pub fn version(&self) -> &BuildVersion {
        &self.version
    }

    /// Current cloud view.
    pub fn cloud(&self) -> CloudMembership {
        self.state.read().expect("cloud state lock").cloud.clone()
    }

    pub fn heartbeat_record(&self) -> HeartbeatRecord {
        self.state.read().expect("cloud state lock").record.clone()
    }

    /// Re-run the membership heartbeat over the current members, for use
    /// when something membership-affecting happens. A zero hash is a
    /// [`BootError::ConsistencyFault`] and leaves the previous view intact.
    pub fn heartbeat(&self) -> BootResult<u64> {
        let mut state = self.state.write().expect("cloud state lock");
        let members = state.cloud.members().clone();
        let mut record = state.record.clone();
        let cloud = heartbeat::beat(members, &mut record, self.protocol.as_ref())?;
        let hash = cloud.cloud_hash();
        state.record = record;
        state.cloud = cloud;
        Ok(hash)
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("identity", &self.identity)
            .field("cloud_name", &self.cloud_name())
            .field("ice_root", &self.ice_root)
            .field("mode", self.discovery.mode())
            .finish_non_exhaustive()
    }
}

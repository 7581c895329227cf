//! Command-line surface and its mapping onto `ClusterConfig`.
//!
//! Precedence: defaults, then the `--config` TOML file, then flags.

use std::path::PathBuf;

use clap::Parser;
use floe_core::{ClusterConfig, ConfigResult};

const FORMATION_HELP: &str = "\
Cloud formation behavior:

    New nodes join together to form a cloud at startup time. Nodes with the
    same --name find each other by multicast, or through --flatfile when one
    is given. Once a cloud is given work to perform, it locks out new members.

Examples:

    Start a node with the default cloud name (your user name):
        $ floed

    Start a node in the cloud 'MyCloud':
        $ floed --name MyCloud

    Start a node from a static member list, bound to a given network:
        $ floed --flatfile nodes.txt --network 10.1.2.0/24";

#[derive(Debug, Parser)]
#[command(
    name = "floed",
    about = "Floe daemon: start a node and form or join a cloud",
    version,
    after_help = FORMATION_HELP
)]
pub struct Cli {
    /// TOML config file. Flags override values from the file.
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Cloud name used for discovery of other nodes [default: OS user name]
    #[arg(long)]
    pub name: Option<String>,

    /// File explicitly listing cloud node members; disables multicast discovery
    #[arg(long)]
    pub flatfile: Option<PathBuf>,

    /// IP address of this node
    #[arg(long)]
    pub ip: Option<String>,

    /// Port for this node; port+1 is also used [default: 54321]
    #[arg(long)]
    pub port: Option<u16>,

    /// Comma-separated CIDR list; the node binds to the first interface
    /// inside one of them (e.g. 10.1.2.0/24). Use instead of --ip when a
    /// broad range of addresses is acceptable.
    #[arg(long)]
    pub network: Option<String>,

    /// Directory where the node spills temporary data [default: /tmp/h2o-<user>]
    #[arg(long = "ice-root", visible_alias = "ice_root")]
    pub ice_root: Option<String>,

    /// Maximum number of threads in the batch pool [default: max(99, 10 x cpus)]
    #[arg(long)]
    pub nthreads: Option<usize>,

    /// Seconds between discovery announcements.
    #[arg(long, default_value = "5")]
    pub discovery_interval: u64,
}

impl Cli {
    /// Build the configuration snapshot for this invocation.
    pub fn load_config(&self) -> ConfigResult<ClusterConfig> {
        let mut config = match &self.config {
            Some(path) => ClusterConfig::from_file(path)?,
            None => ClusterConfig::default(),
        };
        self.apply(&mut config);
        Ok(config)
    }

    fn apply(&self, config: &mut ClusterConfig) {
        if let Some(name) = &self.name {
            config.name = name.clone();
        }
        if let Some(flatfile) = &self.flatfile {
            config.flatfile = Some(flatfile.clone());
        }
        if let Some(ip) = &self.ip {
            config.ip = Some(ip.clone());
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(network) = &self.network {
            config.network = Some(network.clone());
        }
        if let Some(ice_root) = &self.ice_root {
            config.ice_root = Some(ice_root.clone());
        }
        if let Some(nthreads) = self.nthreads {
            config.nthreads = nthreads;
        }
    }
}

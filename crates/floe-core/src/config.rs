//! Cluster configuration snapshot.
//!
//! Built once before bootstrap (defaults, then an optional TOML file,
//! then command-line overrides) and consumed read-only afterwards.

use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use ipnet::IpNet;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Default base port; the control port is one above it.
pub const DEFAULT_PORT: u16 = 54321;

/// Floor for the batch thread pool size.
const MIN_BATCH_THREADS: usize = 99;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Cloud name. Nodes only form a cloud with nodes of the same name.
    pub name: String,
    /// Static membership list; disables multicast discovery when set.
    pub flatfile: Option<PathBuf>,
    /// Explicit address to bind.
    pub ip: Option<String>,
    /// Base port (TCP). `port + 1` is the UDP control port.
    pub port: u16,
    /// Comma-separated CIDR list of acceptable interface addresses.
    pub network: Option<String>,
    /// Spill directory for temporary data.
    pub ice_root: Option<String>,
    /// Maximum number of threads in the batch pool.
    pub nthreads: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: default_cloud_name(os_user_name().as_deref()),
            flatfile: None,
            ip: None,
            port: DEFAULT_PORT,
            network: None,
            ice_root: None,
            nthreads: default_nthreads(processor_count()),
        }
    }
}

impl ClusterConfig {
    /// Load a TOML config file. Keys missing from the file keep their
    /// defaults.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content).map_err(|e| match e {
            ConfigError::Parse { message, .. } => ConfigError::Parse {
                path: path.display().to_string(),
                message,
            },
            other => other,
        })
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            path: "<inline>".to_string(),
            message: e.to_string(),
        })
    }

    /// Check every option that can be checked without touching the
    /// network.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::EmptyCloudName);
        }
        if self.port == 0 || self.port == u16::MAX {
            return Err(ConfigError::InvalidPort(self.port.into()));
        }
        if self.nthreads == 0 {
            return Err(ConfigError::InvalidThreads);
        }
        self.explicit_ip()?;
        self.networks()?;
        self.ice_root_path()?;
        Ok(())
    }

    /// The explicit bind address, if one was configured.
    pub fn explicit_ip(&self) -> ConfigResult<Option<IpAddr>> {
        match self.ip.as_deref().map(str::trim) {
            None => Ok(None),
            Some(raw) => {
                let raw = raw
                    .strip_prefix('[')
                    .and_then(|s| s.strip_suffix(']'))
                    .unwrap_or(raw);
                raw.parse()
                    .map(Some)
                    .map_err(|_| ConfigError::InvalidIp(raw.to_string()))
            }
        }
    }

    /// Parsed network ranges, in the order given. Empty when unset.
    pub fn networks(&self) -> ConfigResult<Vec<IpNet>> {
        let Some(spec) = self.network.as_deref() else {
            return Ok(Vec::new());
        };

        let mut nets = Vec::new();
        for part in spec.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let net = IpNet::from_str(part).map_err(|e| ConfigError::InvalidNetwork {
                spec: part.to_string(),
                reason: e.to_string(),
            })?;
            nets.push(net);
        }
        if nets.is_empty() {
            return Err(ConfigError::InvalidNetwork {
                spec: spec.to_string(),
                reason: "no ranges given".to_string(),
            });
        }
        Ok(nets)
    }

    /// The ice root directory: the configured one with backslashes
    /// normalized to `/`, or the per-user default under `/tmp`.
    pub fn ice_root_path(&self) -> ConfigResult<PathBuf> {
        match self.ice_root.as_deref() {
            None => Ok(PathBuf::from(default_ice_root(os_user_name().as_deref()))),
            Some(raw) => {
                let normalized = raw.trim().replace('\\', "/");
                if normalized.is_empty() || normalized.contains('\0') {
                    return Err(ConfigError::InvalidIceRoot(raw.to_string()));
                }
                Ok(PathBuf::from(normalized))
            }
        }
    }

    pub fn uses_flatfile(&self) -> bool {
        self.flatfile.is_some()
    }
}

/// The login name of the current OS user, if the environment has one.
pub fn os_user_name() -> Option<String> {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|v| !v.is_empty())
}

fn sanitize_user(user: Option<&str>) -> String {
    let sanitized = user.unwrap_or_default().replace(' ', "_");
    if sanitized.is_empty() {
        "unknown".to_string()
    } else {
        sanitized
    }
}

/// Default ice root for `user`: `/tmp/h2o-<user>` with spaces replaced
/// by underscores, `unknown` when there is no user name.
pub fn default_ice_root(user: Option<&str>) -> String {
    format!("/tmp/h2o-{}", sanitize_user(user))
}

/// Default cloud name: the OS user name, `unknown` when there is none.
pub fn default_cloud_name(user: Option<&str>) -> String {
    match user {
        Some(u) if !u.is_empty() => u.to_string(),
        _ => "unknown".to_string(),
    }
}

/// Default batch pool size for `cpus` processors.
pub fn default_nthreads(cpus: usize) -> usize {
    MIN_BATCH_THREADS.max(10 * cpus)
}

pub fn processor_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

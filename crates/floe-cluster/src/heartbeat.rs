//! Heartbeat record and cloud formation.

use std::collections::BTreeSet;

use floe_core::{BuildVersion, NodeIdentity};
use tracing::debug;

use crate::error::{BootError, BootResult};
use crate::membership::{CloudMembership, MembershipProtocol};

/// What a node says about itself on every heartbeat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatRecord {
    pub cloud_name: String,
    /// Build identity; 0 when unknown.
    pub build_checksum: u64,
    pub cloud_hash: u64,
    pub cloud_size: usize,
}

impl HeartbeatRecord {
    pub fn new(cloud_name: &str, version: &BuildVersion) -> Self {
        Self {
            cloud_name: cloud_name.to_string(),
            build_checksum: version.checksum(),
            cloud_hash: 0,
            cloud_size: 0,
        }
    }
}

/// Run one heartbeat over `members` and check the result.
pub fn beat(
    members: BTreeSet<NodeIdentity>,
    record: &mut HeartbeatRecord,
    protocol: &dyn MembershipProtocol,
) -> BootResult<CloudMembership> {
    let cloud_hash = protocol.heartbeat(record, &members);
    if cloud_hash == 0 {
        return Err(BootError::ConsistencyFault {
            members: members.len(),
        });
    }
    record.cloud_hash = cloud_hash;
    debug!(cloud_hash = %format!("{cloud_hash:016x}"), members = members.len(), "heartbeat");
    Ok(CloudMembership::new(members, cloud_hash))
}

/// Form the starter cloud: a single heartbeat over `{self}`.
pub fn form_cloud(
    identity: NodeIdentity,
    record: &mut HeartbeatRecord,
    protocol: &dyn MembershipProtocol,
) -> BootResult<CloudMembership> {
    beat(BTreeSet::from([identity]), record, protocol)
}

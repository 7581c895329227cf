//! Cloud membership view and the protocol seam that maintains it.
//!
//! The bootstrap path only ever calls [`MembershipProtocol::heartbeat`]
//! over `{self}`. Admitting or dropping peers later belongs to whatever
//! protocol implementation is plugged in.

use std::collections::BTreeSet;
use std::net::IpAddr;

use floe_core::NodeIdentity;

use crate::heartbeat::HeartbeatRecord;

/// A node's view of its cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudMembership {
    members: BTreeSet<NodeIdentity>,
    cloud_hash: u64,
}

impl CloudMembership {
    pub(crate) fn new(members: BTreeSet<NodeIdentity>, cloud_hash: u64) -> Self {
        Self {
            members,
            cloud_hash,
        }
    }

    pub fn members(&self) -> &BTreeSet<NodeIdentity> {
        &self.members
    }

    pub fn cloud_hash(&self) -> u64 {
        self.cloud_hash
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn contains(&self, identity: &NodeIdentity) -> bool {
        self.members.contains(identity)
    }
}

/// The membership/consensus mechanism behind the cloud.
pub trait MembershipProtocol: Send + Sync {
    /// Run one heartbeat over `members`, update `record`, and return the
    /// resulting cloud hash. Zero means the protocol failed to initialize.
    fn heartbeat(&self, record: &mut HeartbeatRecord, members: &BTreeSet<NodeIdentity>) -> u64;
}

/// Default protocol: the cloud hash is an FNV-1a digest of the sorted
/// member set, so every node holding the same set agrees on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct HashProtocol;

impl MembershipProtocol for HashProtocol {
    fn heartbeat(&self, record: &mut HeartbeatRecord, members: &BTreeSet<NodeIdentity>) -> u64 {
        let hash = membership_hash(members);
        record.cloud_hash = hash;
        record.cloud_size = members.len();
        hash
    }
}

/// Digest of a member set. Order-independent because the set is sorted.
pub fn membership_hash(members: &BTreeSet<NodeIdentity>) -> u64 {
    let mut bytes = Vec::with_capacity(members.len() * 20);
    for member in members {
        match member.ip() {
            IpAddr::V4(ip) => bytes.extend_from_slice(&ip.octets()),
            IpAddr::V6(ip) => bytes.extend_from_slice(&ip.octets()),
        }
        bytes.extend_from_slice(&member.base_port().to_be_bytes());
        bytes.push(0xff);
    }
    fnv1a(&bytes)
}

/// FNV-1a 64-bit.
pub(crate) fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

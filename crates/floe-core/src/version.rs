//! Build version record, fixed at compile time.
//!
//! Fields come from `FLOE_BUILD_*` environment variables set by the
//! packaging step (or from git, see `build.rs`). Anything missing reads
//! as `(unknown)`, and an unknown build has checksum 0.

use sha2::{Digest, Sha256};

pub const UNKNOWN: &str = "(unknown)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildVersion {
    pub branch: &'static str,
    pub commit: &'static str,
    pub describe: &'static str,
    pub project_version: &'static str,
    pub compiled_by: &'static str,
    pub compiled_on: &'static str,
}

impl BuildVersion {
    /// The record for this binary.
    pub fn current() -> Self {
        Self {
            branch: option_env!("FLOE_BUILD_BRANCH").unwrap_or(UNKNOWN),
            commit: option_env!("FLOE_BUILD_COMMIT").unwrap_or(UNKNOWN),
            describe: option_env!("FLOE_BUILD_DESCRIBE").unwrap_or(UNKNOWN),
            project_version: env!("CARGO_PKG_VERSION"),
            compiled_by: option_env!("FLOE_BUILD_BY").unwrap_or(UNKNOWN),
            compiled_on: option_env!("FLOE_BUILD_ON").unwrap_or(UNKNOWN),
        }
    }

    /// A record with every field unknown.
    pub fn unknown() -> Self {
        Self {
            branch: UNKNOWN,
            commit: UNKNOWN,
            describe: UNKNOWN,
            project_version: UNKNOWN,
            compiled_by: UNKNOWN,
            compiled_on: UNKNOWN,
        }
    }

    /// Whether the commit this binary was built from is known.
    pub fn is_known(&self) -> bool {
        self.commit != UNKNOWN
    }

    /// Parsed project version, if it is valid semver.
    pub fn semver(&self) -> Option<semver::Version> {
        semver::Version::parse(self.project_version).ok()
    }

    /// 64-bit build identity carried in heartbeats. Nodes built from
    /// different sources disagree on it; 0 means unknown.
    pub fn checksum(&self) -> u64 {
        if !self.is_known() {
            return 0;
        }
        let digest = self.digest();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_be_bytes(bytes).max(1)
    }

    /// Hex form of the full build digest, for logs.
    pub fn checksum_hex(&self) -> String {
        if !self.is_known() {
            return UNKNOWN.to_string();
        }
        hex::encode(self.digest())
    }

    fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        for field in [self.project_version, self.commit, self.describe] {
            hasher.update(field.as_bytes());
            hasher.update([0u8]);
        }
        let mut out = [0u8; 32];
        out.copy_from_slice(&hasher.finalize());
        out
    }
}

impl Default for BuildVersion {
    fn default() -> Self {
        Self::unknown()
    }
}

//! Cluster version gates consulted during resolution.
//!
//! Nodes of different versions may plan backups into the same collection, so
//! newer on-storage behaviour is only used once every node understands it.

use crate::utils::errors::DestError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Version milestones, ordered oldest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VersionKey {
    /// No gated behaviour is active.
    Legacy,
    /// Full backups refuse to land on a subdirectory that already holds one.
    FullBackupCollisionGuard,
    /// LATEST pointers are written once into the history directory.
    WriteOnceLatest,
}

impl VersionKey {
    pub const CURRENT: VersionKey = VersionKey::WriteOnceLatest;

    pub fn as_str(&self) -> &'static str {
        match self {
            VersionKey::Legacy => "legacy",
            VersionKey::FullBackupCollisionGuard => "full-backup-collision-guard",
            VersionKey::WriteOnceLatest => "write-once-latest",
        }
    }
}

impl fmt::Display for VersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VersionKey {
    type Err = DestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "legacy" => Ok(VersionKey::Legacy),
            "full-backup-collision-guard" => Ok(VersionKey::FullBackupCollisionGuard),
            "write-once-latest" => Ok(VersionKey::WriteOnceLatest),
            other => Err(DestError::UnknownVersion(other.to_string())),
        }
    }
}

/// Answers whether a version milestone is active across the cluster.
pub trait ClusterVersion: Send + Sync {
    fn is_active(&self, key: VersionKey) -> bool;
}

/// A cluster whose active version is fixed at `self.0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedVersion(pub VersionKey);

impl ClusterVersion for FixedVersion {
    fn is_active(&self, key: VersionKey) -> bool {
        key <= self.0
    }
}

//! Configuration management for the destination resolver.
//!
//! Loads configuration from a TOML file with environment variable overrides.

use crate::dest::resolver::ResolverSettings;
use crate::utils::errors::DestError;
use crate::version::VersionKey;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ENV_LOG_LEVEL: &str = "BACKUP_DEST_LOG_LEVEL";
pub const ENV_FULL_BACKUP_WITH_SUBDIR: &str = "BACKUP_DEST_FULL_BACKUP_WITH_SUBDIR";
pub const ENV_CLUSTER_VERSION: &str = "BACKUP_DEST_CLUSTER_VERSION";
pub const ENV_LOCAL_ROOT: &str = "BACKUP_DEST_LOCAL_ROOT";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub resolver: ResolverConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Allow full backups into user-named subdirectories (deprecated syntax)
    #[serde(default)]
    pub full_backup_with_subdir_enabled: bool,

    /// Newest capability every node of the cluster understands
    #[serde(default = "default_cluster_version")]
    pub cluster_version: VersionKey,

    /// Identity stores are opened as
    #[serde(default = "default_user")]
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory backing `nodelocal://` and `userfile://` URIs
    #[serde(default = "default_local_root")]
    pub local_root: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_cluster_version() -> VersionKey {
    VersionKey::CURRENT
}

fn default_user() -> String {
    "root".to_string()
}

fn default_local_root() -> PathBuf {
    PathBuf::from("/var/lib/backup-dest/extern")
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            full_backup_with_subdir_enabled: false,
            cluster_version: default_cluster_version(),
            user: default_user(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            local_root: default_local_root(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl ResolverConfig {
    pub fn settings(&self) -> ResolverSettings {
        ResolverSettings {
            full_backup_with_subdir_enabled: self.full_backup_with_subdir_enabled,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply `BACKUP_DEST_*` overrides from the process environment, reading
    /// `.env` first when present.
    pub fn apply_env(&mut self) -> Result<(), DestError> {
        let _ = dotenvy::dotenv();
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from `lookup`, keyed by the `BACKUP_DEST_*` names.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), DestError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup(ENV_LOG_LEVEL) {
            self.log.level = level;
        }
        if let Some(flag) = lookup(ENV_FULL_BACKUP_WITH_SUBDIR) {
            self.resolver.full_backup_with_subdir_enabled =
                parse_bool(ENV_FULL_BACKUP_WITH_SUBDIR, &flag)?;
        }
        if let Some(version) = lookup(ENV_CLUSTER_VERSION) {
            self.resolver.cluster_version = version.parse()?;
        }
        if let Some(root) = lookup(ENV_LOCAL_ROOT) {
            self.storage.local_root = PathBuf::from(root);
        }
        Ok(())
    }
}

fn parse_bool(key: &str, value: &str) -> Result<bool, DestError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(DestError::Config(format!("{key}: expected a boolean, got {other:?}"))),
    }
}

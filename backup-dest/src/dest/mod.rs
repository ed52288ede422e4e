//! Backup destination resolution.
//!
//! Given a backup request, work out which storage locations the backup job
//! reads and writes, and whether it is a full backup or a new incremental
//! layer on top of an existing chain.
//!
//! - `locality`: locality-tagged URI sets
//! - `manifest`: completed-backup probe
//! - `latest`: the `LATEST` pointer protocol
//! - `chain`: prior layer discovery and chain assembly
//! - `incrementals`: where incremental layers of a full backup live
//! - `resolver`: the orchestrator

pub mod chain;
pub mod incrementals;
pub mod latest;
pub mod locality;
pub mod manifest;
pub mod resolver;

use crate::layout::{full_backup_subdir, LATEST_FILE_NAME};
use crate::storage::{ExternalStorage, StorageFactory, Username};
use crate::utils::errors::{DestError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::future::Future;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use chain::{assemble_chain, find_prior_backups, list_full_backups_in_collection, ManifestMode};
pub use incrementals::{DefaultIncrementalsLocator, IncrementalsLocator};
pub use latest::{
    check_for_latest_file_in_collection, find_latest_file, read_latest_file,
    write_new_latest_file, LatestEncoding, LatestReadStrategy,
};
pub use locality::{uris_by_locality, LocalityTier, LocalityUri, LocalityUriSet};
pub use manifest::contains_manifest;
pub use resolver::DestinationResolver;

/// A backup command as planned by the SQL layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRequest {
    /// Collection (or legacy destination) URIs, possibly locality tagged.
    pub target_uris: Vec<String>,
    /// Subdirectory inside the collection, or `LATEST`. `None` for `BACKUP TO`.
    pub explicit_subdir: Option<String>,
    /// Alternative home for incremental layers.
    #[serde(default)]
    pub incremental_storage: Vec<String>,
    /// Deprecated `INCREMENTAL FROM` list. When set, no manifest inspection happens.
    #[serde(default)]
    pub incremental_from_override: Vec<String>,
    /// The caller named the subdirectory (explicitly or via `LATEST`).
    #[serde(default)]
    pub subdir_known_to_exist: bool,
    pub as_of_time: DateTime<Utc>,
}

impl BackupRequest {
    /// `BACKUP TO <uris>`.
    pub fn legacy(target_uris: Vec<String>, as_of_time: DateTime<Utc>) -> Self {
        Self {
            target_uris,
            explicit_subdir: None,
            incremental_storage: Vec::new(),
            incremental_from_override: Vec::new(),
            subdir_known_to_exist: false,
            as_of_time,
        }
    }

    /// `BACKUP INTO <collection>`: a new full backup in a date-named subdirectory.
    pub fn into_collection(target_uris: Vec<String>, as_of_time: DateTime<Utc>) -> Self {
        Self {
            explicit_subdir: Some(full_backup_subdir(&as_of_time)),
            ..Self::legacy(target_uris, as_of_time)
        }
    }

    /// `BACKUP INTO LATEST IN <collection>`.
    pub fn into_latest(target_uris: Vec<String>, as_of_time: DateTime<Utc>) -> Self {
        Self::into_subdir(target_uris, LATEST_FILE_NAME, as_of_time)
    }

    /// `BACKUP INTO '<subdir>' IN <collection>`.
    pub fn into_subdir(
        target_uris: Vec<String>,
        subdir: impl Into<String>,
        as_of_time: DateTime<Utc>,
    ) -> Self {
        Self {
            explicit_subdir: Some(subdir.into()),
            subdir_known_to_exist: true,
            ..Self::legacy(target_uris, as_of_time)
        }
    }

    pub fn with_incremental_storage(mut self, uris: Vec<String>) -> Self {
        self.incremental_storage = uris;
        self
    }

    pub fn with_incremental_from(mut self, uris: Vec<String>) -> Self {
        self.incremental_from_override = uris;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupKind {
    Full,
    Incremental,
}

/// Where a planned backup goes. Built per request and handed to the backup job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDestination {
    /// The collection, or `None` for `BACKUP TO`.
    pub collection_uri: Option<String>,
    /// Default URI the new backup is written to.
    pub planned_uri: String,
    /// Subdirectory inside the collection; empty for `BACKUP TO`.
    pub chosen_suffix: String,
    /// Non-default URIs of the new backup, keyed by locality.
    pub uris_by_locality: BTreeMap<String, String>,
    /// Base backup first, then each existing incremental layer in order.
    pub prior_backup_uris: Vec<String>,
}

impl ResolvedDestination {
    pub fn kind(&self) -> BackupKind {
        if self.prior_backup_uris.is_empty() {
            BackupKind::Full
        } else {
            BackupKind::Incremental
        }
    }
}

/// Storage access for one resolution: who opens stores, as whom, and the
/// token that aborts the resolution.
#[derive(Clone, Copy)]
pub struct StorageContext<'a> {
    pub factory: &'a dyn StorageFactory,
    pub user: &'a Username,
    pub cancel: &'a CancellationToken,
}

impl<'a> StorageContext<'a> {
    pub fn new(
        factory: &'a dyn StorageFactory,
        user: &'a Username,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            factory,
            user,
            cancel,
        }
    }

    pub async fn open(&self, uri: &str) -> Result<Box<dyn ExternalStorage>> {
        cancellable(self.cancel, self.factory.open(uri, self.user))
            .await?
            .map_err(|e| DestError::storage(format!("opening {uri}"), e))
    }
}

/// Run `fut` unless `cancel` fires first.
pub(crate) async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    fut: F,
) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DestError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Close a store handle. Close failures are logged, never returned.
pub(crate) async fn release(store: Box<dyn ExternalStorage>, uri: &str) {
    if let Err(e) = store.close().await {
        warn!(uri = %uri, error = %e, "[STORAGE] Failed to close storage");
    }
}

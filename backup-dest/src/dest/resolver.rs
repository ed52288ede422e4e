//! Destination resolver.
//!
//! `BACKUP INTO` may land in a fresh subdirectory (full backup), in the
//! subdirectory named by `LATEST` or by the user (incremental on top of the
//! full backup there), or, for legacy `BACKUP TO`, directly in the target.
//! The resolver decides which, and computes every URI the backup job needs.
//!
//! | manifest | subdir named by caller | suffix | collision guard | outcome                    |
//! |----------|------------------------|--------|-----------------|----------------------------|
//! | yes      | no                     | set    | active          | `FullBackupExists`         |
//! | no       | yes                    | -      | -               | `FullBackupSubdirDisabled` |
//! | no       | no                     | -      | -               | full                       |
//! | yes      | otherwise              | -      | -               | incremental                |
//!
//! A missing manifest in a caller-named subdirectory still plans a full
//! backup when [`ResolverSettings::full_backup_with_subdir_enabled`] is set.

use super::chain::{
    assemble_chain, find_prior_backups, list_full_backups_in_collection, ManifestMode,
};
use super::incrementals::{DefaultIncrementalsLocator, IncrementalsLocator};
use super::latest::{read_latest_file, write_new_latest_file};
use super::locality::uris_by_locality;
use super::manifest::contains_manifest;
use super::{release, BackupRequest, ResolvedDestination, StorageContext};
use crate::layout::{incremental_subdir, LATEST_FILE_NAME};
use crate::storage::{StorageFactory, Username};
use crate::utils::errors::{DestError, Result};
use crate::version::{ClusterVersion, VersionKey};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Name of the setting that re-enables full backups into user-named subdirectories.
pub const FULL_BACKUP_WITH_SUBDIR_SETTING: &str = "resolver.full_backup_with_subdir_enabled";

/// Behaviour switches fixed at startup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolverSettings {
    /// Allow a full backup into a user-named subdirectory that holds no backup yet.
    pub full_backup_with_subdir_enabled: bool,
}

pub struct DestinationResolver {
    storage: Arc<dyn StorageFactory>,
    versions: Arc<dyn ClusterVersion>,
    incrementals: Arc<dyn IncrementalsLocator>,
    settings: ResolverSettings,
}

impl DestinationResolver {
    pub fn new(
        storage: Arc<dyn StorageFactory>,
        versions: Arc<dyn ClusterVersion>,
        settings: ResolverSettings,
    ) -> Self {
        Self {
            storage,
            versions,
            incrementals: Arc::new(DefaultIncrementalsLocator),
            settings,
        }
    }

    /// Replace the policy deciding where incremental layers go.
    pub fn with_incrementals_locator(mut self, locator: Arc<dyn IncrementalsLocator>) -> Self {
        self.incrementals = locator;
        self
    }

    /// Resolve where the backup described by `request` is written.
    pub async fn resolve(
        &self,
        user: &Username,
        request: &BackupRequest,
        cancel: &CancellationToken,
    ) -> Result<ResolvedDestination> {
        let ctx = StorageContext::new(self.storage.as_ref(), user, cancel);
        let default_uri = uris_by_locality(&request.target_uris, "")?.default_uri;

        // BACKUP TO leaves both the subdirectory and the collection unset.
        let mut collection_uri = None;
        let mut chosen_suffix = String::new();
        if let Some(subdir) = request.explicit_subdir.as_deref().filter(|s| !s.is_empty()) {
            chosen_suffix = if subdir == LATEST_FILE_NAME {
                read_latest_file(&ctx, &default_uri).await?
            } else {
                subdir.to_string()
            };
            collection_uri = Some(default_uri);
        }

        let planned = uris_by_locality(&request.target_uris, &chosen_suffix)?;

        if !request.incremental_from_override.is_empty() {
            info!(
                planned_uri = %planned.default_uri,
                priors = request.incremental_from_override.len(),
                "[RESOLVE_DEST] Using explicit INCREMENTAL FROM chain"
            );
            return Ok(ResolvedDestination {
                collection_uri,
                planned_uri: planned.default_uri,
                chosen_suffix,
                uris_by_locality: planned.by_locality,
                prior_backup_uris: request.incremental_from_override.clone(),
            });
        }

        let store = ctx.open(&planned.default_uri).await?;
        let exists = contains_manifest(store.as_ref(), cancel).await;
        release(store, &planned.default_uri).await;
        let exists = exists?;
        debug!(uri = %planned.default_uri, exists, "[RESOLVE_DEST] Probed for manifest");

        if exists
            && !request.subdir_known_to_exist
            && !chosen_suffix.is_empty()
            && self.versions.is_active(VersionKey::FullBackupCollisionGuard)
        {
            return Err(DestError::FullBackupExists {
                planned_uri: planned.default_uri,
                suffix: chosen_suffix,
                collection: request.target_uris.first().cloned().unwrap_or_default(),
            });
        }

        if !exists {
            if request.subdir_known_to_exist && !self.settings.full_backup_with_subdir_enabled {
                return Err(DestError::FullBackupSubdirDisabled {
                    suffix: chosen_suffix,
                    setting: FULL_BACKUP_WITH_SUBDIR_SETTING.to_string(),
                });
            }
            info!(
                planned_uri = %planned.default_uri,
                suffix = %chosen_suffix,
                "[RESOLVE_DEST] Planning full backup"
            );
            return Ok(ResolvedDestination {
                collection_uri,
                planned_uri: planned.default_uri,
                chosen_suffix,
                uris_by_locality: planned.by_locality,
                prior_backup_uris: Vec::new(),
            });
        }

        // A full backup is already there, so this one appends a layer to it.
        let incrementals = self
            .incrementals
            .resolve(
                &ctx,
                &request.incremental_storage,
                &request.target_uris,
                &chosen_suffix,
            )
            .await?;

        let priors_default_uri = uris_by_locality(&incrementals, "")?.default_uri;
        let store = ctx.open(&priors_default_uri).await?;
        let priors = find_prior_backups(store.as_ref(), ManifestMode::Omit, cancel).await;
        release(store, &priors_default_uri).await;
        let priors = priors.map_err(|e| {
            e.with_context("adjusting backup destination to append new layer to existing backup")
        })?;

        let prior_backup_uris = assemble_chain(&planned.default_uri, &priors_default_uri, &priors)?;

        let layer = uris_by_locality(&incrementals, &incremental_subdir(&request.as_of_time))?;
        info!(
            planned_uri = %layer.default_uri,
            base_uri = %planned.default_uri,
            layers = priors.len(),
            "[RESOLVE_DEST] Planning incremental backup"
        );
        Ok(ResolvedDestination {
            collection_uri,
            planned_uri: layer.default_uri,
            chosen_suffix,
            uris_by_locality: layer.by_locality,
            prior_backup_uris,
        })
    }

    /// Subdirectory recorded by the collection's newest `LATEST` pointer.
    pub async fn read_latest(
        &self,
        user: &Username,
        collection_uri: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let ctx = StorageContext::new(self.storage.as_ref(), user, cancel);
        read_latest_file(&ctx, collection_uri).await
    }

    /// Record `suffix` as the collection's newest backup. Returns the object written.
    pub async fn write_latest(
        &self,
        user: &Username,
        collection_uri: &str,
        suffix: &str,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let ctx = StorageContext::new(self.storage.as_ref(), user, cancel);
        let store = ctx.open(collection_uri).await?;
        let written =
            write_new_latest_file(store.as_ref(), self.versions.as_ref(), suffix, cancel).await;
        release(store, collection_uri).await;
        written
    }

    /// Subdirectories of the collection that hold a full backup.
    pub async fn list_full_backups(
        &self,
        user: &Username,
        collection_uri: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let ctx = StorageContext::new(self.storage.as_ref(), user, cancel);
        let store = ctx.open(collection_uri).await?;
        let found = list_full_backups_in_collection(store.as_ref(), cancel).await;
        release(store, collection_uri).await;
        found
    }
}

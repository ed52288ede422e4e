//! Where the incremental layers of a full backup live.

use super::chain::{find_prior_backups, ManifestMode};
use super::locality::{append_paths, uris_by_locality};
use super::{release, StorageContext};
use crate::layout::DEFAULT_INCREMENTALS_SUBDIR;
use crate::utils::errors::Result;
use async_trait::async_trait;
use tracing::debug;

/// Resolves the URIs holding incremental layers for the full backup at
/// `subdir` of a collection.
#[async_trait]
pub trait IncrementalsLocator: Send + Sync {
    async fn resolve(
        &self,
        ctx: &StorageContext<'_>,
        explicit_incremental_collections: &[String],
        full_backup_collections: &[String],
        subdir: &str,
    ) -> Result<Vec<String>>;
}

/// Explicit incremental storage wins. Otherwise chains that already have
/// layers next to their full backup keep them there, and new chains use
/// `<collection>/incrementals/<subdir>`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultIncrementalsLocator;

#[async_trait]
impl IncrementalsLocator for DefaultIncrementalsLocator {
    async fn resolve(
        &self,
        ctx: &StorageContext<'_>,
        explicit_incremental_collections: &[String],
        full_backup_collections: &[String],
        subdir: &str,
    ) -> Result<Vec<String>> {
        if !explicit_incremental_collections.is_empty() {
            return append_paths(explicit_incremental_collections, &[subdir]);
        }

        let in_place = append_paths(full_backup_collections, &[subdir])?;
        let in_place_default = uris_by_locality(&in_place, "")?.default_uri;
        let store = ctx.open(&in_place_default).await?;
        let priors = find_prior_backups(store.as_ref(), ManifestMode::Omit, ctx.cancel).await;
        release(store, &in_place_default).await;

        if !priors?.is_empty() {
            debug!(uri = %in_place_default, "[RESOLVE_DEST] Using in-place incrementals location");
            return Ok(in_place);
        }
        append_paths(
            full_backup_collections,
            &[DEFAULT_INCREMENTALS_SUBDIR, subdir],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryBackend, MemoryStorageFactory, StorageFactory, Username};
    use tokio_util::sync::CancellationToken;

    async fn locate(backend: MemoryBackend, explicit: &[String], full: &[String]) -> Vec<String> {
        let factory = MemoryStorageFactory::new(backend);
        let user = Username::new("root");
        let cancel = CancellationToken::new();
        let ctx = StorageContext::new(&factory as &dyn StorageFactory, &user, &cancel);
        DefaultIncrementalsLocator
            .resolve(&ctx, explicit, full, "/2024/01/01-000000.00")
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_default_location() {
        let out = locate(MemoryBackend::new(), &[], &["s3://b/coll".to_string()]).await;
        assert_eq!(out, vec!["s3://b/coll/incrementals/2024/01/01-000000.00"]);
    }

    #[tokio::test]
    async fn test_in_place_layers_are_kept() {
        let backend = MemoryBackend::new();
        backend
            .insert(
                "b/coll/2024/01/01-000000.00/20240102/000000.00/BACKUP_MANIFEST",
                "m",
            )
            .await;
        let out = locate(backend, &[], &["s3://b/coll".to_string()]).await;
        assert_eq!(out, vec!["s3://b/coll/2024/01/01-000000.00"]);
    }

    #[tokio::test]
    async fn test_explicit_location() {
        let out = locate(
            MemoryBackend::new(),
            &["s3://other/inc?COCKROACH_LOCALITY=default".to_string()],
            &["s3://b/coll".to_string()],
        )
        .await;
        assert_eq!(
            out,
            vec!["s3://other/inc/2024/01/01-000000.00?COCKROACH_LOCALITY=default"]
        );
    }
}

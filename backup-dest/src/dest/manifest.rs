//! Completed-backup probe.

use super::cancellable;
use crate::layout::BACKUP_MANIFEST_NAME;
use crate::storage::ExternalStorage;
use crate::utils::errors::{DestError, Result};
use tokio_util::sync::CancellationToken;

/// Whether `store` holds a completed backup, i.e. a `BACKUP_MANIFEST`.
pub async fn contains_manifest(
    store: &dyn ExternalStorage,
    cancel: &CancellationToken,
) -> Result<bool> {
    match cancellable(cancel, store.read_file(BACKUP_MANIFEST_NAME)).await? {
        Ok(reader) => {
            drop(reader);
            Ok(true)
        }
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(DestError::storage(
            format!("checking for {BACKUP_MANIFEST_NAME}"),
            e,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{FileReader, ListVisitor, MemoryBackend, MemoryStorage, StorageProvider};
    use crate::utils::errors::{StorageError, StorageResult};
    use async_trait::async_trait;
    use bytes::Bytes;

    #[derive(Debug)]
    struct BrokenStorage;

    #[async_trait]
    impl ExternalStorage for BrokenStorage {
        fn provider(&self) -> StorageProvider {
            StorageProvider::S3
        }

        async fn read_file(&self, path: &str) -> StorageResult<FileReader> {
            Err(StorageError::Io {
                path: path.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            })
        }

        async fn write_file(&self, _path: &str, _content: Bytes) -> StorageResult<()> {
            Ok(())
        }

        async fn list(&self, _: &str, _: &str, _: &mut ListVisitor<'_>) -> StorageResult<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_manifest_presence() {
        let cancel = CancellationToken::new();
        let backend = MemoryBackend::new();
        let store = MemoryStorage::new(backend.clone(), "b/full", StorageProvider::S3);
        assert!(!contains_manifest(&store, &cancel).await.unwrap());

        backend.insert("b/full/BACKUP_MANIFEST", "manifest").await;
        assert!(contains_manifest(&store, &cancel).await.unwrap());
    }

    #[tokio::test]
    async fn test_other_errors_propagate() {
        let cancel = CancellationToken::new();
        let err = contains_manifest(&BrokenStorage, &cancel).await.unwrap_err();
        assert!(matches!(err, DestError::Storage { .. }));
        assert!(!err.is_not_found());
    }

    #[tokio::test]
    async fn test_cancelled_probe() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let store = MemoryStorage::new(MemoryBackend::new(), "b", StorageProvider::S3);
        let err = contains_manifest(&store, &cancel).await.unwrap_err();
        assert!(matches!(err, DestError::Cancelled));
    }
}

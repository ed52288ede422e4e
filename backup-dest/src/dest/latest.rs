//! The `LATEST` pointer of a backup collection.
//!
//! The pointer records the subdirectory of the most recent full backup.
//! Older clusters keep a single `LATEST` object in the collection root and
//! overwrite it. Current clusters never overwrite: every write adds
//! `metadata/latest/LATEST-<hex>` where `<hex>` is the descending encoding of
//! the write time, so the first name in an ascending listing is the newest.
//!
//! Readers try the locations in [`LATEST_READ_ORDER`] until one has a pointer.

use super::{cancellable, release, StorageContext};
use crate::layout::encoding::{decode_bytes_descending, encode_string_descending};
use crate::layout::{
    parse_pointer_timestamp, pointer_timestamp, LATEST_FILE_NAME, LATEST_HISTORY_DIRECTORY,
};
use crate::storage::{ExternalStorage, FileReader, StorageProvider};
use crate::utils::errors::{DestError, Result, StorageError};
use crate::version::{ClusterVersion, VersionKey};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::ops::ControlFlow;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// One place a pointer may live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatestReadStrategy {
    /// First entry of a listing of `metadata/latest`.
    HistoryListing,
    /// `metadata/latest/LATEST`, for stores that cannot list.
    HistoryFixedName,
    /// `LATEST` in the collection root, written by older clusters.
    BaseDirectory,
}

pub const LATEST_READ_ORDER: [LatestReadStrategy; 3] = [
    LatestReadStrategy::HistoryListing,
    LatestReadStrategy::HistoryFixedName,
    LatestReadStrategy::BaseDirectory,
];

/// Outcome of one read strategy.
pub enum LatestProbe {
    Found { path: String, reader: FileReader },
    Absent,
    /// The store cannot list; the history directory must be read by fixed name.
    Unlistable,
}

impl LatestReadStrategy {
    /// Whether this strategy runs, given what earlier strategies saw.
    fn applies(self, listing_unsupported: bool) -> bool {
        match self {
            LatestReadStrategy::HistoryFixedName => listing_unsupported,
            _ => true,
        }
    }

    pub async fn attempt(
        self,
        store: &dyn ExternalStorage,
        cancel: &CancellationToken,
    ) -> Result<LatestProbe> {
        let path = match self {
            LatestReadStrategy::HistoryListing => {
                let mut first = None;
                let listed = cancellable(
                    cancel,
                    store.list(LATEST_HISTORY_DIRECTORY, "", &mut |name| {
                        first = Some(name.trim_start_matches('/').to_string());
                        ControlFlow::Break(())
                    }),
                )
                .await?;
                match listed {
                    Ok(()) => {}
                    Err(StorageError::ListingUnsupported) => return Ok(LatestProbe::Unlistable),
                    Err(e) => {
                        return Err(DestError::storage(
                            format!("listing {LATEST_HISTORY_DIRECTORY}"),
                            e,
                        ))
                    }
                }
                match first {
                    Some(name) => {
                        if let Some(written_at) = pointer_written_at(&name) {
                            debug!(name = %name, %written_at, "[LATEST] Newest pointer in history");
                        }
                        format!("{LATEST_HISTORY_DIRECTORY}/{name}")
                    }
                    None => return Ok(LatestProbe::Absent),
                }
            }
            LatestReadStrategy::HistoryFixedName => {
                format!("{LATEST_HISTORY_DIRECTORY}/{LATEST_FILE_NAME}")
            }
            LatestReadStrategy::BaseDirectory => LATEST_FILE_NAME.to_string(),
        };

        match cancellable(cancel, store.read_file(&path)).await? {
            Ok(reader) => Ok(LatestProbe::Found { path, reader }),
            Err(e) if e.is_not_found() => Ok(LatestProbe::Absent),
            Err(e) => Err(DestError::storage(format!("reading {path}"), e)),
        }
    }
}

/// Locate the newest pointer in `store`.
///
/// Returns the pointer's path and an open reader over it.
pub async fn find_latest_file(
    store: &dyn ExternalStorage,
    cancel: &CancellationToken,
) -> Result<(String, FileReader)> {
    let mut listing_unsupported = false;
    for strategy in LATEST_READ_ORDER {
        if !strategy.applies(listing_unsupported) {
            continue;
        }
        match strategy.attempt(store, cancel).await? {
            LatestProbe::Found { path, reader } => {
                debug!(?strategy, path = %path, "[LATEST] Found pointer");
                return Ok((path, reader));
            }
            LatestProbe::Absent => {}
            LatestProbe::Unlistable => listing_unsupported = true,
        }
    }
    Err(DestError::storage(
        "LATEST file could not be read in base or metadata directory",
        StorageError::NotFound(LATEST_FILE_NAME.to_string()),
    ))
}

async fn read_pointer(
    store: &dyn ExternalStorage,
    cancel: &CancellationToken,
    collection_uri: &str,
) -> Result<String> {
    let (path, mut reader) = find_latest_file(store, cancel).await?;
    let mut content = Vec::new();
    cancellable(cancel, reader.read_to_end(&mut content))
        .await?
        .map_err(|e| {
            DestError::storage(
                format!("reading {path}"),
                StorageError::from_io(path.as_str(), e),
            )
        })?;
    drop(reader);

    if content.is_empty() {
        return Err(DestError::MalformedLatest(collection_uri.to_string()));
    }
    String::from_utf8(content).map_err(|_| DestError::MalformedLatest(collection_uri.to_string()))
}

/// Read the subdirectory recorded by the newest pointer of a collection.
pub async fn read_latest_file(ctx: &StorageContext<'_>, collection_uri: &str) -> Result<String> {
    let store = ctx.open(collection_uri).await?;
    let result = read_pointer(store.as_ref(), ctx.cancel, collection_uri).await;
    release(store, collection_uri).await;

    match result {
        Err(e) if e.is_not_found() => Err(DestError::LatestNotFound(collection_uri.to_string())),
        other => other,
    }
}

/// Whether the collection in `store` has any pointer.
pub async fn check_for_latest_file_in_collection(
    store: &dyn ExternalStorage,
    cancel: &CancellationToken,
) -> Result<bool> {
    match find_latest_file(store, cancel).await {
        Ok((_, reader)) => {
            drop(reader);
            Ok(true)
        }
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// How a new pointer is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatestEncoding {
    /// Overwrite `LATEST` in the root; some nodes cannot read the history directory yet.
    LegacyBase,
    /// Overwrite `LATEST` in the root; the store cannot list, so history order is unusable.
    UnlistableBase,
    /// Add a new timestamped object to the history directory.
    History,
}

impl LatestEncoding {
    pub fn choose(store: &dyn ExternalStorage, versions: &dyn ClusterVersion) -> Self {
        if !versions.is_active(VersionKey::WriteOnceLatest) {
            LatestEncoding::LegacyBase
        } else if store.provider() == StorageProvider::Http || !store.supports_listing() {
            LatestEncoding::UnlistableBase
        } else {
            LatestEncoding::History
        }
    }
}

/// `metadata/latest/LATEST-<hex>` for a pointer written at `now`.
pub fn new_timestamped_latest_file_name(now: &DateTime<Utc>) -> String {
    let mut buf = Vec::new();
    encode_string_descending(&mut buf, &pointer_timestamp(now));
    format!(
        "{LATEST_HISTORY_DIRECTORY}/{LATEST_FILE_NAME}-{}",
        hex::encode(buf)
    )
}

/// Write time encoded in a history pointer name, if it is one.
pub fn pointer_written_at(name: &str) -> Option<DateTime<Utc>> {
    let file = name.rsplit('/').next()?;
    let encoded = file.strip_prefix(LATEST_FILE_NAME)?.strip_prefix('-')?;
    let bytes = hex::decode(encoded).ok()?;
    let (decoded, rest) = decode_bytes_descending(&bytes)?;
    if !rest.is_empty() {
        return None;
    }
    parse_pointer_timestamp(std::str::from_utf8(&decoded).ok()?)
}

/// Record `suffix` as the newest backup of the collection in `store`.
///
/// Returns the path written.
pub async fn write_new_latest_file(
    store: &dyn ExternalStorage,
    versions: &dyn ClusterVersion,
    suffix: &str,
    cancel: &CancellationToken,
) -> Result<String> {
    write_new_latest_file_at(store, versions, suffix, &Utc::now(), cancel).await
}

pub async fn write_new_latest_file_at(
    store: &dyn ExternalStorage,
    versions: &dyn ClusterVersion,
    suffix: &str,
    now: &DateTime<Utc>,
    cancel: &CancellationToken,
) -> Result<String> {
    let encoding = LatestEncoding::choose(store, versions);
    let path = match encoding {
        LatestEncoding::LegacyBase | LatestEncoding::UnlistableBase => LATEST_FILE_NAME.to_string(),
        LatestEncoding::History => new_timestamped_latest_file_name(now),
    };

    cancellable(
        cancel,
        store.write_file(&path, Bytes::copy_from_slice(suffix.as_bytes())),
    )
    .await?
    .map_err(|e| DestError::storage(format!("writing {path}"), e))?;

    info!(path = %path, suffix = %suffix, ?encoding, "[LATEST] Wrote pointer");
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{ListVisitor, MemoryBackend, MemoryStorage, StorageFactory, Username};
    use crate::storage::MemoryStorageFactory;
    use crate::utils::errors::StorageResult;
    use crate::version::FixedVersion;
    use async_trait::async_trait;

    fn at(s: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
    }

    fn current() -> FixedVersion {
        FixedVersion(VersionKey::CURRENT)
    }

    async fn read(store: &dyn ExternalStorage) -> Result<String> {
        read_pointer(store, &CancellationToken::new(), "test://collection").await
    }

    #[derive(Debug)]
    struct FailingList(MemoryStorage);

    #[async_trait]
    impl ExternalStorage for FailingList {
        fn provider(&self) -> StorageProvider {
            self.0.provider()
        }

        async fn read_file(&self, path: &str) -> StorageResult<FileReader> {
            self.0.read_file(path).await
        }

        async fn write_file(&self, path: &str, content: Bytes) -> StorageResult<()> {
            self.0.write_file(path, content).await
        }

        async fn list(&self, _: &str, _: &str, _: &mut ListVisitor<'_>) -> StorageResult<()> {
            Err(StorageError::Backend("connection reset".into()))
        }
    }

    /// Store whose reads of one object fail with an access error.
    #[derive(Debug)]
    struct DeniedRead {
        inner: MemoryStorage,
        denied: &'static str,
    }

    #[async_trait]
    impl ExternalStorage for DeniedRead {
        fn provider(&self) -> StorageProvider {
            self.inner.provider()
        }

        fn supports_listing(&self) -> bool {
            self.inner.supports_listing()
        }

        async fn read_file(&self, path: &str) -> StorageResult<FileReader> {
            if path == self.denied {
                return Err(StorageError::Backend("403 access denied".into()));
            }
            self.inner.read_file(path).await
        }

        async fn write_file(&self, path: &str, content: Bytes) -> StorageResult<()> {
            self.inner.write_file(path, content).await
        }

        async fn list(
            &self,
            prefix: &str,
            delimiter: &str,
            visit: &mut ListVisitor<'_>,
        ) -> StorageResult<()> {
            self.inner.list(prefix, delimiter, visit).await
        }
    }

    #[test]
    fn test_newer_pointer_names_sort_first() {
        let t1 = at("2024-01-01T00:00:00Z");
        let t2 = at("2024-01-01T00:00:00.000000001Z");
        let t3 = at("2025-06-30T12:00:00Z");
        let n1 = new_timestamped_latest_file_name(&t1);
        let n2 = new_timestamped_latest_file_name(&t2);
        let n3 = new_timestamped_latest_file_name(&t3);

        let mut names = vec![n1.clone(), n3.clone(), n2.clone()];
        names.sort();
        assert_eq!(names, vec![n3, n2, n1.clone()]);
        assert!(n1.starts_with("metadata/latest/LATEST-13"));
    }

    #[test]
    fn test_pointer_written_at_round_trips() {
        let t = at("2024-02-29T23:59:59.5Z");
        let name = new_timestamped_latest_file_name(&t);
        assert_eq!(pointer_written_at(&name), Some(t));
        assert_eq!(pointer_written_at("LATEST"), None);
        assert_eq!(pointer_written_at("LATEST-zz"), None);
    }

    #[tokio::test]
    async fn test_reads_newest_history_pointer() {
        let cancel = CancellationToken::new();
        let store = MemoryStorage::new(MemoryBackend::new(), "b/coll", StorageProvider::S3);
        let versions = current();

        write_new_latest_file_at(
            &store,
            &versions,
            "/2024/01/01-000000.00",
            &at("2024-01-01T00:00:00Z"),
            &cancel,
        )
        .await
        .unwrap();
        write_new_latest_file_at(
            &store,
            &versions,
            "/2024/01/02-000000.00",
            &at("2024-01-02T00:00:00Z"),
            &cancel,
        )
        .await
        .unwrap();
        store
            .write_file(
                LATEST_FILE_NAME,
                Bytes::from_static(b"/2023/12/31-000000.00"),
            )
            .await
            .unwrap();

        assert_eq!(read(&store).await.unwrap(), "/2024/01/02-000000.00");
    }

    #[tokio::test]
    async fn test_empty_history_falls_back_to_base() {
        let store = MemoryStorage::new(MemoryBackend::new(), "b/coll", StorageProvider::S3);
        store
            .write_file(LATEST_FILE_NAME, Bytes::from_static(b"/old"))
            .await
            .unwrap();
        assert_eq!(read(&store).await.unwrap(), "/old");
        let probe = LatestReadStrategy::BaseDirectory
            .attempt(&store, &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(probe, LatestProbe::Found { ref path, .. } if path == "LATEST"));
    }

    #[tokio::test]
    async fn test_unlistable_store_reads_fixed_history_name() {
        let backend = MemoryBackend::new();
        let store = MemoryStorage::new(backend.clone(), "h/coll", StorageProvider::Http)
            .without_listing();
        backend.insert("h/coll/metadata/latest/LATEST", "/from-history").await;
        backend.insert("h/coll/LATEST", "/from-base").await;
        assert_eq!(read(&store).await.unwrap(), "/from-history");

        let store = MemoryStorage::new(MemoryBackend::new(), "h/coll", StorageProvider::Http)
            .without_listing();
        store
            .write_file(LATEST_FILE_NAME, Bytes::from_static(b"/from-base"))
            .await
            .unwrap();
        assert_eq!(read(&store).await.unwrap(), "/from-base");
    }

    #[tokio::test]
    async fn test_fixed_history_name_skipped_when_listing_works() {
        let backend = MemoryBackend::new();
        let store = MemoryStorage::new(backend.clone(), "b/coll", StorageProvider::S3);
        // A fixed-name history object is only consulted when listing is unavailable,
        // but listing will still find it as the first history entry.
        backend.insert("b/coll/metadata/latest/LATEST", "/listed").await;
        assert_eq!(read(&store).await.unwrap(), "/listed");
    }

    #[tokio::test]
    async fn test_listing_error_aborts() {
        let backend = MemoryBackend::new();
        backend.insert("b/coll/LATEST", "/base").await;
        let store = FailingList(MemoryStorage::new(backend, "b/coll", StorageProvider::S3));
        let err = read(&store).await.unwrap_err();
        assert!(matches!(err, DestError::Storage { source: StorageError::Backend(_), .. }));
    }

    #[tokio::test]
    async fn test_read_error_aborts_fallback() {
        // Fixed history name denied on a store that cannot list.
        let backend = MemoryBackend::new();
        backend.insert("h/coll/LATEST", "/base").await;
        let store = DeniedRead {
            inner: MemoryStorage::new(backend, "h/coll", StorageProvider::Http).without_listing(),
            denied: "metadata/latest/LATEST",
        };
        let err = read(&store).await.unwrap_err();
        assert!(matches!(
            err,
            DestError::Storage { source: StorageError::Backend(_), .. }
        ));
        assert!(err.to_string().starts_with("reading metadata/latest/LATEST"));

        // Base pointer denied after an empty history listing.
        let backend = MemoryBackend::new();
        backend.insert("b/coll/LATEST", "/base").await;
        let store = DeniedRead {
            inner: MemoryStorage::new(backend, "b/coll", StorageProvider::S3),
            denied: LATEST_FILE_NAME,
        };
        let err = read(&store).await.unwrap_err();
        assert!(!err.is_not_found());
        assert!(err.to_string().starts_with("reading LATEST"));
    }

    #[tokio::test]
    async fn test_missing_and_malformed_pointer() {
        let backend = MemoryBackend::new();
        let factory = MemoryStorageFactory::new(backend.clone());
        let user = Username::new("root");
        let cancel = CancellationToken::new();
        let ctx = StorageContext::new(&factory as &dyn StorageFactory, &user, &cancel);

        let err = read_latest_file(&ctx, "s3://b/coll").await.unwrap_err();
        assert!(matches!(err, DestError::LatestNotFound(ref c) if c == "s3://b/coll"));

        backend.insert("b/coll/LATEST", "").await;
        let err = read_latest_file(&ctx, "s3://b/coll").await.unwrap_err();
        assert!(matches!(err, DestError::MalformedLatest(_)));

        backend.insert("b/coll/LATEST", "/2024/03/01-000000.00").await;
        assert_eq!(
            read_latest_file(&ctx, "s3://b/coll").await.unwrap(),
            "/2024/03/01-000000.00"
        );
    }

    #[tokio::test]
    async fn test_write_encoding_selection() {
        let cancel = CancellationToken::new();
        let now = at("2024-01-01T00:00:00Z");

        let store = MemoryStorage::new(MemoryBackend::new(), "b/coll", StorageProvider::S3);
        let legacy = FixedVersion(VersionKey::FullBackupCollisionGuard);
        assert_eq!(
            LatestEncoding::choose(&store, &legacy),
            LatestEncoding::LegacyBase
        );
        let path = write_new_latest_file_at(&store, &legacy, "/x", &now, &cancel).await.unwrap();
        assert_eq!(path, "LATEST");

        let http = MemoryStorage::new(MemoryBackend::new(), "h/coll", StorageProvider::Http)
            .without_listing();
        assert_eq!(
            LatestEncoding::choose(&http, &current()),
            LatestEncoding::UnlistableBase
        );
        let path = write_new_latest_file_at(&http, &current(), "/x", &now, &cancel).await.unwrap();
        assert_eq!(path, "LATEST");

        assert_eq!(
            LatestEncoding::choose(&store, &current()),
            LatestEncoding::History
        );
        let path = write_new_latest_file_at(&store, &current(), "/y", &now, &cancel).await.unwrap();
        assert_eq!(path, new_timestamped_latest_file_name(&now));
    }

    #[tokio::test]
    async fn test_history_writes_never_replace_earlier_pointers() {
        let cancel = CancellationToken::new();
        let backend = MemoryBackend::new();
        let store = MemoryStorage::new(backend.clone(), "b/coll", StorageProvider::S3);
        for (i, t) in ["2024-01-01T00:00:00Z", "2024-01-02T00:00:00Z", "2024-01-03T00:00:00Z"]
            .iter()
            .enumerate()
        {
            write_new_latest_file_at(&store, &current(), &format!("/{i}"), &at(t), &cancel)
                .await
                .unwrap();
        }
        assert_eq!(backend.keys().await.len(), 3);
        assert_eq!(read(&store).await.unwrap(), "/2");
    }

    #[tokio::test]
    async fn test_check_for_latest() {
        let cancel = CancellationToken::new();
        let store = MemoryStorage::new(MemoryBackend::new(), "b/coll", StorageProvider::S3);
        assert!(!check_for_latest_file_in_collection(&store, &cancel).await.unwrap());

        write_new_latest_file(&store, &current(), "/x", &cancel).await.unwrap();
        assert!(check_for_latest_file_in_collection(&store, &cancel).await.unwrap());
    }
}

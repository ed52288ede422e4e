//! Storage factories mapping URIs to handles.

use super::{
    ExternalStorage, LocalStorage, MemoryBackend, MemoryStorage, StorageFactory, StorageProvider,
    Username,
};
use crate::layout::join_url_path;
use crate::utils::errors::{StorageError, StorageResult};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::debug;

fn parse(uri: &str) -> StorageResult<(url::Url, StorageProvider)> {
    let parsed = url::Url::parse(uri)
        .map_err(|e| StorageError::InvalidPath(format!("{uri}: {e}")))?;
    let provider = parsed
        .scheme()
        .parse::<StorageProvider>()
        .map_err(|e| StorageError::Backend(e.to_string()))?;
    Ok((parsed, provider))
}

/// Opens local handles for `file://`, `nodelocal://` and `userfile://` URIs and
/// in-memory handles for `mem://` URIs.
///
/// `nodelocal://<node>/<path>` resolves to `<local_root>/<path>`;
/// `userfile://<db>/<path>` resolves to `<local_root>/userfile/<user>/<db>/<path>`.
#[derive(Debug, Clone)]
pub struct DefaultStorageFactory {
    local_root: PathBuf,
    memory: MemoryBackend,
}

impl DefaultStorageFactory {
    pub fn new(local_root: impl Into<PathBuf>) -> Self {
        Self {
            local_root: local_root.into(),
            memory: MemoryBackend::new(),
        }
    }
}

#[async_trait]
impl StorageFactory for DefaultStorageFactory {
    async fn open(&self, uri: &str, user: &Username) -> StorageResult<Box<dyn ExternalStorage>> {
        let (parsed, provider) = parse(uri)?;
        debug!(uri = %uri, user = %user, ?provider, "[STORAGE] Opening storage");

        let relative = parsed.path().trim_start_matches('/');
        match provider {
            StorageProvider::LocalFile => Ok(Box::new(LocalStorage::new(parsed.path(), provider))),
            StorageProvider::NodeLocal => Ok(Box::new(LocalStorage::new(
                self.local_root.join(relative),
                provider,
            ))),
            StorageProvider::UserFile => {
                let db = parsed.host_str().unwrap_or("defaultdb");
                let root = self
                    .local_root
                    .join("userfile")
                    .join(user.as_str())
                    .join(join_url_path(&[db, relative]));
                Ok(Box::new(LocalStorage::new(root, provider)))
            }
            StorageProvider::Memory => Ok(Box::new(MemoryStorage::for_uri(
                self.memory.clone(),
                uri,
            )?)),
            other => Err(StorageError::Backend(format!(
                "no storage client configured for provider {other:?}"
            ))),
        }
    }
}

/// Opens every URI as an in-memory handle over one shared backend.
///
/// `http(s)` URIs get handles without listing support.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorageFactory {
    backend: MemoryBackend,
}

impl MemoryStorageFactory {
    pub fn new(backend: MemoryBackend) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl StorageFactory for MemoryStorageFactory {
    async fn open(&self, uri: &str, user: &Username) -> StorageResult<Box<dyn ExternalStorage>> {
        debug!(uri = %uri, user = %user, "[STORAGE] Opening in-memory storage");
        Ok(Box::new(MemoryStorage::for_uri(self.backend.clone(), uri)?))
    }
}

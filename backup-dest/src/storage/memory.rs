//! In-process object storage.
//!
//! All handles opened over one [`MemoryBackend`] share the same object map,
//! the way several handles over one bucket do.

use super::{visit_sorted_keys, ExternalStorage, FileReader, ListVisitor, StorageProvider};
use crate::layout::join_url_path;
use crate::utils::errors::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared object map keyed by `host/path`.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    objects: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `data` under the absolute key `key`.
    pub async fn insert(&self, key: impl Into<String>, data: impl Into<Bytes>) {
        self.objects.write().await.insert(key.into(), data.into());
    }

    pub async fn get(&self, key: &str) -> Option<Bytes> {
        self.objects.read().await.get(key).cloned()
    }

    /// All keys, sorted.
    pub async fn keys(&self) -> Vec<String> {
        self.objects.read().await.keys().cloned().collect()
    }
}

/// A handle rooted at one location inside a [`MemoryBackend`].
#[derive(Debug, Clone)]
pub struct MemoryStorage {
    backend: MemoryBackend,
    root: String,
    provider: StorageProvider,
    listing: bool,
}

impl MemoryStorage {
    pub fn new(backend: MemoryBackend, root: impl AsRef<str>, provider: StorageProvider) -> Self {
        Self {
            backend,
            root: root.as_ref().trim_matches('/').to_string(),
            provider,
            listing: true,
        }
    }

    /// Root the handle at `host/path` of `uri`.
    pub fn for_uri(backend: MemoryBackend, uri: &str) -> StorageResult<Self> {
        let parsed = url::Url::parse(uri)
            .map_err(|e| StorageError::InvalidPath(format!("{uri}: {e}")))?;
        let provider = parsed
            .scheme()
            .parse::<StorageProvider>()
            .map_err(|e| StorageError::Backend(e.to_string()))?;
        let root = join_url_path(&[parsed.host_str().unwrap_or_default(), parsed.path()]);
        let storage = Self::new(backend, root, provider);
        Ok(if provider == StorageProvider::Http {
            storage.without_listing()
        } else {
            storage
        })
    }

    /// Disable listing, as plain HTTP endpoints do.
    pub fn without_listing(mut self) -> Self {
        self.listing = false;
        self
    }

    fn key(&self, path: &str) -> String {
        join_url_path(&[self.root.as_str(), path])
            .trim_start_matches('/')
            .to_string()
    }

    fn list_prefix(&self, prefix: &str) -> String {
        let prefix = prefix.trim_start_matches('/');
        match (self.root.is_empty(), prefix.is_empty()) {
            (true, _) => prefix.to_string(),
            (false, true) => format!("{}/", self.root),
            (false, false) => format!("{}/{}", self.root, prefix),
        }
    }
}

#[async_trait]
impl ExternalStorage for MemoryStorage {
    fn provider(&self) -> StorageProvider {
        self.provider
    }

    fn supports_listing(&self) -> bool {
        self.listing
    }

    async fn read_file(&self, path: &str) -> StorageResult<FileReader> {
        let key = self.key(path);
        match self.backend.get(&key).await {
            Some(data) => Ok(Box::new(Cursor::new(data))),
            None => Err(StorageError::NotFound(key)),
        }
    }

    async fn write_file(&self, path: &str, content: Bytes) -> StorageResult<()> {
        let key = self.key(path);
        if key.is_empty() {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        self.backend.insert(key, content).await;
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        delimiter: &str,
        visit: &mut ListVisitor<'_>,
    ) -> StorageResult<()> {
        if !self.listing {
            return Err(StorageError::ListingUnsupported);
        }
        let full_prefix = self.list_prefix(prefix);
        let keys = self.backend.keys().await;
        visit_sorted_keys(
            keys.iter().map(String::as_str),
            &full_prefix,
            delimiter,
            visit,
        );
        Ok(())
    }
}

//! Directory-backed storage.

use super::{visit_sorted_keys, ExternalStorage, FileReader, ListVisitor, StorageProvider};
use crate::utils::errors::{StorageError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::path::{Component, Path, PathBuf};
use tokio::io::AsyncWriteExt;
use walkdir::WalkDir;

/// Storage rooted at a local directory. Object names map to relative file paths.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
    provider: StorageProvider,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>, provider: StorageProvider) -> Self {
        Self {
            root: root.into(),
            provider,
        }
    }

    fn resolve(&self, path: &str) -> StorageResult<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(StorageError::InvalidPath(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

/// A partially written object, removed on drop unless renamed into place.
struct Staging {
    path: PathBuf,
    committed: bool,
}

impl Drop for Staging {
    fn drop(&mut self) {
        if !self.committed {
            let _ = std::fs::remove_file(&self.path);
        }
    }
}

/// Every file below `root` as a `/`-separated relative key, sorted.
fn collect_keys(root: &Path) -> StorageResult<Vec<String>> {
    if !root.exists() {
        return Ok(Vec::new());
    }
    let mut keys = Vec::new();
    for entry in WalkDir::new(root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e
                .path()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| root.display().to_string());
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop"));
            StorageError::Io { path, source }
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        // Partially written objects are never listed.
        if entry.file_name().to_string_lossy().ends_with(".partial") {
            continue;
        }
        if let Ok(relative) = entry.path().strip_prefix(root) {
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            keys.push(key);
        }
    }
    keys.sort();
    Ok(keys)
}

#[async_trait]
impl ExternalStorage for LocalStorage {
    fn provider(&self) -> StorageProvider {
        self.provider
    }

    async fn read_file(&self, path: &str) -> StorageResult<FileReader> {
        let full = self.resolve(path)?;
        let file = tokio::fs::File::open(&full)
            .await
            .map_err(|e| StorageError::from_io(full.display().to_string(), e))?;
        Ok(Box::new(file))
    }

    async fn write_file(&self, path: &str, content: Bytes) -> StorageResult<()> {
        let full = self.resolve(path)?;
        let name = full
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| StorageError::InvalidPath(path.to_string()))?;
        let io_err = |e| StorageError::from_io(full.display().to_string(), e);

        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        let mut staging = Staging {
            path: full.with_file_name(format!(".{name}.partial")),
            committed: false,
        };
        let mut file = tokio::fs::File::create(&staging.path)
            .await
            .map_err(io_err)?;
        file.write_all(&content).await.map_err(io_err)?;
        file.sync_all().await.map_err(io_err)?;
        drop(file);
        tokio::fs::rename(&staging.path, &full)
            .await
            .map_err(io_err)?;
        staging.committed = true;
        Ok(())
    }

    async fn list(
        &self,
        prefix: &str,
        delimiter: &str,
        visit: &mut ListVisitor<'_>,
    ) -> StorageResult<()> {
        let root = self.root.clone();
        let keys = tokio::task::spawn_blocking(move || collect_keys(&root))
            .await
            .map_err(|e| StorageError::Backend(format!("listing task failed: {e}")))??;
        visit_sorted_keys(
            keys.iter().map(String::as_str),
            prefix.trim_start_matches('/'),
            delimiter,
            visit,
        );
        Ok(())
    }
}

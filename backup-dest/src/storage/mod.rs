//! Storage collaborator interfaces.
//!
//! The resolver never talks to a cloud SDK directly. It opens an
//! [`ExternalStorage`] handle rooted at a URI through a [`StorageFactory`],
//! performs one read, write or listing, and closes it again.
//!
//! ## Traits
//!
//! - `ExternalStorage`: read/write/list relative to the handle's root
//! - `StorageFactory`: opens a handle for a URI on behalf of a user
//!
//! ## Implementations
//!
//! - `MemoryStorage`: shared in-process object map, optionally without listing
//! - `LocalStorage`: a directory on the local filesystem

pub mod factory;
pub mod local;
pub mod memory;

use crate::utils::errors::{DestError, StorageResult};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt::{self, Debug};
use std::ops::ControlFlow;
use std::str::FromStr;
use tokio::io::AsyncRead;

pub use factory::{DefaultStorageFactory, MemoryStorageFactory};
pub use local::LocalStorage;
pub use memory::{MemoryBackend, MemoryStorage};

/// Streaming reader returned by [`ExternalStorage::read_file`]. Dropping it releases it.
pub type FileReader = Box<dyn AsyncRead + Send + Unpin>;

/// Listing callback. Return `ControlFlow::Break(())` to stop the listing early.
pub type ListVisitor<'a> = dyn FnMut(&str) -> ControlFlow<()> + Send + 'a;

/// Kind of backend behind a storage URI, derived from its scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    S3,
    Gcs,
    Azure,
    Http,
    NodeLocal,
    UserFile,
    LocalFile,
    Memory,
}

impl StorageProvider {
    /// Provider for the scheme of `uri`.
    pub fn from_uri(uri: &str) -> Result<Self, DestError> {
        let parsed = url::Url::parse(uri).map_err(|source| DestError::InvalidUri {
            uri: uri.to_string(),
            source,
        })?;
        parsed.scheme().parse()
    }
}

impl FromStr for StorageProvider {
    type Err = DestError;

    fn from_str(scheme: &str) -> Result<Self, Self::Err> {
        match scheme.to_ascii_lowercase().as_str() {
            "s3" => Ok(StorageProvider::S3),
            "gs" => Ok(StorageProvider::Gcs),
            "azure" | "azure-blob" => Ok(StorageProvider::Azure),
            "http" | "https" => Ok(StorageProvider::Http),
            "nodelocal" => Ok(StorageProvider::NodeLocal),
            "userfile" => Ok(StorageProvider::UserFile),
            "file" => Ok(StorageProvider::LocalFile),
            "mem" => Ok(StorageProvider::Memory),
            other => Err(DestError::UnknownProvider(other.to_string())),
        }
    }
}

/// Identity under which storage handles are opened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A storage location rooted at one URI.
///
/// Paths are relative to the root. Objects are never modified by the
/// resolver once written, except the legacy `LATEST` pointer.
#[async_trait]
pub trait ExternalStorage: Debug + Send + Sync {
    fn provider(&self) -> StorageProvider;

    /// Whether [`ExternalStorage::list`] is implemented.
    fn supports_listing(&self) -> bool {
        true
    }

    /// Open `path` for reading. Returns `StorageError::NotFound` if absent.
    async fn read_file(&self, path: &str) -> StorageResult<FileReader>;

    async fn write_file(&self, path: &str, content: Bytes) -> StorageResult<()>;

    /// Visit object names under `prefix` in ascending order.
    ///
    /// Names are reported with `prefix` removed. With a non-empty `delimiter`,
    /// names containing it are cut after its first occurrence and reported once.
    /// Returns `StorageError::ListingUnsupported` if the backend cannot list.
    async fn list(
        &self,
        prefix: &str,
        delimiter: &str,
        visit: &mut ListVisitor<'_>,
    ) -> StorageResult<()>;

    /// Release the handle.
    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }
}

/// Opens storage handles for URIs.
#[async_trait]
pub trait StorageFactory: Send + Sync {
    async fn open(&self, uri: &str, user: &Username) -> StorageResult<Box<dyn ExternalStorage>>;
}

/// Apply listing semantics to keys already sorted ascending.
pub(crate) fn visit_sorted_keys<'k, I>(
    keys: I,
    prefix: &str,
    delimiter: &str,
    visit: &mut ListVisitor<'_>,
) where
    I: IntoIterator<Item = &'k str>,
{
    let mut last: Option<&str> = None;
    for key in keys {
        let Some(rest) = key.strip_prefix(prefix) else {
            continue;
        };
        let name = match (delimiter.is_empty(), rest.find(delimiter)) {
            (false, Some(i)) => &rest[..i + delimiter.len()],
            _ => rest,
        };
        if name.is_empty() || last == Some(name) {
            continue;
        }
        last = Some(name);
        if visit(name).is_break() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect(keys: &[&str], prefix: &str, delimiter: &str) -> Vec<String> {
        let mut out = Vec::new();
        visit_sorted_keys(keys.iter().copied(), prefix, delimiter, &mut |name| {
            out.push(name.to_string());
            ControlFlow::Continue(())
        });
        out
    }

    #[test]
    fn test_provider_from_scheme() {
        assert_eq!(
            "s3".parse::<StorageProvider>().unwrap(),
            StorageProvider::S3
        );
        assert_eq!(
            "HTTPS".parse::<StorageProvider>().unwrap(),
            StorageProvider::Http
        );
        assert_eq!(
            StorageProvider::from_uri("nodelocal://1/backups").unwrap(),
            StorageProvider::NodeLocal
        );
        assert!(matches!(
            "ftp".parse::<StorageProvider>(),
            Err(DestError::UnknownProvider(s)) if s == "ftp"
        ));
        assert!(matches!(
            StorageProvider::from_uri("not a uri"),
            Err(DestError::InvalidUri { .. })
        ));
    }

    #[test]
    fn test_visit_strips_prefix() {
        let keys = ["c/metadata/latest/LATEST-a", "c/metadata/latest/LATEST-b", "d/x"];
        assert_eq!(
            collect(&keys, "c/metadata/latest", ""),
            vec!["/LATEST-a", "/LATEST-b"]
        );
    }

    #[test]
    fn test_visit_collapses_delimiter() {
        let keys = [
            "a/b/c/BACKUP_MANIFEST",
            "a/b/c/data/1.sst",
            "a/b/c/data/2.sst",
            "a/b/d",
        ];
        assert_eq!(
            collect(&keys, "", "data/"),
            vec!["a/b/c/BACKUP_MANIFEST", "a/b/c/data/", "a/b/d"]
        );
    }

    #[test]
    fn test_visit_stops_on_break() {
        let keys = ["x/1", "x/2", "x/3"];
        let mut seen = Vec::new();
        visit_sorted_keys(keys.iter().copied(), "x/", "", &mut |name| {
            seen.push(name.to_string());
            ControlFlow::Break(())
        });
        assert_eq!(seen, vec!["1"]);
    }
}

//! Backup destination resolution
//!
//! Decides where a backup is written (full or incremental), maintains the
//! `LATEST` pointer of a collection and discovers the layers of an existing
//! backup chain on external storage.

pub mod config;
pub mod dest;
pub mod layout;
pub mod storage;
pub mod utils;
pub mod version;

// Re-export commonly used types
pub use config::Config;
pub use dest::resolver::{DestinationResolver, ResolverSettings};
pub use dest::{BackupKind, BackupRequest, ResolvedDestination};
pub use storage::{DefaultStorageFactory, ExternalStorage, StorageFactory, Username};
pub use utils::errors::DestError;
pub use version::{ClusterVersion, FixedVersion, VersionKey};
pub type Result<T> = std::result::Result<T, DestError>;

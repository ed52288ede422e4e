//! Custom error types for backup destination resolution.

use thiserror::Error;

/// Errors reported by a storage collaborator.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("file does not exist: {0}")]
    NotFound(String),

    #[error("listing is not supported by this storage")]
    ListingUnsupported,

    #[error("invalid storage path: {0}")]
    InvalidPath(String),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    /// Map an `io::Error` for `path`. `ErrorKind::NotFound` becomes [`StorageError::NotFound`].
    pub fn from_io(path: impl Into<String>, source: std::io::Error) -> Self {
        let path = path.into();
        if source.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(path)
        } else {
            StorageError::Io { path, source }
        }
    }
}

#[derive(Error, Debug)]
pub enum DestError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("invalid URI {uri}: {source}")]
    InvalidUri {
        uri: String,
        #[source]
        source: url::ParseError,
    },

    #[error("unknown storage provider: {0}")]
    UnknownProvider(String),

    #[error("unknown cluster version: {0}")]
    UnknownVersion(String),

    #[error("COCKROACH_LOCALITY {0} is invalid for a single backup location")]
    InvalidSingleLocality(String),

    #[error(
        "multiple URLs are provided for partitioned backup, but COCKROACH_LOCALITY is not \
         specified on {0}"
    )]
    MissingLocality(String),

    #[error("multiple default URLs provided for partition backup")]
    MultipleDefaults,

    #[error("no default URL provided for partitioned backup")]
    NoDefault,

    #[error("failed to parse backup locality {tier:?}: {reason}")]
    InvalidLocality { tier: String, reason: String },

    #[error("duplicate URIs for locality {0}")]
    DuplicateLocality(String),

    #[error("malformed LATEST file in {0}")]
    MalformedLatest(String),

    #[error("path {0} does not contain a completed latest backup")]
    LatestNotFound(String),

    #[error(
        "A full backup already exists in {planned_uri}. Consider running an incremental backup \
         to this full backup via `BACKUP INTO '{suffix}' IN '{collection}'`"
    )]
    FullBackupExists {
        planned_uri: String,
        suffix: String,
        collection: String,
    },

    #[error(
        "A full backup cannot be written to {suffix:?}, a user defined subdirectory. To take a \
         full backup, remove the subdirectory from the backup command (i.e. run 'BACKUP ... INTO \
         <collectionURI>'). Or, to take a full backup at a specific subdirectory, enable the \
         deprecated syntax by switching the {setting:?} setting to true; however, note this \
         deprecated syntax will not be available in a future release."
    )]
    FullBackupSubdirDisabled { suffix: String, setting: String },

    #[error("{context}: {source}")]
    Storage {
        context: String,
        #[source]
        source: StorageError,
    },

    #[error("operation cancelled")]
    Cancelled,
}

impl DestError {
    /// Wrap a storage error with the operation and path it came from.
    pub fn storage(context: impl Into<String>, source: StorageError) -> Self {
        DestError::Storage {
            context: context.into(),
            source,
        }
    }

    /// Prefix the context of a storage error; other errors pass through unchanged.
    pub fn with_context(self, outer: impl AsRef<str>) -> Self {
        match self {
            DestError::Storage { context, source } => DestError::Storage {
                context: format!("{}: {context}", outer.as_ref()),
                source,
            },
            other => other,
        }
    }

    /// True when the underlying cause is a missing object.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DestError::Storage { source, .. } if source.is_not_found())
    }
}

pub type Result<T> = std::result::Result<T, DestError>;
pub type StorageResult<T> = std::result::Result<T, StorageError>;

//! Error types and logging helpers.

pub mod errors;
pub mod logger;

pub use errors::{DestError, Result, StorageError, StorageResult};

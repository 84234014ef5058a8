//! Cache error types.

use thiserror::Error;

/// Errors from the cache storage backend.
#[derive(Debug, Error)]
pub enum CacheError {
    /// RocksDB error
    #[error("Store error: {0}")]
    Store(String),

    /// Column family missing from an opened database
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Entry vector length does not match its recorded dimension
    #[error("Corrupt entry {key}: vector length {actual} != dimension {expected}")]
    CorruptEntry {
        key: String,
        expected: usize,
        actual: usize,
    },
}

impl From<rocksdb::Error> for CacheError {
    fn from(e: rocksdb::Error) -> Self {
        CacheError::Store(e.to_string())
    }
}

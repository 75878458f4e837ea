//! Tree store error types.

use std::path::PathBuf;
use thiserror::Error;

/// Tree store operation errors.
#[derive(Debug, Error)]
pub enum TreeStoreError {
    #[error("tree {0} is not rendered")]
    NotRendered(String),

    #[error("wrong tree checksum for {id}: {actual}, expected: {expected}")]
    ChecksumMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("tree path {0} already exists")]
    AlreadyExists(PathBuf),

    #[error("tree store corruption: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] redb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Store(#[from] stowage_store::StoreError),

    #[error(transparent)]
    Core(#[from] stowage_core::Error),
}

impl From<redb::DatabaseError> for TreeStoreError {
    fn from(e: redb::DatabaseError) -> Self {
        Self::Database(e.into())
    }
}

impl From<redb::TransactionError> for TreeStoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Database(e.into())
    }
}

impl From<redb::TableError> for TreeStoreError {
    fn from(e: redb::TableError) -> Self {
        Self::Database(e.into())
    }
}

impl From<redb::StorageError> for TreeStoreError {
    fn from(e: redb::StorageError) -> Self {
        Self::Database(e.into())
    }
}

impl From<redb::CommitError> for TreeStoreError {
    fn from(e: redb::CommitError) -> Self {
        Self::Database(e.into())
    }
}

/// Result type for tree store operations.
pub type TreeStoreResult<T> = std::result::Result<T, TreeStoreError>;

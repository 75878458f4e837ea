//! Blob and ref store error types.

use thiserror::Error;

/// Store operation errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("no blob found for digest {0}")]
    DigestNotFound(String),

    #[error("no ref found for id {0}")]
    RefNotFound(String),

    #[error("digest {0} too short")]
    DigestTooShort(String),

    #[error("ambiguous digest: {0}")]
    AmbiguousDigest(String),

    #[error("cannot remove referenced blob {0}")]
    Referenced(String),

    #[error("blob {0} removed but stale data has been left on disk")]
    StaleData(String),

    #[error("blob {0} has no manifest entry")]
    MissingManifest(String),

    #[error("cannot decode manifest for {digest}")]
    ManifestParse {
        digest: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("no aci found for name {name} with labels {labels:?}")]
    AciNotFound {
        name: String,
        labels: Vec<(String, String)>,
    },

    #[error("store corruption: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(#[from] redb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Core(#[from] stowage_core::Error),
}

impl From<redb::DatabaseError> for StoreError {
    fn from(e: redb::DatabaseError) -> Self {
        Self::Database(e.into())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        Self::Database(e.into())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        Self::Database(e.into())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        Self::Database(e.into())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        Self::Database(e.into())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

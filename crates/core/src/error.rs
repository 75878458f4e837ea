//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("bad digest: {0}")]
    BadDigest(String),

    #[error("unknown digest algorithm: {0}")]
    UnknownAlgorithm(String),

    #[error("unknown distribution type: {0}")]
    UnknownDistributionType(String),

    #[error("malformed distribution uri {uri}: {reason}")]
    MalformedUri { uri: String, reason: String },

    #[error("bad docker string {0}")]
    BadDockerString(String),

    #[error("bad appc image string {0}")]
    BadAppString(String),

    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;

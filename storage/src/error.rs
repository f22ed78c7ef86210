//! Error types for the storage layer.

use thiserror::Error;

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Errors that can occur in the storage layer.
#[derive(Error, Debug)]
pub enum StorageError {
    /// IO error while reading indexed content or a page file.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Page encoding or decoding error.
    #[error("page serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backing page store failure with context.
    #[error("page store error: {0}")]
    PageStore(String),
}

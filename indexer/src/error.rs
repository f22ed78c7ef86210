//! Error types for the indexer.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for indexer operations.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors that can occur while indexing.
///
/// The type is `Clone` because concurrent callers attached to one in-flight
/// indexing task all receive the same outcome; causes are carried as
/// rendered strings for that reason.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// The path handed to an explicit add does not exist.
    #[error("path not found: {}", .0.display())]
    PathNotFound(PathBuf),

    /// IO or tokenization failure for a single file, always path-tagged.
    #[error("failed to index {}: {cause}", path.display())]
    Indexing { path: PathBuf, cause: String },

    /// A directory's watch subscription is no longer valid. Fatal to the
    /// watch loop.
    #[error("watch subscription for {} is no longer valid", .0.display())]
    SubscriptionInvalid(PathBuf),

    /// Watch primitive failure outside a single subscription.
    #[error("watch service error: {0}")]
    Watch(String),

    /// Invalid filter exclude pattern.
    #[error("invalid exclude pattern: {0}")]
    InvalidPattern(String),

    /// An indexing task was cancelled or panicked before completing.
    #[error("indexing task aborted: {0}")]
    TaskAborted(String),
}

impl IndexError {
    /// Wrap a per-file failure with the offending path.
    pub(crate) fn indexing(path: impl Into<PathBuf>, cause: impl std::fmt::Display) -> Self {
        Self::Indexing {
            path: path.into(),
            cause: cause.to_string(),
        }
    }
}
